// `annolab check`: start a session and report who and where we are.

use clap::Args;
use serde::Serialize;

use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct CheckArgs {}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub service_url: String,
    pub user_name: Option<String>,
    pub status: String,
}

pub fn run(_args: CheckArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let result = session::block_on(async {
        let client = session::connect(config, global).await?;
        let result = CheckResult {
            service_url: client.config().service_url.clone(),
            user_name: client.user_name().map(str::to_owned),
            status: format!("{:?}", client.status()).to_lowercase(),
        };
        client.disconnect();
        anyhow::Ok(result)
    })??;
    output::print_output(global.format(), &result, |r| {
        format!("Session {} at {} as {}", r.status, r.service_url, r.user_name.as_deref().unwrap_or("<no user>"))
    })?;
    Ok(())
}
