// `annolab export`: request a repository export and wait for the file.

use std::path::PathBuf;

use annolab_common::protocol::cmd;
use anyhow::{anyhow, Context};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::output::{self, OutputFormat};
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Repository id.
    pub repository: i64,

    /// Export kind (default `category`).
    #[arg(long = "type")]
    pub kind: Option<String>,

    /// Restrict the export to one view.
    #[arg(long)]
    pub view: Option<String>,

    /// Directory the export file is written to (default from config).
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub path: PathBuf,
    pub bytes: u64,
}

pub fn run(args: ExportArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let mut config = global.load_config()?;
    if let Some(out) = &args.out {
        config.export_dir = Some(out.clone());
    }
    let result = session::block_on(export(config, args, global))??;
    output::print_output(global.format(), &result, |r| {
        format!("Exported {} bytes to {}", r.bytes, r.path.display())
    })?;
    Ok(())
}

async fn export(
    config: annolab_client::ClientConfig,
    args: ExportArgs,
    global: &GlobalArgs,
) -> anyhow::Result<ExportResult> {
    let client = session::connect(config, global).await?;

    let (done_tx, mut done) = mpsc::unbounded_channel();
    let group = format!("export{}", args.repository);
    let _ = client.subscribe(cmd::EXPORT, &group, move |message| {
        if let Some(data) = message.get("data") {
            let _ = done_tx.send(data.clone());
        }
    });
    if global.format() == OutputFormat::Human {
        let _ = client.subscribe(cmd::EXPORT_PROGRESS, &group, |message| {
            if let Some(line) = progress_line(message) {
                eprintln!("{line}");
            }
        });
    }

    client
        .request_export(args.repository, args.kind.as_deref(), args.view.as_deref())
        .delivered()
        .await
        .context("the export request was not sent")?;
    // Large repositories take a while; progress arrives as export_progress.
    let data = session::within(global.timeout() * 10, "the export file", done.recv())
        .await?
        .ok_or_else(|| anyhow!("export listener was removed"))?;
    client.registry().clear_group(&group);
    client.disconnect();

    serde_json::from_value(data).context("unexpected export notification")
}

fn progress_line(message: &Value) -> Option<String> {
    let data = message.get("data")?;
    let progress = data.get("progress")?.as_u64()?;
    match data.get("total").and_then(Value::as_u64) {
        Some(total) if total > 0 => Some(format!("exported {progress}/{total} documents")),
        _ => Some(format!("exported {progress} documents")),
    }
}
