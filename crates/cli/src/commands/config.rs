// `annolab config`: inspect and edit the local config file.

use std::path::Path;

use annolab_client::config::ClientConfig;
use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output;
use crate::session::GlobalArgs;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file plus flags)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Store the session token used for the service handshake
    SetSession { token: String },
    /// Store the user name and, optionally, the user's authority URI
    SetUser {
        name: String,
        #[arg(long)]
        uri: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ConfigResult {
    path: String,
    config: ClientConfig,
}

pub fn run(args: ConfigArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let path = global.config_path()?;
    let config = match args.action {
        ConfigAction::Show => redacted(global.load_config()?),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("config `{}` already exists; pass --force to overwrite", path.display());
            }
            let config = ClientConfig::default();
            save(&config, &path)?;
            config
        }
        ConfigAction::SetSession { token } => {
            let mut config = load_or_default(&path)?;
            config.user.session = Some(token);
            save(&config, &path)?;
            redacted(config)
        }
        ConfigAction::SetUser { name, uri } => {
            let mut config = load_or_default(&path)?;
            config.user.user_name = Some(name);
            if uri.is_some() {
                config.user.user_uri = uri;
            }
            save(&config, &path)?;
            redacted(config)
        }
    };

    let result = ConfigResult { path: path.display().to_string(), config };
    output::print_output(global.format(), &result, format_human)?;
    Ok(())
}

fn load_or_default(path: &Path) -> anyhow::Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    ClientConfig::load_from(path).with_context(|| format!("failed to read config `{}`", path.display()))
}

fn save(config: &ClientConfig, path: &Path) -> anyhow::Result<()> {
    config.save_to(path).with_context(|| format!("failed to write config `{}`", path.display()))
}

/// Session tokens are never printed.
fn redacted(mut config: ClientConfig) -> ClientConfig {
    if config.user.session.is_some() {
        config.user.session = Some("<set>".into());
    }
    config
}

fn format_human(result: &ConfigResult) -> String {
    let body = toml::to_string_pretty(&result.config).unwrap_or_else(|error| format!("<{error}>"));
    format!("# {}\n{body}", result.path)
}
