// Config resolution and service session setup shared by every command.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use annolab_client::config::{global_config_path, ClientConfig};
use annolab_client::flows::FlowError;
use annolab_client::{AnnoClient, NotificationLevel};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::Value;
use tracing::debug;

use crate::output::{self, OutputFormat};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Config file (default: ~/.annolab/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Annotation service WebSocket URL.
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Session token for the service handshake.
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// User name; selects the personal view `view_user_<name>`.
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Seconds to wait for each service round trip.
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    pub fn format(&self) -> OutputFormat {
        OutputFormat::detect(self.json)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Path the config is read from and written to.
    pub fn config_path(&self) -> Result<PathBuf> {
        self.config.clone().or_else(global_config_path).ok_or_else(|| anyhow!("could not determine home directory"))
    }

    /// File config with command-line overrides applied.
    pub fn load_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)
                .with_context(|| format!("failed to read config `{}`", path.display()))?,
            None => ClientConfig::load(),
        };
        if let Some(url) = &self.url {
            config.service_url = url.clone();
        }
        if let Some(session) = &self.session {
            config.user.session = Some(session.clone());
        }
        if let Some(user) = &self.user {
            config.user.user_name = Some(user.clone());
        }
        Ok(config)
    }
}

/// Run `fut` on a fresh current-thread runtime.
pub fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(fut))
}

/// Build a client, complete the session handshake, and relay service
/// errors to stderr while the command runs.
pub async fn connect(config: ClientConfig, global: &GlobalArgs) -> Result<AnnoClient> {
    let client = AnnoClient::new(config);

    let mut notifications = client.notifier().subscribe();
    let format = global.format();
    tokio::spawn(async move {
        while let Ok(notice) = notifications.recv().await {
            if notice.level == NotificationLevel::Error {
                output::print_warning(format, "SERVICE_NOTICE", &format!("{}: {}", notice.title, notice.message));
            }
        }
    });

    within(global.timeout(), "the session handshake", client.connect())
        .await?
        .context("could not start a session with the annotation service")?;
    debug!(url = %client.config().service_url, "session ready");
    Ok(client)
}

/// Await `fut`, failing with a timeout error naming `what`.
pub async fn within<F: Future>(limit: Duration, what: &str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut).await.map_err(|_| anyhow!("timed out waiting for {what}"))
}

pub fn user_name(client: &AnnoClient) -> Result<String> {
    Ok(client.user_name().ok_or(FlowError::MissingUser)?.to_owned())
}

/// Whether a service message is about document `cas_id`.
pub fn concerns_document(message: &Value, cas_id: &str) -> bool {
    match message.pointer("/data/casId") {
        Some(Value::String(id)) => id == cas_id,
        Some(Value::Number(id)) => id.to_string() == cas_id,
        _ => false,
    }
}
