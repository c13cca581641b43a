// Local configuration for the annotation client.
//
// Global config: `~/.annolab/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use annolab_common::protocol::DEFAULT_PAGE_SIZE;
use annolab_common::types::COMMENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Production annotation service endpoint.
pub const DEFAULT_SERVICE_URL: &str = "wss://textannotator.texttechnologylab.org/uima";

/// Root directory for client state: `~/.annolab/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".annolab"))
}

/// Path to the config file: `~/.annolab/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Client config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Annotation service WebSocket endpoint. Must be `wss`, except loopback hosts.
    pub service_url: String,
    /// Seconds between keep-alive pings once the session is ready.
    pub heartbeat_interval_sec: u64,
    /// Where export files are written. System temp dir when unset.
    pub export_dir: Option<PathBuf>,
    /// Perspective sent with every batch.
    pub perspective: String,
    /// Marks batches as belonging to a private session.
    pub private_session: bool,
    pub user: UserConfig,
    pub tools: ToolsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.into(),
            heartbeat_interval_sec: 30,
            export_dir: None,
            perspective: "default".into(),
            private_session: false,
            user: UserConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `~/.annolab/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to `~/.annolab/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_sec.max(1))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Identity of the annotating user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserConfig {
    /// Short user name; the personal view is `view_user_<name>`.
    pub user_name: Option<String>,
    /// Authority URI of the user.
    pub user_uri: Option<String>,
    /// Opaque session token sent in the `session` handshake.
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tool opened after the view is bound.
    pub default_tool: String,
    /// Page size for paginated tool segments.
    pub page_size: u32,
    /// Annotation type image entries are stored as.
    pub image_type: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_tool: "Time".into(),
            page_size: DEFAULT_PAGE_SIZE,
            image_type: COMMENT_TYPE.into(),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDir,
}
