// Client -> service requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProtocolError;
use crate::types::Command;

/// Every request the client sends, serialized as `{"cmd": ..., "data": {...}}`.
///
/// Data keys are camelCase on the wire; the few keys that are not
/// (`_addr`, `type`) carry explicit renames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    /// Session handshake; the token is opaque to the client.
    Session { session: String },
    /// Keep-alive, always with an empty data object.
    Ping {},
    OpenCas { cas_id: String },
    CloseCas { cas_id: String },
    SaveCas { cas_id: String },
    OpenSchema { cas_id: String },
    /// `force` asks the service to create the view when it does not exist.
    OpenView { cas_id: String, view: String, force: bool },
    CloseView { cas_id: String, view: String },
    OpenTool { cas_id: String, view: Option<String>, tool_name: String },
    OpenToolSeg {
        cas_id: String,
        view: Option<String>,
        page: u32,
        pages: u32,
        tool_name: String,
    },
    CloseTool { cas_id: String, tool_name: String },
    OpenProject { project_id: String, view_name: String },
    ListProjectStats { project_id: String, view_name: String },
    WorkBatch(WorkBatch),
    CreateSchema { name: String, parent: i64 },
    CreateCas { xmi: String },
    CreateDbCas(DbCasSource),
    CreateDbCasFast { name: String, description: String, parent: i64, xmi: String },
    SetMeta { cas_id: String, view: String, tool: String, key: String, value: Value },
    UserPosition {
        cas_id: String,
        #[serde(rename = "_addr")]
        addr: String,
    },
    Recommendation {
        cas_id: String,
        #[serde(rename = "type")]
        kind: String,
        view: Option<String>,
        tool: Option<String>,
    },
    Export {
        repository: i64,
        #[serde(rename = "type")]
        kind: String,
        view: String,
    },
}

impl ClientRequest {
    /// The `cmd` this request is sent under.
    pub fn cmd(&self) -> &'static str {
        use super::cmd;
        match self {
            Self::Session { .. } => cmd::SESSION,
            Self::Ping {} => cmd::PING,
            Self::OpenCas { .. } => cmd::OPEN_CAS,
            Self::CloseCas { .. } => cmd::CLOSE_CAS,
            Self::SaveCas { .. } => cmd::SAVE_CAS,
            Self::OpenSchema { .. } => cmd::OPEN_SCHEMA,
            Self::OpenView { .. } => cmd::OPEN_VIEW,
            Self::CloseView { .. } => cmd::CLOSE_VIEW,
            Self::OpenTool { .. } => cmd::OPEN_TOOL,
            Self::OpenToolSeg { .. } => cmd::OPEN_TOOL_SEG,
            Self::CloseTool { .. } => cmd::CLOSE_TOOL,
            Self::OpenProject { .. } => cmd::OPEN_PROJECT,
            Self::ListProjectStats { .. } => cmd::LIST_PROJECT_STATS,
            Self::WorkBatch(_) => cmd::WORK_BATCH,
            Self::CreateSchema { .. } => cmd::CREATE_SCHEMA,
            Self::CreateCas { .. } => cmd::CREATE_CAS,
            Self::CreateDbCas(_) => cmd::CREATE_DB_CAS,
            Self::CreateDbCasFast { .. } => cmd::CREATE_DB_CAS_FAST,
            Self::SetMeta { .. } => cmd::SET_META,
            Self::UserPosition { .. } => cmd::USER_POSITION,
            Self::Recommendation { .. } => cmd::RECOMMENDATION,
            Self::Export { .. } => cmd::EXPORT,
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// One flushed edit queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkBatch {
    pub cas_id: String,
    pub tool_name: Option<String>,
    pub view: Option<String>,
    pub perspective: String,
    /// Applied by the service in array order.
    pub queue: Vec<Command>,
    pub options: Vec<BatchOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchOption {
    pub private_session: bool,
}

/// What `create_db_cas` stores into a repository: an open document, or raw XMI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum DbCasSource {
    Document { cas_id: String, parent: i64 },
    Xmi { xmi: String, parent: i64, description: String },
}
