// Wire protocol for the annotation service: `{cmd, data}` JSON envelopes.

pub mod inbound;
pub mod outbound;

use thiserror::Error;

/// Default page size for `open_tool_seg` requests.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// `msg` text the service sends after a successful save. Every other `msg`
/// text is an error report.
pub const SAVE_SUCCESS_TEXT: &str = "Document has been successfully saved!";

/// Message type names as they appear in the `cmd` field.
///
/// Listener subscriptions are keyed by these strings, including names the
/// protocol layer does not interpret itself.
pub mod cmd {
    pub const SESSION: &str = "session";
    pub const PING: &str = "ping";
    pub const OPEN_CAS: &str = "open_cas";
    pub const CLOSE_CAS: &str = "close_cas";
    pub const SAVE_CAS: &str = "save_cas";
    pub const CHANGE_CAS: &str = "change_cas";
    pub const OPEN_SCHEMA: &str = "open_schema";
    pub const OPEN_VIEW: &str = "open_view";
    pub const CLOSE_VIEW: &str = "close_view";
    pub const OPEN_TOOL: &str = "open_tool";
    pub const OPEN_TOOL_SEG: &str = "open_tool_seg";
    pub const CLOSE_TOOL: &str = "close_tool";
    pub const OPEN_PROJECT: &str = "open_project";
    pub const LIST_PROJECT_STATS: &str = "list_project_stats";
    pub const WORK_BATCH: &str = "work_batch";
    pub const CREATE_SCHEMA: &str = "create_schema";
    pub const CREATE_CAS: &str = "create_cas";
    pub const CREATE_DB_CAS: &str = "create_db_cas";
    pub const CREATE_DB_CAS_FAST: &str = "create_db_cas_fast";
    pub const SET_META: &str = "set_meta";
    pub const USER_POSITION: &str = "user_position";
    pub const RECOMMENDATION: &str = "recommendation";
    pub const EXPORT: &str = "export";
    pub const EXPORT_PROGRESS: &str = "export_progress";
    pub const MSG: &str = "msg";
    /// Synthesized locally when the transport closes.
    pub const ON_CLOSE: &str = "on_close";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("message has no `cmd` field")]
    MissingCmd,

    #[error("invalid `{cmd}` payload: {source}")]
    InvalidPayload {
        cmd: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}
