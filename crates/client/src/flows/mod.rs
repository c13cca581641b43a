// View-level flows: multi-step orchestrations chained through listener groups.
//
// Each flow owns one listener group, clears it on start, and advances when
// the service answers the previous step. No step has a timeout; callers
// that need one wrap the wait themselves.

pub mod document;
pub mod images;
pub mod loading;
pub mod project;
pub mod stats;

use serde_json::Value;
use thiserror::Error;

use crate::connection::ConnectionError;

pub use document::{form_values, refresh_form, DocumentFlow, FormValue, FormValues};
pub use images::ImagePager;
pub use loading::{LoadingState, LoadingStep};
pub use project::ProjectFlow;
pub use stats::{ProjectProgress, ProjectStatsFlow};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The flow's listeners were removed before it completed.
    #[error("flow abandoned before completion")]
    Abandoned,

    #[error("document {0} is not open")]
    DocumentMissing(String),

    #[error("no user name configured")]
    MissingUser,
}

/// `data.casId` of an inbound message, whether sent as string or number.
pub(crate) fn message_cas_id(message: &Value) -> Option<String> {
    match message.get("data")?.get("casId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
