// Annotation data shared by the client and the wire protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Feature values of one annotation, keyed by feature name.
pub type FeatureMap = Map<String, Value>;

/// Annotations of a single type, keyed by address.
pub type AddressMap = BTreeMap<String, FeatureStructure>;

/// Per-type annotation index: type name -> address -> annotation.
pub type ToolIndex = BTreeMap<String, AddressMap>;

/// Annotation type the rating forms are stored as.
pub const CATEGORY_TYPE: &str = "org.texttechnologylab.annotation.core.Category";

/// Annotation type that carries image payloads and their ordering.
pub const COMMENT_TYPE: &str = "org.texttechnologylab.annotation.AnnotationComment";

/// One annotation (feature structure) as the service ships it.
///
/// `_addr` and `_type` are optional because deltas routinely omit them;
/// the surrounding index keys are authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureStructure {
    #[serde(rename = "_addr", default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<Value>,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub features: FeatureMap,
    /// Any other top-level keys the service attaches.
    #[serde(flatten)]
    pub extra: FeatureMap,
}

impl FeatureStructure {
    pub fn with_features(features: FeatureMap) -> Self {
        Self { features, ..Self::default() }
    }

    /// `_addr` rendered as the string form used for index keys.
    pub fn address(&self) -> Option<String> {
        self.addr.as_ref().and_then(scalar_to_string)
    }

    pub fn feature(&self, name: &str) -> Option<&Value> {
        self.features.get(name)
    }

    /// A feature as text; numbers and booleans are rendered, null is absent.
    pub fn feature_str(&self, name: &str) -> Option<String> {
        self.features.get(name).and_then(scalar_to_string)
    }

    /// A feature as a non-negative offset. Accepts numbers and numeric strings.
    pub fn feature_offset(&self, name: &str) -> Option<usize> {
        match self.features.get(name)? {
            Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Edit commands ───────────────────────────────────────────────────

/// One local edit in a document's command queue.
///
/// Serialized as `{"cmd": ..., "data": {...}}`, the shape `work_batch`
/// carries in its `queue` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data", rename_all = "snake_case")]
pub enum Command {
    Create {
        bid: String,
        #[serde(rename = "_type")]
        type_name: String,
        features: FeatureMap,
    },
    Edit {
        bid: String,
        addr: String,
        features: FeatureMap,
    },
    Remove {
        bid: String,
        addr: String,
    },
    AppendArray {
        bid: String,
        addr: String,
        #[serde(rename = "featureName")]
        feature_name: String,
        #[serde(rename = "featureAddr")]
        feature_addr: String,
    },
    Recommendation {
        bid: String,
        addr: String,
        recommendation_decision: String,
    },
}

impl Command {
    /// Batch identifier assigned when the command was queued.
    pub fn bid(&self) -> &str {
        match self {
            Self::Create { bid, .. }
            | Self::Edit { bid, .. }
            | Self::Remove { bid, .. }
            | Self::AppendArray { bid, .. }
            | Self::Recommendation { bid, .. } => bid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Edit { .. } => "edit",
            Self::Remove { .. } => "remove",
            Self::AppendArray { .. } => "append_array",
            Self::Recommendation { .. } => "recommendation",
        }
    }
}

/// Batch identifier for the next command of a queue holding `queue_len` entries.
///
/// Unique within one queue; lets a later edit reference an entity created
/// earlier in the same batch before the server has assigned it an address.
pub fn batch_identifier(queue_len: usize) -> String {
    format!("_b{queue_len}_")
}

// ── Views ───────────────────────────────────────────────────────────

pub const USER_VIEW_PREFIX: &str = "view_user_";

/// Logical view name the service uses for a user's own annotations.
pub fn view_for_user(user_name: &str) -> String {
    format!("{USER_VIEW_PREFIX}{user_name}")
}

/// Whether a view identifier is a user URI rather than a logical name.
pub fn is_view_uri(view: &str) -> bool {
    view.starts_with("http")
}
