// Service -> client messages, decoded in two stages: raw JSON -> envelope -> typed message.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{cmd, ProtocolError, SAVE_SUCCESS_TEXT};
use crate::project::ProjectStatsReport;
use crate::types::{FeatureStructure, ToolIndex};

/// Outer `{cmd, data}` shape shared by every JSON frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub cmd: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn from_value(raw: &Value) -> Result<Self, ProtocolError> {
        let cmd = raw
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingCmd)?
            .to_owned();
        let data = raw.get("data").cloned().unwrap_or(Value::Null);
        Ok(Self { cmd, data })
    }
}

/// Closed set of messages the client interprets. Anything else decodes to
/// [`ServerMessage::Unrecognized`] and is only forwarded to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Session,
    OpenCas(OpenCas),
    OpenSchema(Value),
    ChangeCas(ChangeCas),
    OpenTool(OpenTool),
    OpenToolSeg(OpenToolSeg),
    OpenView(OpenView),
    OpenProject(OpenProject),
    ListProjectStats(Box<ProjectStatsReport>),
    Msg(Notice),
    Export(Value),
    ExportProgress(ExportProgress),
    Unrecognized(String),
}

impl ServerMessage {
    /// Parse a text frame, returning the raw JSON alongside the decoded message.
    pub fn parse(text: &str) -> Result<(Value, Self), ProtocolError> {
        let raw: Value = serde_json::from_str(text).map_err(ProtocolError::MalformedFrame)?;
        let message = Self::decode(&raw)?;
        Ok((raw, message))
    }

    pub fn decode(raw: &Value) -> Result<Self, ProtocolError> {
        let envelope = Envelope::from_value(raw)?;
        let invalid = |source| ProtocolError::InvalidPayload { cmd: envelope.cmd.clone(), source };

        let message = match envelope.cmd.as_str() {
            cmd::SESSION => Self::Session,
            cmd::OPEN_CAS => Self::OpenCas(payload(&envelope.data).map_err(invalid)?),
            cmd::OPEN_SCHEMA => Self::OpenSchema(envelope.data.clone()),
            cmd::CHANGE_CAS => Self::ChangeCas(payload(&envelope.data).map_err(invalid)?),
            cmd::OPEN_TOOL => Self::OpenTool(payload(&envelope.data).map_err(invalid)?),
            cmd::OPEN_TOOL_SEG => Self::OpenToolSeg(payload(&envelope.data).map_err(invalid)?),
            cmd::OPEN_VIEW => Self::OpenView(payload(&envelope.data).map_err(invalid)?),
            cmd::OPEN_PROJECT => Self::OpenProject(payload(&envelope.data).map_err(invalid)?),
            cmd::LIST_PROJECT_STATS => Self::ListProjectStats(Box::new(
                ProjectStatsReport::from_message(raw).map_err(invalid)?,
            )),
            cmd::MSG => Self::Msg(payload(&envelope.data).map_err(invalid)?),
            cmd::EXPORT => Self::Export(envelope.data.clone()),
            cmd::EXPORT_PROGRESS => {
                Self::ExportProgress(payload(&envelope.data).map_err(invalid)?)
            }
            other => Self::Unrecognized(other.to_owned()),
        };
        Ok(message)
    }

    /// Document the message targets, for messages that carry one.
    pub fn cas_id(&self) -> Option<&str> {
        match self {
            Self::OpenCas(m) => Some(&m.cas_id),
            Self::ChangeCas(m) => Some(&m.cas_id),
            Self::OpenTool(m) => Some(&m.cas_id),
            Self::OpenToolSeg(m) => Some(&m.cas_id),
            Self::OpenView(m) => Some(&m.cas_id),
            Self::OpenProject(m) => Some(&m.cas_id),
            _ => None,
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(data: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(data)
}

// ── Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenCas {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub typesystem: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub classes: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub predefined: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub permission: i64,
}

/// Per-type delta: type -> address -> change.
pub type Delta = BTreeMap<String, BTreeMap<String, DeltaEntry>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCas {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updates: Delta,
}

/// One address in a delta. An empty object on the wire is a deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaEntry {
    Delete,
    Upsert(FeatureStructure),
}

impl<'de> Deserialize<'de> for DeltaEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        if object.is_empty() {
            return Ok(Self::Delete);
        }
        FeatureStructure::deserialize(Value::Object(object))
            .map(Self::Upsert)
            .map_err(de::Error::custom)
    }
}

impl Serialize for DeltaEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Delete => Map::<String, Value>::new().serialize(serializer),
            Self::Upsert(entry) => entry.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenTool {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_elements: ToolIndex,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_elements_compare: ToolIndex,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenToolSeg {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_elements: ToolIndex,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenView {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
    pub view: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenProject {
    #[serde(deserialize_with = "id_string")]
    pub cas_id: String,
}

/// Human-readable notice (`msg`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    #[serde(default)]
    pub text: Option<String>,
}

impl Notice {
    /// Every notice except the save confirmation reports a failure.
    pub fn is_error(&self) -> bool {
        self.text.as_deref() != Some(SAVE_SUCCESS_TEXT)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportProgress {
    pub progress: u64,
    pub total: u64,
}

/// A present `null` decodes like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Document ids arrive as strings or numbers depending on the endpoint.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct IdVisitor;

    impl de::Visitor<'_> for IdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or integer id")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_owned())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}
