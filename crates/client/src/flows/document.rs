// Document flow: open_cas -> open_view(user view) -> open_tool, plus rating forms.

use std::collections::BTreeMap;
use std::sync::Arc;

use annolab_common::protocol::cmd;
use annolab_common::types::{view_for_user, FeatureMap, CATEGORY_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use super::loading::LoadingState;
use super::{message_cas_id, FlowError};
use crate::client::AnnoClient;
use crate::connection::{Connector, WsConnector};
use crate::document::Document;
use crate::queue::FlushOutcome;
use crate::store::DocumentHandle;

pub const DOCUMENT_STEPS: [&str; 4] = ["Open CAS Document", "Open View", "Open Tool", "Completed"];

/// One rating-form field, stored as a Category annotation over the whole text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormValue {
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Address of the annotation already holding this field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

impl FormValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), type_name: CATEGORY_TYPE.to_owned(), addr: None }
    }
}

/// Form field name -> value.
pub type FormValues = BTreeMap<String, FormValue>;

/// Field values already stored in the document's Category annotations.
pub fn form_values(doc: &Document) -> FormValues {
    let Some(entries) = doc.tool_elements.get(CATEGORY_TYPE) else {
        return FormValues::new();
    };
    entries
        .iter()
        .filter_map(|(addr, entry)| {
            let key = entry.feature_str("key")?;
            let value = FormValue {
                value: entry.feature_str("value").unwrap_or_default(),
                type_name: CATEGORY_TYPE.to_owned(),
                addr: Some(entry.address().unwrap_or_else(|| addr.clone())),
            };
            Some((key, value))
        })
        .collect()
}

/// Merge stored values into a form being edited: stored values replace
/// untouched fields, fields the user has filled in are kept.
pub fn refresh_form(doc: &Document, current: &FormValues) -> FormValues {
    let mut merged = current.clone();
    merged.extend(form_values(doc));
    for (key, value) in current {
        if !value.value.is_empty() {
            let addr = merged.get(key).and_then(|stored| stored.addr.clone());
            merged.insert(key.clone(), FormValue { addr: value.addr.clone().or(addr), ..value.clone() });
        }
    }
    merged
}

/// Queue one edit or create per field and flush them as one batch.
pub(crate) fn submit_form_values<C: Connector>(
    client: &AnnoClient<C>,
    doc: &DocumentHandle,
    values: &FormValues,
) -> FlushOutcome {
    let end = doc.read(Document::text_len);
    for (key, field) in values {
        let mut features = FeatureMap::new();
        features.insert("begin".into(), Value::from(0));
        features.insert("end".into(), Value::from(end));
        features.insert("key".into(), Value::from(key.as_str()));
        features.insert("value".into(), Value::from(field.value.as_str()));
        match &field.addr {
            Some(addr) => client.enqueue_edit(doc, addr, features),
            None => client.enqueue_create(doc, &field.type_name, features),
        };
    }
    client.flush(doc)
}

/// Register `on_message` under `group` for messages about the document
/// `cas_id` names, once that document is in the store.
pub(crate) fn on_document<C: Connector>(
    client: &AnnoClient<C>,
    group: &str,
    message_type: &str,
    cas_id: impl Fn(&AnnoClient<C>) -> Option<String> + Send + Sync + 'static,
    on_message: impl Fn(&AnnoClient<C>, &DocumentHandle) + Send + Sync + 'static,
) {
    let weak = client.downgrade();
    let step = message_type.to_owned();
    let _ = client.subscribe(message_type, group, move |message| {
        let Some(client) = weak.upgrade() else {
            return;
        };
        let Some(expected) = cas_id(&client) else {
            return;
        };
        if message_cas_id(message).as_deref() != Some(expected.as_str()) {
            return;
        }
        match client.document(&expected) {
            Some(doc) => on_message(&client, &doc),
            None => debug!(cas_id = %expected, %step, "flow step for closed document skipped"),
        }
    });
}

/// Document selector that always names `cas_id`.
pub(crate) fn fixed_id<C: Connector>(
    cas_id: &str,
) -> impl Fn(&AnnoClient<C>) -> Option<String> + Send + Sync + 'static {
    let cas_id = cas_id.to_owned();
    move |_| Some(cas_id.clone())
}

/// Opens one document into the user's view and a tool.
///
/// The listener group is the document id; starting a flow for the same
/// document again replaces the previous one.
pub struct DocumentFlow<C: Connector = WsConnector> {
    client: AnnoClient<C>,
    cas_id: String,
    state: watch::Receiver<LoadingState>,
}

impl<C: Connector> DocumentFlow<C> {
    pub fn start(client: &AnnoClient<C>, cas_id: &str, user_name: &str, tool: &str) -> Self {
        let group = cas_id.to_owned();
        client.registry().clear_group(&group);

        let (state_tx, state) = watch::channel(LoadingState::new(&DOCUMENT_STEPS));
        let progress = Arc::new(state_tx);

        let view = view_for_user(user_name);
        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_CAS, fixed_id(cas_id), move |client, doc| {
            client.open_view(doc, &view);
            step.send_modify(|s| {
                s.complete_step(2);
            });
        });

        let tool = tool.to_owned();
        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_VIEW, fixed_id(cas_id), move |client, doc| {
            client.open_tool(doc, &tool);
            step.send_modify(|s| {
                s.complete_step(3);
            });
        });

        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_TOOL, fixed_id(cas_id), move |_, _| {
            step.send_modify(|s| {
                s.complete_step(4);
            });
        });

        on_document(client, &group, cmd::CHANGE_CAS, fixed_id(cas_id), |client, doc| {
            client.save_document(doc);
        });

        progress.send_modify(|s| {
            s.complete_step(1);
        });
        client.open_document(cas_id);

        Self { client: client.clone(), cas_id: cas_id.to_owned(), state }
    }

    pub fn cas_id(&self) -> &str {
        &self.cas_id
    }

    pub fn loading(&self) -> watch::Receiver<LoadingState> {
        self.state.clone()
    }

    /// Wait until the tool has been delivered.
    pub async fn wait_ready(&self) -> Result<DocumentHandle, FlowError> {
        let mut state = self.state.clone();
        state.wait_for(|s| s.completed).await.map_err(|_| FlowError::Abandoned)?;
        self.document()
    }

    pub fn document(&self) -> Result<DocumentHandle, FlowError> {
        self.client.document(&self.cas_id).ok_or_else(|| FlowError::DocumentMissing(self.cas_id.clone()))
    }

    /// Current form values stored in the document.
    pub fn form_values(&self) -> Result<FormValues, FlowError> {
        Ok(self.document()?.read(form_values))
    }

    /// Write form values as Category annotations and flush them.
    ///
    /// The service answers with `change_cas`, after which the document
    /// is saved automatically.
    pub fn submit_form(&self, values: &FormValues) -> Result<FlushOutcome, FlowError> {
        let doc = self.document()?;
        Ok(submit_form_values(&self.client, &doc, values))
    }

    /// Stop reacting to this document's messages.
    pub fn stop(&self) {
        self.client.registry().clear_group(&self.cas_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annolab_common::types::FeatureStructure;
    use serde_json::json;

    fn category(key: &str, value: &str) -> FeatureStructure {
        FeatureStructure::with_features(
            json!({"begin": 0, "end": 5, "key": key, "value": value}).as_object().cloned().unwrap(),
        )
    }

    fn rated_document() -> Document {
        let mut doc = Document::new("42").with_text("Hello");
        doc.add_feature_structure(CATEGORY_TYPE, "101", category("mood", "calm"));
        doc.add_feature_structure(CATEGORY_TYPE, "102", category("clarity", "4"));
        doc
    }

    #[test]
    fn form_values_come_from_category_annotations() {
        let values = form_values(&rated_document());
        assert_eq!(values.len(), 2);
        assert_eq!(values["mood"].value, "calm");
        assert_eq!(values["mood"].addr.as_deref(), Some("101"));
        assert_eq!(values["clarity"].type_name, CATEGORY_TYPE);
    }

    #[test]
    fn refresh_keeps_filled_fields_and_their_stored_address() {
        let mut current = FormValues::new();
        current.insert("mood".into(), FormValue::new("tense"));
        current.insert("clarity".into(), FormValue::new(""));
        current.insert("novel".into(), FormValue::new(""));

        let merged = refresh_form(&rated_document(), &current);

        assert_eq!(merged["mood"].value, "tense");
        assert_eq!(merged["mood"].addr.as_deref(), Some("101"));
        assert_eq!(merged["clarity"].value, "4");
        assert_eq!(merged["novel"].value, "");
    }
}
