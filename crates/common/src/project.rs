// Project tree and progress statistics as delivered by `list_project_stats`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::USER_VIEW_PREFIX;

/// Node kind of a plain document leaf.
pub const DOCUMENT_KIND: &str = "DOCUMENT";

/// A project, repository or document in the resource tree.
///
/// Containers carry `children`; leaves do not. Children may also be bare
/// string references, which are skipped when walking the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectNode {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub access: i64,
    #[serde(default)]
    pub mongoid: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ProjectChild>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ProjectChild {
    Node(ProjectNode),
    Reference(String),
}

impl ProjectNode {
    /// Whether this node's id equals `id` (numeric and string ids compare by text).
    pub fn has_id(&self, id: &str) -> bool {
        match &self.id {
            Some(Value::Number(n)) => n.to_string() == id.trim(),
            Some(Value::String(s)) => s == id,
            _ => false,
        }
    }

    /// All DOCUMENT leaves below this node with `access >= min_access`, depth first.
    pub fn documents(&self, min_access: i64) -> Vec<&ProjectNode> {
        let mut found = Vec::new();
        collect_documents(self, min_access, &mut found);
        found
    }
}

fn collect_documents<'a>(node: &'a ProjectNode, min_access: i64, out: &mut Vec<&'a ProjectNode>) {
    if let Some(children) = &node.children {
        for child in children {
            if let ProjectChild::Node(child) = child {
                collect_documents(child, min_access, out);
            }
        }
    } else if node.kind == DOCUMENT_KIND && node.access >= min_access {
        out.push(node);
    }
}

/// Per-document statistics: document -> view -> type -> user -> count.
pub type DocumentStats = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectStats {
    #[serde(default)]
    pub personal: DocumentStats,
    #[serde(default)]
    pub admin: DocumentStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectData {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProjectNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reply to `list_project_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectStatsReport {
    #[serde(default)]
    pub stats: ProjectStats,
    #[serde(default)]
    pub project_data: ProjectData,
}

impl ProjectStatsReport {
    /// Decode from a raw inbound message. The report may sit under `data`
    /// or directly on the message object.
    pub fn from_message(raw: &Value) -> Result<Self, serde_json::Error> {
        let body = match raw.get("data") {
            Some(data) if data.get("stats").is_some() || data.get("project_data").is_some() => {
                data
            }
            _ => raw,
        };
        Self::deserialize(body)
    }

    /// False only when the report names a different project.
    pub fn concerns(&self, project_id: &str) -> bool {
        match (&self.project_data.success, &self.project_data.result) {
            (true, Some(project)) => project.has_id(project_id),
            _ => true,
        }
    }

    /// Documents in which `view` has personal statistics.
    pub fn completed_documents(&self, view: &str) -> Vec<String> {
        self.stats
            .personal
            .iter()
            .filter(|(_, views)| views.contains_key(view))
            .map(|(document, _)| document.clone())
            .collect()
    }

    /// Annotator views recorded for one document in the admin statistics.
    pub fn annotators(&self, document: &str) -> Vec<String> {
        self.stats
            .admin
            .get(document)
            .map(|views| {
                views.keys().filter(|view| view.starts_with(USER_VIEW_PREFIX)).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents with at least one annotator view.
    pub fn annotated_document_count(&self) -> usize {
        self.stats
            .admin
            .values()
            .filter(|views| views.keys().any(|view| view.starts_with(USER_VIEW_PREFIX)))
            .count()
    }

    /// Project document leaves, when the project tree was delivered.
    pub fn project_documents(&self, min_access: i64) -> Vec<ProjectNode> {
        match (&self.project_data.success, &self.project_data.result) {
            (true, Some(project)) => project.documents(min_access).into_iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}
