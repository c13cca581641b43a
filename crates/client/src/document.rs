// In-memory model of one open CAS document.

use annolab_common::protocol::inbound::{Delta, DeltaEntry, OpenCas};
use annolab_common::types::{is_view_uri, Command, FeatureStructure, ToolIndex};
use serde_json::Value;

/// Name given to documents the service opened without one.
pub const UNNAMED: &str = "unnamed";

/// One open document: text, annotation indexes, view binding and the
/// pending edit queue.
///
/// Fields are readable through [`crate::store::DocumentHandle`]; all
/// mutation goes through inbound reconciliation or the edit queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub text: String,
    pub typesystem: Option<Value>,
    /// type -> address -> annotation for the current tool.
    pub tool_elements: ToolIndex,
    pub tool_elements_compare: ToolIndex,
    pub recommendation: ToolIndex,
    pub current_tool: Option<String>,
    pub current_view_uri: Option<String>,
    pub current_view_name: Option<String>,
    pub views: Vec<Value>,
    pub classes: Vec<Value>,
    pub predefined: Vec<Value>,
    pub permission: i64,
    pub perspective: String,
    pub private_session: bool,
    /// Set while a drained batch is being handed to the transport.
    pub is_locked: bool,
    /// Pending local edits, flushed in order.
    pub cmd_queue: Vec<Command>,
    pub undo_size: u32,
    pub redo_size: u32,
    pub worker_count: u32,
    /// Bumped on every view change; username lookups carry the value they
    /// started with and are discarded if it moved on.
    pub(crate) view_generation: u64,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: UNNAMED.into(),
            text: String::new(),
            typesystem: None,
            tool_elements: ToolIndex::new(),
            tool_elements_compare: ToolIndex::new(),
            recommendation: ToolIndex::new(),
            current_tool: None,
            current_view_uri: None,
            current_view_name: None,
            views: Vec::new(),
            classes: Vec::new(),
            predefined: Vec::new(),
            permission: 0,
            perspective: "default".into(),
            private_session: false,
            is_locked: false,
            cmd_queue: Vec::new(),
            undo_size: 0,
            redo_size: 0,
            worker_count: 0,
            view_generation: 0,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub(crate) fn from_open(open: OpenCas) -> Self {
        let mut doc = Self::new(open.cas_id);
        if let Some(name) = open.name {
            doc.name = name;
        }
        doc.text = open.text;
        doc.typesystem = open.typesystem;
        doc.views = open.views;
        doc.classes = open.classes;
        doc.predefined = open.predefined;
        doc.permission = open.permission;
        doc
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// View identifier sent with requests: the URI when known, else the name.
    pub fn current_view(&self) -> Option<&str> {
        self.current_view_uri.as_deref().or(self.current_view_name.as_deref())
    }

    pub fn elements_of(&self, type_name: &str) -> Vec<&FeatureStructure> {
        self.tool_elements.get(type_name).map(|m| m.values().collect()).unwrap_or_default()
    }

    /// Look an address up in every type index.
    pub fn element(&self, addr: &str) -> Option<&FeatureStructure> {
        self.tool_elements.values().find_map(|by_addr| by_addr.get(addr))
    }

    /// Annotations of `type_name` inside `[begin, end]`; with `allow_overlap`
    /// also those crossing either boundary.
    pub fn elements_in_range(
        &self,
        type_name: &str,
        begin: usize,
        end: usize,
        allow_overlap: bool,
    ) -> Vec<&FeatureStructure> {
        self.elements_of(type_name)
            .into_iter()
            .filter(|entry| {
                let (Some(b), Some(e)) = (entry.feature_offset("begin"), entry.feature_offset("end"))
                else {
                    return false;
                };
                let inside = b >= begin && e <= end;
                let crosses = (b <= end && e >= end) || (b <= begin && e >= begin);
                inside || (allow_overlap && crosses)
            })
            .collect()
    }

    /// Text length in UTF-16 code units, the unit annotation offsets use.
    pub fn text_len(&self) -> usize {
        self.text.encode_utf16().count()
    }

    /// Text covered by an annotation's `begin`/`end` offsets.
    pub fn covered_text(&self, entry: &FeatureStructure) -> Option<String> {
        let begin = entry.feature_offset("begin")?;
        let end = entry.feature_offset("end")?;
        let units: Vec<u16> = self.text.encode_utf16().collect();
        if begin > end || end > units.len() {
            return None;
        }
        Some(String::from_utf16_lossy(&units[begin..end]))
    }

    // ── Reconciliation ──────────────────────────────────────────────

    pub(crate) fn add_feature_structure(
        &mut self,
        type_name: &str,
        addr: &str,
        entry: FeatureStructure,
    ) {
        self.tool_elements.entry(type_name.to_owned()).or_default().insert(addr.to_owned(), entry);
    }

    /// Remove an address from every type index.
    pub(crate) fn remove_feature_structure(&mut self, addr: &str) {
        for by_addr in self.tool_elements.values_mut() {
            by_addr.remove(addr);
        }
    }

    /// Apply a `change_cas` delta. An empty entry deletes the address from
    /// every type; anything else replaces the entry under its type.
    pub(crate) fn apply_delta(&mut self, delta: &Delta) {
        for (type_name, entries) in delta {
            for (addr, change) in entries {
                match change {
                    DeltaEntry::Delete => self.remove_feature_structure(addr),
                    DeltaEntry::Upsert(entry) => {
                        self.add_feature_structure(type_name, addr, entry.clone())
                    }
                }
            }
        }
    }

    /// Authoritative snapshot for a tool: replaces both indexes.
    pub(crate) fn replace_tool(
        &mut self,
        tool_name: Option<String>,
        elements: ToolIndex,
        compare: ToolIndex,
    ) {
        self.tool_elements = elements;
        self.tool_elements_compare = compare;
        self.current_tool = tool_name;
    }

    /// One page of a paginated tool: merged into the existing type maps.
    pub(crate) fn merge_tool_segment(&mut self, elements: ToolIndex) {
        for (type_name, entries) in elements {
            self.tool_elements.entry(type_name).or_default().extend(entries);
        }
    }

    /// Bind a view. Returns the generation a username lookup must present
    /// when the identifier is a URI.
    pub(crate) fn set_view(&mut self, view: &str) -> Option<u64> {
        self.view_generation += 1;
        if is_view_uri(view) {
            self.current_view_uri = Some(view.to_owned());
            Some(self.view_generation)
        } else {
            self.current_view_uri = None;
            self.current_view_name = Some(view.to_owned());
            None
        }
    }

    /// Store a resolved display name if no newer view has been bound since.
    pub(crate) fn resolve_view_name(&mut self, generation: u64, name: String) -> bool {
        if generation != self.view_generation {
            return false;
        }
        self.current_view_name = Some(name);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annolab_common::types::AddressMap;
    use serde_json::json;

    fn entry(features: Value) -> FeatureStructure {
        FeatureStructure::with_features(features.as_object().cloned().unwrap_or_default())
    }

    fn delta(raw: Value) -> Delta {
        serde_json::from_value(raw).unwrap()
    }

    fn doc_with_comment() -> Document {
        let mut doc = Document::new("42");
        doc.add_feature_structure("Comment", "x1", entry(json!({"k": "old"})));
        doc
    }

    #[test]
    fn defaults_match_unopened_document() {
        let doc = Document::new("42");
        assert_eq!(doc.name, UNNAMED);
        assert_eq!(doc.perspective, "default");
        assert!(!doc.is_locked);
        assert!(doc.cmd_queue.is_empty());
        assert!(doc.current_view().is_none());
    }

    #[test]
    fn from_open_copies_payload() {
        let open: OpenCas = serde_json::from_value(json!({
            "casId": "42", "name": "story.xmi", "text": "Hello", "permission": 2,
            "views": ["view_user_ada"]
        }))
        .unwrap();
        let doc = Document::from_open(open);
        assert_eq!(doc.id, "42");
        assert_eq!(doc.name, "story.xmi");
        assert_eq!(doc.text, "Hello");
        assert_eq!(doc.permission, 2);
        assert_eq!(doc.views, vec![json!("view_user_ada")]);
    }

    #[test]
    fn delta_with_empty_entry_deletes_and_others_upsert() {
        let mut doc = doc_with_comment();
        doc.apply_delta(&delta(json!({"Comment": {"x1": {}, "x2": {"features": {"k": "v"}}}})));

        let comments: Vec<&String> = doc.tool_elements["Comment"].keys().collect();
        assert_eq!(comments, vec!["x2"]);
    }

    #[test]
    fn delete_removes_address_from_every_type() {
        let mut doc = Document::new("42");
        doc.add_feature_structure("T", "a1", entry(json!({"k": 1})));
        doc.add_feature_structure("U", "a1", entry(json!({"k": 2})));
        doc.add_feature_structure("U", "a2", entry(json!({"k": 3})));

        doc.apply_delta(&delta(json!({"T": {"a1": {}}})));

        assert!(doc.element("a1").is_none());
        assert!(doc.tool_elements["U"].contains_key("a2"));
    }

    #[test]
    fn applying_a_delta_twice_is_idempotent() {
        let change = delta(json!({
            "Comment": {"x1": {}, "x2": {"features": {"k": "v"}}},
            "Category": {"c1": {"features": {"key": "mood", "value": "calm"}}}
        }));
        let mut once = doc_with_comment();
        once.apply_delta(&change);
        let mut twice = doc_with_comment();
        twice.apply_delta(&change);
        twice.apply_delta(&change);
        assert_eq!(once.tool_elements, twice.tool_elements);
    }

    #[test]
    fn tool_snapshot_replaces_but_segment_accumulates() {
        let page: ToolIndex =
            [("T".to_string(), AddressMap::from([("a2".to_string(), entry(json!({"n": 2})))]))]
                .into_iter()
                .collect();

        let mut merged = Document::new("42");
        merged.add_feature_structure("T", "a1", entry(json!({"n": 1})));
        merged.merge_tool_segment(page.clone());
        assert!(merged.tool_elements["T"].contains_key("a1"));
        assert!(merged.tool_elements["T"].contains_key("a2"));

        let mut replaced = Document::new("42");
        replaced.add_feature_structure("T", "a1", entry(json!({"n": 1})));
        replaced.replace_tool(Some("Time".into()), page, ToolIndex::new());
        assert_eq!(replaced.tool_elements["T"].len(), 1);
        assert!(replaced.tool_elements["T"].contains_key("a2"));
        assert_eq!(replaced.current_tool.as_deref(), Some("Time"));
    }

    #[test]
    fn uri_views_wait_for_the_latest_resolution() {
        let mut doc = Document::new("42");
        let first = doc.set_view("https://authority.hucompute.org/user/1").unwrap();
        let second = doc.set_view("https://authority.hucompute.org/user/2").unwrap();

        assert!(!doc.resolve_view_name(first, "ada".into()));
        assert!(doc.resolve_view_name(second, "bob".into()));
        assert_eq!(doc.current_view_name.as_deref(), Some("bob"));
        assert_eq!(doc.current_view(), Some("https://authority.hucompute.org/user/2"));
    }

    #[test]
    fn logical_view_replaces_uri() {
        let mut doc = Document::new("42");
        let pending = doc.set_view("https://authority.hucompute.org/user/1").unwrap();
        assert!(doc.set_view("view_user_ada").is_none());
        assert!(!doc.resolve_view_name(pending, "ada".into()));
        assert_eq!(doc.current_view(), Some("view_user_ada"));
    }

    #[test]
    fn covered_text_uses_utf16_offsets() {
        let doc = Document::new("42").with_text("a😀bc");
        assert_eq!(doc.text_len(), 5);
        let span = entry(json!({"begin": 1, "end": 4}));
        assert_eq!(doc.covered_text(&span).as_deref(), Some("😀b"));
        let out_of_range = entry(json!({"begin": 2, "end": 9}));
        assert!(doc.covered_text(&out_of_range).is_none());
    }

    #[test]
    fn elements_in_range_with_and_without_overlap() {
        let mut doc = Document::new("42").with_text("0123456789");
        doc.add_feature_structure("T", "inside", entry(json!({"begin": 2, "end": 4})));
        doc.add_feature_structure("T", "crossing", entry(json!({"begin": 4, "end": 8})));
        doc.add_feature_structure("T", "outside", entry(json!({"begin": 8, "end": 9})));

        let strict: Vec<_> = doc.elements_in_range("T", 1, 5, false);
        assert_eq!(strict.len(), 1);
        let loose = doc.elements_in_range("T", 1, 5, true);
        assert_eq!(loose.len(), 2);
    }

    mod deltas {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        const TYPES: [&str; 2] = ["Category", "Comment"];

        fn change() -> impl Strategy<Value = (usize, u8, Option<u8>)> {
            (0..TYPES.len(), 0u8..6, proptest::option::of(any::<u8>()))
        }

        proptest! {
            #[test]
            fn deltas_match_a_flat_model(changes in proptest::collection::vec(change(), 0..40)) {
                let mut doc = Document::new("42");
                let mut model: BTreeMap<(String, String), u8> = BTreeMap::new();

                for (type_index, addr, value) in changes {
                    let type_name = TYPES[type_index].to_owned();
                    let addr = format!("a{addr}");
                    let change = match value {
                        Some(v) => {
                            model.insert((type_name.clone(), addr.clone()), v);
                            json!({"features": {"v": v}})
                        }
                        None => {
                            model.retain(|(_, a), _| *a != addr);
                            json!({})
                        }
                    };
                    doc.apply_delta(&delta(json!({type_name: {addr: change}})));
                }

                let actual: BTreeMap<(String, String), u8> = doc
                    .tool_elements
                    .iter()
                    .flat_map(|(type_name, by_addr)| {
                        by_addr.iter().map(move |(addr, entry)| {
                            let v = entry.feature("v").and_then(Value::as_u64).unwrap_or(u64::MAX);
                            ((type_name.clone(), addr.clone()), v as u8)
                        })
                    })
                    .collect();
                prop_assert_eq!(actual, model);
            }
        }
    }
}
