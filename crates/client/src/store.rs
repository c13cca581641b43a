// Document model store: the open documents of one client, keyed by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::document::Document;

/// Shared reference to one stored document.
///
/// Each document has its own lock, so work on one document never waits on
/// another. Readers borrow through [`DocumentHandle::read`].
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    id: Arc<str>,
    inner: Arc<Mutex<Document>>,
}

impl DocumentHandle {
    fn new(document: Document) -> Self {
        Self { id: Arc::from(document.id.as_str()), inner: Arc::new(Mutex::new(document)) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        let doc = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&doc)
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> Document {
        self.read(Document::clone)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut doc = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut doc)
    }

    /// Whether both handles refer to the same stored instance.
    pub fn same_instance(&self, other: &DocumentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    documents: HashMap<String, DocumentHandle>,
    project_cas_id: Option<String>,
}

/// Open documents of one client. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    state: Arc<RwLock<StoreState>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `document` under `id`, replacing any previous instance.
    pub fn upsert(&self, id: impl Into<String>, mut document: Document) -> DocumentHandle {
        let id = id.into();
        document.id.clone_from(&id);
        let handle = DocumentHandle::new(document);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.documents.insert(id.clone(), handle.clone()).is_some() {
            debug!(cas_id = %id, "replaced open document");
        }
        handle
    }

    pub fn get(&self, id: &str) -> Option<DocumentHandle> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).documents.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<DocumentHandle> {
        self.state.write().unwrap_or_else(PoisonError::into_inner).documents.remove(id)
    }

    pub fn remove_all(&self) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).documents.clear();
    }

    pub fn ids(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = state.documents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Primary document of the most recently opened project.
    pub fn set_project_cas_id(&self, id: impl Into<String>) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).project_cas_id = Some(id.into());
    }

    pub fn project_cas_id(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).project_cas_id.clone()
    }
}
