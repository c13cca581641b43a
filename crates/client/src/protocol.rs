// Session/command protocol: domain operations out, reconciliation in.
//
// Outbound operations are thin constructors over `ClientRequest` that go
// through the connection's deferred submit. Inbound frames are decoded,
// reconciled into the document store, then forwarded to every listener
// subscribed to their `cmd`.

use std::sync::{Arc, PoisonError, RwLock};

use annolab_common::protocol::cmd;
use annolab_common::protocol::inbound::{OpenTool, OpenToolSeg, OpenView, ServerMessage};
use annolab_common::protocol::outbound::{ClientRequest, DbCasSource};
use annolab_common::protocol::DEFAULT_PAGE_SIZE;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::client::AnnoClient;
use crate::connection::{Connector, Frame, FrameHandler, SendReceipt};
use crate::document::Document;
use crate::export::ExportSink;
use crate::listeners::ListenerRegistry;
use crate::notify::Notifier;
use crate::store::{DocumentHandle, DocumentStore};
use crate::username::UsernameResolver;

/// Export kind requested when the caller names none.
pub const DEFAULT_EXPORT_KIND: &str = "category";

// ── Outbound ────────────────────────────────────────────────────────

impl<C: Connector> AnnoClient<C> {
    pub fn open_document(&self, cas_id: &str) -> SendReceipt {
        self.submit(ClientRequest::OpenCas { cas_id: cas_id.to_owned() })
    }

    /// Ask the service to close the document and drop it from the store.
    pub fn close_document(&self, doc: &DocumentHandle) -> SendReceipt {
        let receipt = self.submit(ClientRequest::CloseCas { cas_id: doc.id().to_owned() });
        self.store().remove(doc.id());
        receipt
    }

    pub fn save_document(&self, doc: &DocumentHandle) -> SendReceipt {
        self.submit(ClientRequest::SaveCas { cas_id: doc.id().to_owned() })
    }

    /// Switch to `view`; the service creates it if absent.
    pub fn open_view(&self, doc: &DocumentHandle, view: &str) -> SendReceipt {
        self.submit(ClientRequest::OpenView {
            cas_id: doc.id().to_owned(),
            view: view.to_owned(),
            force: true,
        })
    }

    pub fn close_view(&self, doc: &DocumentHandle, view: &str) -> SendReceipt {
        self.submit(ClientRequest::CloseView { cas_id: doc.id().to_owned(), view: view.to_owned() })
    }

    /// Request the full annotation set of a tool under the current view.
    pub fn open_tool(&self, doc: &DocumentHandle, tool_name: &str) -> SendReceipt {
        let view = doc.read(|d| d.current_view().map(str::to_owned));
        self.submit(ClientRequest::OpenTool {
            cas_id: doc.id().to_owned(),
            view,
            tool_name: tool_name.to_owned(),
        })
    }

    /// Request one page (1-based) of a tool; replies accumulate in the document.
    pub fn open_tool_segment(
        &self,
        doc: &DocumentHandle,
        tool_name: &str,
        page: u32,
        page_size: Option<u32>,
    ) -> SendReceipt {
        let view = doc.read(|d| d.current_view().map(str::to_owned));
        self.submit(ClientRequest::OpenToolSeg {
            cas_id: doc.id().to_owned(),
            view,
            page,
            pages: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            tool_name: tool_name.to_owned(),
        })
    }

    pub fn close_tool(&self, doc: &DocumentHandle, tool_name: &str) -> SendReceipt {
        self.submit(ClientRequest::CloseTool {
            cas_id: doc.id().to_owned(),
            tool_name: tool_name.to_owned(),
        })
    }

    pub fn open_project(&self, project_id: &str, view_name: &str) -> SendReceipt {
        self.submit(ClientRequest::OpenProject {
            project_id: project_id.to_owned(),
            view_name: view_name.to_owned(),
        })
    }

    pub fn open_project_stats(&self, project_id: &str, view_name: &str) -> SendReceipt {
        self.submit(ClientRequest::ListProjectStats {
            project_id: project_id.to_owned(),
            view_name: view_name.to_owned(),
        })
    }

    pub fn open_schema(&self, cas_id: &str) -> SendReceipt {
        self.submit(ClientRequest::OpenSchema { cas_id: cas_id.to_owned() })
    }

    pub fn create_schema(&self, name: &str, parent: i64) -> SendReceipt {
        self.submit(ClientRequest::CreateSchema { name: name.to_owned(), parent })
    }

    pub fn create_cas(&self, xmi: impl Into<String>) -> SendReceipt {
        self.submit(ClientRequest::CreateCas { xmi: xmi.into() })
    }

    /// Store an open document or an XMI payload in repository `parent`.
    pub fn create_db_cas(&self, source: DbCasSource) -> SendReceipt {
        self.submit(ClientRequest::CreateDbCas(source))
    }

    pub fn create_db_cas_fast(
        &self,
        name: &str,
        description: &str,
        parent: i64,
        xmi: impl Into<String>,
    ) -> SendReceipt {
        self.submit(ClientRequest::CreateDbCasFast {
            name: name.to_owned(),
            description: description.to_owned(),
            parent,
            xmi: xmi.into(),
        })
    }

    pub fn set_meta(&self, doc: &DocumentHandle, tool: &str, key: &str, value: Value) -> SendReceipt {
        let view = doc.read(|d| d.current_view().unwrap_or_default().to_owned());
        self.submit(ClientRequest::SetMeta {
            cas_id: doc.id().to_owned(),
            view,
            tool: tool.to_owned(),
            key: key.to_owned(),
            value,
        })
    }

    pub fn user_position(&self, doc: &DocumentHandle, addr: &str) -> SendReceipt {
        self.submit(ClientRequest::UserPosition { cas_id: doc.id().to_owned(), addr: addr.to_owned() })
    }

    /// Ask for annotation suggestions of `kind` (for example `NER`) under
    /// the current view and tool.
    pub fn request_recommendation(&self, doc: &DocumentHandle, kind: &str) -> SendReceipt {
        let (view, tool) =
            doc.read(|d| (d.current_view().map(str::to_owned), d.current_tool.clone()));
        self.submit(ClientRequest::Recommendation {
            cas_id: doc.id().to_owned(),
            kind: kind.to_owned(),
            view,
            tool,
        })
    }

    /// Export repository `repository`. An empty `view` exports every view.
    ///
    /// Progress arrives as `export_progress`, the file as a binary frame
    /// followed by a local `export` message carrying its path.
    pub fn request_export(&self, repository: i64, kind: Option<&str>, view: Option<&str>) -> SendReceipt {
        self.submit(ClientRequest::Export {
            repository,
            kind: kind.unwrap_or(DEFAULT_EXPORT_KIND).to_owned(),
            view: view.unwrap_or_default().to_owned(),
        })
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Applies inbound messages to the store, then fans them out to listeners.
pub(crate) struct Reconciler {
    pub(crate) store: DocumentStore,
    pub(crate) registry: ListenerRegistry,
    pub(crate) notifier: Notifier,
    pub(crate) resolver: Arc<dyn UsernameResolver>,
    pub(crate) session: Arc<RwLock<Option<String>>>,
    pub(crate) export: ExportSink,
    pub(crate) perspective: String,
    pub(crate) private_session: bool,
}

impl FrameHandler for Reconciler {
    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Text(text) => self.handle_text(&text),
            Frame::Binary(bytes) => self.handle_export(&bytes),
        }
    }

    /// Documents belong to the session that opened them.
    fn session_closed(&self) {
        let dropped = self.store.len();
        self.store.remove_all();
        debug!(dropped, "documents released with the session");
    }
}

impl Reconciler {
    fn handle_text(&self, text: &str) {
        let (raw, message) = match ServerMessage::parse(text) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(%error, "dropping inbound frame");
                return;
            }
        };
        let Some(cmd) = raw.get("cmd").and_then(Value::as_str).map(str::to_owned) else {
            return;
        };
        trace!(%cmd, "inbound message");

        if self.reconcile(message) {
            self.registry.dispatch(&cmd, &raw, None);
        }
    }

    /// Apply `message` to the store. Returns false when the message is a
    /// no-op that listeners must not see.
    fn reconcile(&self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Session => debug!("session acknowledged"),
            ServerMessage::OpenCas(open) => {
                let cas_id = open.cas_id.clone();
                let mut document = Document::from_open(open);
                document.perspective.clone_from(&self.perspective);
                document.private_session = self.private_session;
                self.store.upsert(cas_id.clone(), document);
                info!(%cas_id, "document opened");
            }
            ServerMessage::ChangeCas(change) => {
                return self.with_document(&change.cas_id, |doc| doc.apply_delta(&change.updates));
            }
            ServerMessage::OpenTool(OpenTool { cas_id, tool_name, tool_elements, tool_elements_compare }) => {
                self.with_document(&cas_id, |doc| {
                    doc.replace_tool(tool_name, tool_elements, tool_elements_compare)
                });
            }
            ServerMessage::OpenToolSeg(OpenToolSeg { cas_id, tool_elements, .. }) => {
                self.with_document(&cas_id, |doc| doc.merge_tool_segment(tool_elements));
            }
            ServerMessage::OpenView(view) => self.bind_view(view),
            ServerMessage::OpenProject(project) => {
                debug!(cas_id = %project.cas_id, "project document recorded");
                self.store.set_project_cas_id(project.cas_id);
            }
            ServerMessage::Msg(notice) => {
                if notice.is_error() {
                    let text = notice.text.unwrap_or_else(|| "The annotation service reported an error.".into());
                    self.notifier.transient_error("Error", text);
                }
            }
            ServerMessage::ExportProgress(progress) => {
                info!(progress = progress.progress, total = progress.total, "export progress");
            }
            ServerMessage::OpenSchema(_) | ServerMessage::ListProjectStats(_) | ServerMessage::Export(_) => {}
            ServerMessage::Unrecognized(cmd) => trace!(%cmd, "forwarding uninterpreted message"),
        }
        true
    }

    fn with_document(&self, cas_id: &str, f: impl FnOnce(&mut Document)) -> bool {
        match self.store.get(cas_id) {
            Some(handle) => {
                handle.update(f);
                true
            }
            None => {
                debug!(%cas_id, "message for unknown document dropped");
                false
            }
        }
    }

    /// Bind the view; user URIs additionally get a display name looked up.
    fn bind_view(&self, view: OpenView) {
        let Some(handle) = self.store.get(&view.cas_id) else {
            debug!(cas_id = %view.cas_id, "view for unknown document dropped");
            return;
        };
        let Some(generation) = handle.update(|doc| doc.set_view(&view.view)) else {
            return;
        };

        let session = self.session.read().unwrap_or_else(PoisonError::into_inner).clone();
        let lookup = self.resolver.resolve(view.view, session);
        tokio::spawn(async move {
            let name = lookup.await;
            if !handle.update(|doc| doc.resolve_view_name(generation, name)) {
                debug!(cas_id = %handle.id(), "stale view name discarded");
            }
        });
    }

    fn handle_export(&self, bytes: &[u8]) {
        match self.export.write(bytes) {
            Ok(path) => {
                let message = json!({
                    "cmd": cmd::EXPORT,
                    "data": {"path": path.display().to_string(), "bytes": bytes.len()},
                });
                self.registry.dispatch(cmd::EXPORT, &message, None);
            }
            Err(error) => {
                warn!(%error, "could not write export");
                self.notifier.persistent_error("Export", format!("Could not write the export file: {error}"));
            }
        }
    }
}
