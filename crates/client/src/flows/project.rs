// Project flow: open_project -> open_cas(project document) -> open_view -> open_tool.

use std::sync::Arc;

use annolab_common::protocol::cmd;
use annolab_common::types::view_for_user;
use tokio::sync::watch;

use super::document::{on_document, submit_form_values, FormValues};
use super::loading::LoadingState;
use super::{message_cas_id, FlowError};
use crate::client::AnnoClient;
use crate::connection::{Connector, WsConnector};
use crate::queue::FlushOutcome;
use crate::store::DocumentHandle;

pub const PROJECT_STEPS: [&str; 5] =
    ["Open Project", "Open CAS Document", "Open View", "Open Tool", "Completed"];

/// Opens the primary document of a project for the user.
///
/// Listens under a group named by the project id.
pub struct ProjectFlow<C: Connector = WsConnector> {
    client: AnnoClient<C>,
    project_id: String,
    state: watch::Receiver<LoadingState>,
}

impl<C: Connector> ProjectFlow<C> {
    pub fn start(client: &AnnoClient<C>, project_id: &str, user_name: &str, tool: &str) -> Self {
        let group = project_id.to_owned();
        client.registry().clear_group(&group);

        let (state_tx, state) = watch::channel(LoadingState::new(&PROJECT_STEPS));
        let progress = Arc::new(state_tx);
        let project_document = |client: &AnnoClient<C>| client.store().project_cas_id();

        let weak = client.downgrade();
        let step = progress.clone();
        let _ = client.subscribe(cmd::OPEN_PROJECT, &group, move |message| {
            let (Some(client), Some(cas_id)) = (weak.upgrade(), message_cas_id(message)) else {
                return;
            };
            client.open_document(&cas_id);
            step.send_modify(|s| {
                s.complete_step(2);
            });
        });

        let view = view_for_user(user_name);
        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_CAS, project_document, move |client, doc| {
            client.open_view(doc, &view);
            step.send_modify(|s| {
                s.complete_step(3);
            });
        });

        let tool = tool.to_owned();
        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_VIEW, project_document, move |client, doc| {
            client.open_tool(doc, &tool);
            step.send_modify(|s| {
                s.complete_step(4);
            });
        });

        let step = progress.clone();
        on_document(client, &group, cmd::OPEN_TOOL, project_document, move |_, _| {
            step.send_modify(|s| {
                s.complete_step(5);
            });
        });

        on_document(client, &group, cmd::CHANGE_CAS, project_document, |client, doc| {
            client.save_document(doc);
        });

        progress.send_modify(|s| {
            s.complete_step(1);
        });
        client.open_project(project_id, &view_for_user(user_name));

        Self { client: client.clone(), project_id: project_id.to_owned(), state }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn loading(&self) -> watch::Receiver<LoadingState> {
        self.state.clone()
    }

    pub async fn wait_ready(&self) -> Result<DocumentHandle, FlowError> {
        let mut state = self.state.clone();
        state.wait_for(|s| s.completed).await.map_err(|_| FlowError::Abandoned)?;
        self.document()
    }

    /// The project's primary document, once opened.
    pub fn document(&self) -> Result<DocumentHandle, FlowError> {
        let cas_id = self
            .client
            .store()
            .project_cas_id()
            .ok_or_else(|| FlowError::DocumentMissing(format!("of project {}", self.project_id)))?;
        self.client.document(&cas_id).ok_or(FlowError::DocumentMissing(cas_id))
    }

    pub fn submit_form(&self, values: &FormValues) -> Result<FlushOutcome, FlowError> {
        let doc = self.document()?;
        Ok(submit_form_values(&self.client, &doc, values))
    }

    pub fn stop(&self) {
        self.client.registry().clear_group(&self.project_id);
    }
}
