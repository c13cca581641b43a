// Project statistics: which of a project's documents the user has completed.

use annolab_common::project::{ProjectNode, ProjectStatsReport};
use annolab_common::protocol::cmd;
use annolab_common::types::view_for_user;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::FlowError;
use crate::client::AnnoClient;
use crate::connection::Connector;

/// Progress of one user in one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectProgress {
    /// Documents in which the user's view has statistics.
    pub completed: Vec<String>,
    /// Document leaves of the project tree the user may access.
    pub documents: Vec<ProjectNode>,
    pub report: ProjectStatsReport,
}

impl ProjectProgress {
    pub fn from_report(report: ProjectStatsReport, user_name: &str, min_access: i64) -> Self {
        Self {
            completed: report.completed_documents(&view_for_user(user_name)),
            documents: report.project_documents(min_access),
            report,
        }
    }

    /// Completed fraction of the accessible documents, in percent.
    pub fn percent(&self) -> f64 {
        if self.documents.is_empty() {
            return 0.0;
        }
        let done = self
            .documents
            .iter()
            .filter(|doc| doc.mongoid.as_ref().is_some_and(|id| self.completed.contains(id)))
            .count();
        done as f64 / self.documents.len() as f64 * 100.0
    }
}

/// Requests `list_project_stats` and keeps the latest report for this project.
pub struct ProjectStatsFlow {
    project_id: String,
    latest: watch::Receiver<Option<ProjectProgress>>,
}

impl ProjectStatsFlow {
    pub fn start<C: Connector>(
        client: &AnnoClient<C>,
        project_id: &str,
        user_name: &str,
        min_access: i64,
    ) -> Self {
        let group = format!("stats{project_id}");
        client.registry().clear_group(&group);

        let (latest_tx, latest) = watch::channel(None);
        let id = project_id.to_owned();
        let user = user_name.to_owned();
        let _ = client.subscribe(cmd::LIST_PROJECT_STATS, &group, move |message| {
            let report = match ProjectStatsReport::from_message(message) {
                Ok(report) => report,
                Err(error) => {
                    debug!(%error, "undecodable project statistics dropped");
                    return;
                }
            };
            if !report.concerns(&id) {
                return;
            }
            latest_tx.send_replace(Some(ProjectProgress::from_report(report, &user, min_access)));
        });

        client.open_project_stats(project_id, &view_for_user(user_name));
        Self { project_id: project_id.to_owned(), latest }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn latest(&self) -> Option<ProjectProgress> {
        self.latest.borrow().clone()
    }

    /// Wait for the first report about this project.
    pub async fn wait(&self) -> Result<ProjectProgress, FlowError> {
        let mut latest = self.latest.clone();
        let progress = latest.wait_for(Option::is_some).await.map_err(|_| FlowError::Abandoned)?;
        progress.clone().ok_or(FlowError::Abandoned)
    }
}
