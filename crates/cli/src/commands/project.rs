// `annolab project`: open the primary document of a project.

use annolab_client::flows::ProjectFlow;
use clap::Args;
use serde::Serialize;

use super::open::{self, DocumentSummary};
use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Project id.
    pub project_id: String,

    /// Tool to open once the view is bound (default from config).
    #[arg(long)]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResult {
    pub project_id: String,
    pub document: DocumentSummary,
}

pub fn run(args: ProjectArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let result = session::block_on(open_project(config, args, global))??;
    output::print_output(global.format(), &result, |r| {
        format!("Project {}\n{}", r.project_id, open::format_human(&r.document))
    })?;
    Ok(())
}

async fn open_project(
    config: annolab_client::ClientConfig,
    args: ProjectArgs,
    global: &GlobalArgs,
) -> anyhow::Result<ProjectResult> {
    let tool = args.tool.unwrap_or_else(|| config.tools.default_tool.clone());
    let client = session::connect(config, global).await?;
    let user = session::user_name(&client)?;

    let flow = ProjectFlow::start(&client, &args.project_id, &user, &tool);
    let doc = session::within(global.timeout(), "the project document", flow.wait_ready()).await??;
    let document = doc.read(DocumentSummary::from_document);

    flow.stop();
    client.disconnect();
    Ok(ProjectResult { project_id: args.project_id, document })
}
