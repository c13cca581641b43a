// `annolab stats`: the user's progress through a project.

use annolab_client::flows::{ProjectProgress, ProjectStatsFlow};
use clap::Args;

use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Project id.
    pub project_id: String,

    /// Only count documents with at least this access level.
    #[arg(long, default_value_t = 0)]
    pub min_access: i64,
}

pub fn run(args: StatsArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let progress = session::block_on(stats(config, args, global))??;
    output::print_output(global.format(), &progress, format_human)?;
    Ok(())
}

async fn stats(
    config: annolab_client::ClientConfig,
    args: StatsArgs,
    global: &GlobalArgs,
) -> anyhow::Result<ProjectProgress> {
    let client = session::connect(config, global).await?;
    let user = session::user_name(&client)?;

    let flow = ProjectStatsFlow::start(&client, &args.project_id, &user, args.min_access);
    let progress = session::within(global.timeout(), "project statistics", flow.wait()).await??;

    client.disconnect();
    Ok(progress)
}

fn format_human(progress: &ProjectProgress) -> String {
    let done = progress
        .documents
        .iter()
        .filter(|doc| doc.mongoid.as_ref().is_some_and(|id| progress.completed.contains(id)))
        .count();
    let mut lines = vec![format!(
        "{done}/{} documents annotated ({:.0}%)",
        progress.documents.len(),
        progress.percent()
    )];
    for doc in &progress.documents {
        let finished = doc.mongoid.as_ref().is_some_and(|id| progress.completed.contains(id));
        let label = doc.name.clone().or_else(|| doc.mongoid.clone()).unwrap_or_else(|| "?".into());
        lines.push(format!("  [{}] {label}", if finished { "x" } else { " " }));
    }
    lines.join("\n")
}
