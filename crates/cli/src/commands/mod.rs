// CLI subcommand dispatch.

use clap::Subcommand;

use crate::session::GlobalArgs;

pub mod check;
pub mod config;
pub mod export;
pub mod images;
pub mod open;
pub mod project;
pub mod rate;
pub mod stats;

#[derive(Subcommand)]
pub enum Command {
    /// Start a session and report the connection state
    Check(check::CheckArgs),
    /// Open a document in your view and show its annotations
    Open(open::OpenArgs),
    /// Fill in rating form fields of a document
    Rate(rate::RateArgs),
    /// Open the primary document of a project
    Project(project::ProjectArgs),
    /// Page through the images attached to a document
    Images(images::ImagesArgs),
    /// Show your progress through a project
    Stats(stats::StatsArgs),
    /// Export a repository to a local file
    Export(export::ExportArgs),
    /// Show or edit the local configuration
    Config(config::ConfigArgs),
}

pub fn run(cmd: Command, global: &GlobalArgs) -> anyhow::Result<()> {
    match cmd {
        Command::Check(args) => check::run(args, global),
        Command::Open(args) => open::run(args, global),
        Command::Rate(args) => rate::run(args, global),
        Command::Project(args) => project::run(args, global),
        Command::Images(args) => images::run(args, global),
        Command::Stats(args) => stats::run(args, global),
        Command::Export(args) => export::run(args, global),
        Command::Config(args) => config::run(args, global),
    }
}
