// annolab CLI entry point.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;
mod session;

use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "annolab", about = "Annotate documents on a text annotation service")]
struct Cli {
    #[command(flatten)]
    global: session::GlobalArgs,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::run(cli.command, &cli.global) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(cli.global.format(), &error);
            ExitCode::from_error(&error).into()
        }
    }
}
