//! Reelflow CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use reelflow::cli::args::Cli;
use reelflow::cli::commands;
use reelflow::observability::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbosity = if cli.quiet { 0 } else { cli.verbose };
    logging::init_logging(cli.log_format, verbosity);

    match commands::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
