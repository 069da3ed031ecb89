//! Command dispatch.

pub mod completions;
pub mod expand;
pub mod run;
pub mod template;

use crate::cli::args::{Cli, Commands};
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::registry::TemplateRegistry;

/// Executes the parsed command line.
///
/// # Errors
///
/// Propagates command failures for `main` to print and map to an exit
/// code.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Template(cmd) => template::execute(cmd.subcommand),
        Commands::Expand(args) => expand::execute(&args),
        Commands::Run(args) => run::execute(args).await,
        Commands::Completions(args) => {
            completions::execute(&args);
            Ok(())
        }
    }
}

/// Builds the template registry from built-ins plus the configured
/// library directory, if any.
pub(crate) fn build_registry(config: &OrchestratorConfig) -> Result<TemplateRegistry> {
    let mut registry = TemplateRegistry::with_builtins()?;
    if let Some(dir) = &config.template_dir {
        registry.load_dir(dir)?;
    }
    Ok(registry)
}
