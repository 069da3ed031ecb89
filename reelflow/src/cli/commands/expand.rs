//! `expand` command: dry-run expansion of a template into its task plan.

use crate::cli::args::{ExpandArgs, parse_params};
use crate::cli::commands::build_registry;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::expand::Expansion;
use crate::observability::events::EventEmitter;
use crate::orchestrator::Orchestrator;
use crate::store::MemoryStore;
use std::sync::Arc;

/// Expands the named template and prints the resulting plan. Nothing is
/// persisted.
///
/// # Errors
///
/// Surfaces the expansion taxonomy for invalid templates or parameters.
pub fn execute(args: &ExpandArgs) -> Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let registry = build_registry(&config)?;
    let params = parse_params(&args.params)?;

    let orchestrator = Orchestrator::new(
        Arc::new(MemoryStore::new()),
        registry,
        config,
        Arc::new(EventEmitter::noop()),
    );
    let expansion = orchestrator.preview(&args.template, &params)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&expansion.tasks)?);
    } else {
        print_plan(&expansion);
    }
    Ok(())
}

fn print_plan(expansion: &Expansion) {
    println!(
        "{} tasks from template '{}'",
        expansion.tasks.len(),
        expansion.scenario.template_name
    );
    println!(
        "{:<38} {:<15} {:<18} {:>7}  consumers",
        "id", "service", "name", "pending"
    );
    for task in &expansion.tasks {
        println!(
            "{:<38} {:<15} {:<18} {:>7}  {}",
            task.id,
            task.service,
            task.name,
            task.pending_count,
            task.consumers.join(", ")
        );
    }
}
