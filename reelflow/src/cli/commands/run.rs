//! `run` command: submit a scenario and drive it with simulated workers.

use std::sync::Arc;

use tracing::info;

use crate::cli::args::{RunArgs, parse_params};
use crate::cli::commands::build_registry;
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::observability::events::EventEmitter;
use crate::orchestrator::Orchestrator;
use crate::query::Progress;
use crate::store;
use crate::workers::WorkerPool;

/// Submits the named template and runs the demonstration worker pool
/// until the scenario completes or gets stuck.
///
/// # Errors
///
/// Surfaces expansion and store failures; a stuck scenario is reported
/// but is not an error of the run itself.
pub async fn execute(args: RunArgs) -> Result<()> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    let registry = build_registry(&config)?;
    let params = parse_params(&args.params)?;

    let store = store::connect(&config.store_url)?;
    let events = Arc::new(EventEmitter::stderr());
    let output_dir = config.output_dir.clone();
    let orchestrator = Arc::new(Orchestrator::new(store, registry, config, events));

    let scenario_id = orchestrator.submit_scenario(&args.template, &params).await?;
    info!(scenario_id = %scenario_id, template = %args.template, "scenario submitted");

    let pool = WorkerPool::new(Arc::clone(&orchestrator), output_dir);
    let status = pool.run_to_completion(&scenario_id).await?;

    println!("scenario {scenario_id}: {}", status.progress);
    println!(
        "  success {}  failed {}  pending {}",
        status.counts.success, status.counts.failed, status.counts.pending
    );
    if status.progress != Progress::Complete {
        for task_id in &status.scenario.task_ids {
            let task = orchestrator.get_task(task_id).await?;
            if let Some(error) = task.error {
                println!("  {task_id} ({}) failed: {error}", task.name);
            }
        }
    }
    Ok(())
}
