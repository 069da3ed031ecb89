//! Demonstration worker pool
//!
//! One simulated worker per configured service, driving a published
//! scenario to a terminal state: claim, write a placeholder artefact under
//! the output directory, report success with the artefact path as the
//! result locator. Real workers live outside this crate; this pool exists
//! so `reelflow run` can show the whole pipeline end to end.
//!
//! Workers are idempotent by task id: re-executing a task rewrites the
//! same artefact path and produces the same result locator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::query::{Progress, ScenarioStatus};

/// How long an idle worker waits on its queue before re-checking for
/// cancellation.
const CLAIM_POLL: Duration = Duration::from_millis(100);

/// How often the supervisor re-reads scenario progress.
const PROGRESS_POLL: Duration = Duration::from_millis(50);

/// Simulated per-service workers over one orchestrator.
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    output_dir: PathBuf,
}

impl WorkerPool {
    /// Creates a pool writing artefacts under `output_dir`.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, output_dir: PathBuf) -> Self {
        Self {
            orchestrator,
            output_dir,
        }
    }

    /// Runs workers until `scenario_id` reaches a terminal progress state
    /// (complete or stuck), then stops them and returns the final status.
    ///
    /// # Errors
    ///
    /// Propagates scenario lookup failures; individual task failures do
    /// not abort the pool (they surface in the final status).
    pub async fn run_to_completion(&self, scenario_id: &str) -> Result<ScenarioStatus> {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for service in &self.orchestrator.config().service_names {
            handles.push(tokio::spawn(worker_loop(
                Arc::clone(&self.orchestrator),
                service.clone(),
                self.output_dir.clone(),
                cancel.clone(),
            )));
        }

        let outcome = loop {
            match self.orchestrator.get_scenario(scenario_id).await {
                Ok(status) if status.progress == Progress::Running => {
                    tokio::time::sleep(PROGRESS_POLL).await;
                }
                Ok(status) => break Ok(status),
                Err(err) => break Err(err.into()),
            }
        };

        cancel.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        outcome
    }
}

async fn worker_loop(
    orchestrator: Arc<Orchestrator>,
    service: String,
    output_dir: PathBuf,
    cancel: CancellationToken,
) {
    loop {
        let claimed = tokio::select! {
            () = cancel.cancelled() => break,
            claimed = orchestrator.claim_with_timeout(&service, CLAIM_POLL) => claimed,
        };
        match claimed {
            Ok(Some(task_id)) => {
                if let Err(err) = execute(&orchestrator, &service, &task_id, &output_dir).await {
                    warn!(task_id = %task_id, error = %err, "worker execution failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(service = %service, error = %err, "claim failed");
                tokio::time::sleep(CLAIM_POLL).await;
            }
        }
    }
}

/// Executes one claimed task: writes the artefact, then reports the
/// outcome. An artefact write failure is reported through `fail` so the
/// scenario records it.
async fn execute(
    orchestrator: &Orchestrator,
    service: &str,
    task_id: &str,
    output_dir: &Path,
) -> Result<()> {
    let task = orchestrator.get_task(task_id).await?;

    let dir = output_dir.join(service);
    let path = dir.join(format!("{task_id}.txt"));
    let mut body = format!("{}\n", task.name);
    if let Some(prompt) = &task.prompt {
        body.push_str(prompt);
        body.push('\n');
    }
    if !task.params.is_null() {
        body.push_str(&task.params.to_string());
        body.push('\n');
    }

    let write_result = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, body.as_bytes()).await
    }
    .await;

    match write_result {
        Ok(()) => {
            debug!(task_id, artefact = %path.display(), "task complete");
            orchestrator
                .succeed(task_id, &path.display().to_string())
                .await?;
        }
        Err(err) => {
            orchestrator
                .fail(task_id, &format!("artefact write failed: {err}"))
                .await?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
