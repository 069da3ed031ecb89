//! Read-side query API
//!
//! Task, scenario, and queue lookups. These reads are not linearised
//! against in-flight transitions; a slightly stale view is acceptable and
//! expected.

use std::sync::Arc;

use reelflow_core::{OrchestrateError, Scenario, Task, TaskStatus};
use serde::Serialize;

use crate::observability::metrics;
use crate::store::{Store, keys};

/// Read-only lookups over the shared store.
pub struct Queries {
    store: Arc<dyn Store>,
}

/// Per-status task tallies for one scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Tasks waiting on upstream dependencies.
    pub pending: usize,
    /// Tasks on a service queue.
    pub queued: usize,
    /// Tasks claimed by workers.
    pub processing: usize,
    /// Tasks completed successfully.
    pub success: usize,
    /// Tasks that failed.
    pub failed: usize,
}

impl StatusCounts {
    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Queued => self.queued += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Success => self.success += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    /// Total tasks observed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.queued + self.processing + self.success + self.failed
    }
}

/// Coarse scenario progress classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    /// Work is queued, processing, or still unblocked.
    Running,
    /// Every task reached `SUCCESS`.
    Complete,
    /// A failure left the remaining tasks unreachable.
    Stuck,
}

impl Progress {
    /// Classifies a scenario from its status tallies.
    #[must_use]
    pub const fn classify(counts: StatusCounts) -> Self {
        if counts.success == counts.total() {
            Self::Complete
        } else if counts.queued > 0 || counts.processing > 0 {
            Self::Running
        } else if counts.failed > 0 {
            Self::Stuck
        } else {
            Self::Running
        }
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Complete => f.write_str("complete"),
            Self::Stuck => f.write_str("stuck"),
        }
    }
}

/// A scenario record with its summarised task tallies.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStatus {
    /// The scenario record.
    pub scenario: Scenario,
    /// Per-status counts over member tasks.
    pub counts: StatusCounts,
    /// Coarse progress classification.
    pub progress: Progress,
}

impl Queries {
    /// Creates a query handle over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Fetches the full task record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrateError::UnknownTask`] when no record exists.
    pub async fn get_task(&self, id: &str) -> Result<Task, OrchestrateError> {
        let key = keys::task(id);
        let raw = self
            .store
            .hash_get_all(&key)
            .await?
            .ok_or_else(|| OrchestrateError::UnknownTask { id: id.to_string() })?;
        Ok(Task::from_fields(&key, &raw)?)
    }

    /// Fetches the scenario record plus per-status counts and progress.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrateError::UnknownScenario`] when no record
    /// exists.
    pub async fn get_scenario(&self, id: &str) -> Result<ScenarioStatus, OrchestrateError> {
        let key = keys::scenario(id);
        let raw = self
            .store
            .hash_get_all(&key)
            .await?
            .ok_or_else(|| OrchestrateError::UnknownScenario { id: id.to_string() })?;
        let scenario = Scenario::from_fields(&key, &raw)?;

        let mut counts = StatusCounts::default();
        for task_id in &scenario.task_ids {
            let task_key = keys::task(task_id);
            let status_raw = self
                .store
                .hash_get(&task_key, reelflow_core::task::fields::STATUS)
                .await?
                .ok_or_else(|| OrchestrateError::UnknownTask {
                    id: task_id.clone(),
                })?;
            let status: TaskStatus = status_raw.parse().map_err(|message: String| {
                reelflow_core::StoreError::CorruptRecord {
                    key: task_key,
                    message,
                }
            })?;
            counts.record(status);
        }

        Ok(ScenarioStatus {
            scenario,
            progress: Progress::classify(counts),
            counts,
        })
    }

    /// Current length of `queue:{service}`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn queue_depth(&self, service: &str) -> Result<usize, OrchestrateError> {
        let depth = self.store.list_len(&keys::queue(service)).await?;
        metrics::record_queue_depth(service, depth);
        Ok(depth)
    }

    /// All published scenario ids, in submission order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_scenarios(&self) -> Result<Vec<String>, OrchestrateError> {
        Ok(self.store.list_range(keys::SCENARIOS).await?)
    }
}

// ============================================================================
// Tests
// ============================================================================
