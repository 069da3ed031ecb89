//! Processing-lease janitor
//!
//! The core never times out `PROCESSING` tasks on its own: a worker that
//! crashes after claiming leaves its task processing forever. The janitor
//! periodically sweeps published scenarios and fails any task whose lease
//! (its `updated_at`) is older than the configured horizon, through the
//! ordinary fail path so the state machine still guards the transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reelflow_core::task::fields;
use reelflow_core::{OrchestrateError, TaskStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::store::{Store, keys};

/// Sweeps stale `PROCESSING` leases.
pub struct Janitor {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    events: Arc<EventEmitter>,
    horizon: Duration,
}

impl Janitor {
    /// Creates a janitor revoking leases older than `horizon`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Dispatcher,
        events: Arc<EventEmitter>,
        horizon: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            events,
            horizon,
        }
    }

    /// Runs one sweep over every published scenario. Returns the ids
    /// whose leases were revoked.
    ///
    /// A task that transitions concurrently (the worker came back and
    /// succeeded first) loses the race cleanly: the fail path rejects the
    /// transition and the sweep moves on.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn run_once(&self) -> Result<Vec<String>, OrchestrateError> {
        let now = Utc::now();
        let mut revoked = Vec::new();

        for scenario_id in self.store.list_range(keys::SCENARIOS).await? {
            for task_id in self
                .store
                .list_range(&keys::scenario_tasks(&scenario_id))
                .await?
            {
                let Some(age) = self.stale_age(&task_id, now).await? else {
                    continue;
                };
                let message = format!(
                    "processing lease expired after {}",
                    humantime::format_duration(self.horizon)
                );
                match self.dispatcher.fail(&task_id, &message).await {
                    Ok(_) => {
                        info!(task_id = %task_id, age_secs = age.as_secs(), "lease revoked");
                        metrics::record_lease_expired();
                        self.events.emit(Event::LeaseExpired {
                            timestamp: Utc::now(),
                            task_id: task_id.clone(),
                            age_secs: age.as_secs(),
                        });
                        revoked.push(task_id);
                    }
                    Err(OrchestrateError::InvalidTransition { .. }) => {
                        // the worker finished between our read and the fail
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(revoked)
    }

    /// Returns how long the task has been processing, if that exceeds the
    /// horizon.
    async fn stale_age(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, OrchestrateError> {
        let key = keys::task(task_id);
        let Some(status_raw) = self.store.hash_get(&key, fields::STATUS).await? else {
            return Ok(None);
        };
        if status_raw != TaskStatus::Processing.as_str() {
            return Ok(None);
        }
        let Some(updated_raw) = self.store.hash_get(&key, fields::UPDATED_AT).await? else {
            return Ok(None);
        };
        let Ok(updated) = DateTime::parse_from_rfc3339(&updated_raw) else {
            warn!(task_id, updated_at = %updated_raw, "unparseable lease timestamp");
            return Ok(None);
        };
        let age = now
            .signed_duration_since(updated.with_timezone(&Utc))
            .to_std()
            .unwrap_or_default();
        Ok((age >= self.horizon).then_some(age))
    }

    /// Spawns the periodic sweep loop. Cancelling the token stops it.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(err) = self.run_once().await {
                            warn!(error = %err, "janitor sweep failed");
                        }
                    }
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::orchestrator::Orchestrator;
    use crate::registry::TemplateRegistry;
    use crate::store::MemoryStore;
    use indexmap::IndexMap;

    fn harness(horizon: Duration) -> (Orchestrator, Janitor) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let events = Arc::new(EventEmitter::noop());
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            TemplateRegistry::with_builtins().unwrap(),
            OrchestratorConfig::default(),
            Arc::clone(&events),
        );
        let janitor = Janitor::new(
            Arc::clone(&store),
            Dispatcher::new(Arc::clone(&store), Arc::clone(&events), false),
            events,
            horizon,
        );
        (orchestrator, janitor)
    }

    #[tokio::test]
    async fn revokes_stale_processing_lease() {
        let (orchestrator, janitor) = harness(Duration::ZERO);
        let scenario_id = orchestrator
            .submit_scenario("narrated-post", &IndexMap::new())
            .await
            .unwrap();
        let claimed = orchestrator
            .claim_with_timeout("text-service", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        // worker crashes here; with a zero horizon the lease is already stale
        let revoked = janitor.run_once().await.unwrap();
        assert_eq!(revoked, vec![claimed.clone()]);

        let task = orchestrator.get_task(&claimed).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("lease expired"));

        let status = orchestrator.get_scenario(&scenario_id).await.unwrap();
        assert_eq!(status.progress.to_string(), "stuck");
    }

    #[tokio::test]
    async fn leaves_fresh_leases_alone() {
        let (orchestrator, janitor) = harness(Duration::from_secs(3600));
        orchestrator
            .submit_scenario("narrated-post", &IndexMap::new())
            .await
            .unwrap();
        let claimed = orchestrator
            .claim_with_timeout("text-service", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert!(janitor.run_once().await.unwrap().is_empty());
        let task = orchestrator.get_task(&claimed).await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn ignores_tasks_that_are_not_processing() {
        let (orchestrator, janitor) = harness(Duration::ZERO);
        orchestrator
            .submit_scenario("narrated-post", &IndexMap::new())
            .await
            .unwrap();

        // nothing claimed: one task queued, one pending
        assert!(janitor.run_once().await.unwrap().is_empty());
    }
}
