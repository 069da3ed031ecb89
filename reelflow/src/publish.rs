//! Graph publisher
//!
//! Persists an expansion in one atomic pass: every task hash, the scenario
//! record, the ordered member list, the global scenario index, and the
//! initial enqueues for tasks with no upstream dependencies. Readers
//! observe either the whole scenario or nothing.

use std::sync::Arc;

use chrono::Utc;
use reelflow_core::{OrchestrateError, TaskStatus};
use tracing::info;

use crate::expand::Expansion;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::status;
use crate::store::{ScriptValue, Store, keys};

/// Writes expansions to the store and seeds the service queues.
pub struct Publisher {
    store: Arc<dyn Store>,
    events: Arc<EventEmitter>,
}

impl Publisher {
    /// Creates a publisher over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, events: Arc<EventEmitter>) -> Self {
        Self { store, events }
    }

    /// Publishes `expansion` atomically and returns the ids enqueued
    /// immediately, in expansion order.
    ///
    /// # Errors
    ///
    /// Store failures abort the whole script: no partial scenario is ever
    /// visible.
    pub async fn publish(&self, expansion: &Expansion) -> Result<Vec<String>, OrchestrateError> {
        let scenario = expansion.scenario.clone();
        let tasks = expansion.tasks.clone();
        let scenario_id = scenario.scenario_id.clone();

        let outcome = self
            .store
            .execute(Box::new(move |txn| {
                let now = Utc::now();

                for task in &tasks {
                    txn.hash_set_all(&keys::task(&task.id), task.to_fields());
                }

                txn.hash_set_all(&keys::scenario(&scenario.scenario_id), scenario.to_fields());
                for id in &scenario.task_ids {
                    txn.list_push_back(&keys::scenario_tasks(&scenario.scenario_id), id.clone());
                }
                txn.list_push_back(keys::SCENARIOS, scenario.scenario_id.clone());

                let mut ready = Vec::new();
                for task in &tasks {
                    if task.pending_count == 0 {
                        status::transition(txn, &task.id, TaskStatus::Queued, now)?;
                        txn.list_push_back(&keys::queue(&task.service), task.id.clone());
                        ready.push(task.id.clone());
                    }
                }
                Ok(ScriptValue::Ids(ready))
            }))
            .await?;

        let ScriptValue::Ids(ready) = outcome else {
            unreachable!("publish script returns Ids");
        };

        let task_count = expansion.tasks.len();
        info!(
            scenario_id = %scenario_id,
            template = %expansion.scenario.template_name,
            tasks = task_count,
            ready = ready.len(),
            "scenario published"
        );
        metrics::record_scenario_published(&expansion.scenario.template_name, task_count);
        self.events.emit(Event::ScenarioPublished {
            timestamp: Utc::now(),
            scenario_id: scenario_id.clone(),
            template_name: expansion.scenario.template_name.clone(),
            task_count,
            initially_ready: ready.len(),
        });
        for id in &ready {
            let service = expansion
                .tasks
                .iter()
                .find(|t| &t.id == id)
                .map(|t| t.service.clone())
                .unwrap_or_default();
            metrics::record_enqueued(&service);
            metrics::record_transition(TaskStatus::Queued);
            self.events.emit(Event::TaskEnqueued {
                timestamp: Utc::now(),
                task_id: id.clone(),
                service,
            });
        }

        Ok(ready)
    }
}
