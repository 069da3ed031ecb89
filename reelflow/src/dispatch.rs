//! Dispatcher / consumer router
//!
//! The worker-facing protocol: `claim` pops the next ready task off a
//! service queue and marks it `PROCESSING`; `succeed` runs the fan-out
//! cascade that decrements consumer pending counts and enqueues the ones
//! that reach zero; `fail` records a failure without touching downstream
//! tasks (unless cascade-fail is configured).
//!
//! Every mutation here is one store script, so sibling `succeed` calls
//! racing toward a shared consumer cannot lose the wake-up: the decrement
//! and the conditional enqueue commit together.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reelflow_core::task::fields;
use reelflow_core::{OrchestrateError, StoreError, Task, TaskStatus};
use tracing::{debug, warn};

use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::status;
use crate::store::{ScriptValue, Store, StoreTxn, keys};

/// Worker-facing dispatch operations over the shared store.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    events: Arc<EventEmitter>,
    cascade_fail: bool,
}

impl Dispatcher {
    /// Creates a dispatcher. `cascade_fail` enables transitive failure of
    /// downstream `PENDING` tasks when an upstream task fails; the default
    /// policy leaves them pending.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, events: Arc<EventEmitter>, cascade_fail: bool) -> Self {
        Self {
            store,
            events,
            cascade_fail,
        }
    }

    /// Claims the next task from `queue:{service}`, transitioning it
    /// `QUEUED -> PROCESSING` atomically with the pop.
    ///
    /// Long-polls until a task arrives or `timeout` elapses; returns
    /// `None` on timeout. Stale queue entries whose task is no longer
    /// `QUEUED` are dropped and the pop continues.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the queue and all task records are left
    /// unchanged on error.
    pub async fn claim(
        &self,
        service: &str,
        timeout: Duration,
    ) -> Result<Option<String>, OrchestrateError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let service_owned = service.to_string();
            let outcome = self
                .store
                .execute(Box::new(move |txn| claim_script(txn, &service_owned)))
                .await?;

            if let ScriptValue::MaybeId(Some(id)) = outcome {
                debug!(task_id = %id, service, "task claimed");
                metrics::record_transition(TaskStatus::Processing);
                self.events.emit(Event::TaskClaimed {
                    timestamp: Utc::now(),
                    task_id: id.clone(),
                    service: service.to_string(),
                });
                return Ok(Some(id));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.store
                .wait_for_push(&keys::queue(service), remaining)
                .await?;
        }
    }

    /// Marks `task_id` as `SUCCESS` and runs consumer fan-out: every
    /// consumer still `PENDING` has its pending count decremented, and
    /// those reaching zero are enqueued on their service queues in stored
    /// consumer order.
    ///
    /// Returns the ids that became ready.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the task is not `PROCESSING` (repeats are
    /// rejected here, which is what makes worker-side retry safe);
    /// `UnknownTask` when the id does not exist. Either way nothing is
    /// mutated.
    pub async fn succeed(
        &self,
        task_id: &str,
        result_ref: &str,
    ) -> Result<Vec<String>, OrchestrateError> {
        let id_owned = task_id.to_string();
        let result_owned = result_ref.to_string();
        let outcome = self
            .store
            .execute(Box::new(move |txn| {
                succeed_script(txn, &id_owned, &result_owned)
            }))
            .await?;

        let ScriptValue::Ids(ready) = outcome else {
            unreachable!("succeed script returns Ids");
        };

        metrics::record_transition(TaskStatus::Success);
        self.events.emit(Event::TaskSucceeded {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            newly_ready: ready.clone(),
        });
        for id in &ready {
            let service = self
                .store
                .hash_get(&keys::task(id), fields::SERVICE)
                .await?
                .unwrap_or_default();
            metrics::record_transition(TaskStatus::Queued);
            metrics::record_enqueued(&service);
            self.events.emit(Event::TaskEnqueued {
                timestamp: Utc::now(),
                task_id: id.clone(),
                service,
            });
        }

        Ok(ready)
    }

    /// Marks `task_id` as `FAILED` with `error`.
    ///
    /// Downstream tasks are left `PENDING` by default; with cascade-fail
    /// configured, every transitively dependent `PENDING` task is failed
    /// in the same script. Returns the cascaded ids (empty without
    /// cascade).
    ///
    /// # Errors
    ///
    /// Same contract as [`Dispatcher::succeed`].
    pub async fn fail(
        &self,
        task_id: &str,
        error: &str,
    ) -> Result<Vec<String>, OrchestrateError> {
        let id_owned = task_id.to_string();
        let error_owned = error.to_string();
        let cascade = self.cascade_fail;
        let outcome = self
            .store
            .execute(Box::new(move |txn| {
                fail_script(txn, &id_owned, &error_owned, cascade)
            }))
            .await?;

        let ScriptValue::Ids(cascaded) = outcome else {
            unreachable!("fail script returns Ids");
        };

        warn!(task_id, error, cascaded = cascaded.len(), "task failed");
        metrics::record_transition(TaskStatus::Failed);
        self.events.emit(Event::TaskFailed {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            error: error.to_string(),
            cascaded: cascaded.clone(),
        });

        Ok(cascaded)
    }
}

// ============================================================================
// Scripts
// ============================================================================

fn claim_script(
    txn: &mut dyn StoreTxn,
    service: &str,
) -> Result<ScriptValue, OrchestrateError> {
    let now = Utc::now();
    let queue_key = keys::queue(service);
    while let Some(id) = txn.list_pop_front(&queue_key) {
        match status::read_status(txn, &id) {
            Ok(TaskStatus::Queued) => {
                status::transition(txn, &id, TaskStatus::Processing, now)?;
                return Ok(ScriptValue::MaybeId(Some(id)));
            }
            Ok(stale) => {
                // late artefact of a crashed re-enqueue; drop and keep popping
                warn!(task_id = %id, status = %stale, "dropping stale queue entry");
            }
            Err(OrchestrateError::UnknownTask { .. }) => {
                warn!(task_id = %id, "dropping queue entry for unknown task");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(ScriptValue::MaybeId(None))
}

fn succeed_script(
    txn: &mut dyn StoreTxn,
    task_id: &str,
    result_ref: &str,
) -> Result<ScriptValue, OrchestrateError> {
    let now = Utc::now();
    let task = read_task(txn, task_id)?;
    status::transition(txn, task_id, TaskStatus::Success, now)?;
    txn.hash_set(
        &keys::task(task_id),
        fields::RESULT_REF,
        result_ref.to_string(),
    );

    let mut ready = Vec::new();
    for consumer in &task.consumers {
        if status::read_status(txn, consumer)? != TaskStatus::Pending {
            // frozen by cascade-fail or janitor interference; counters of
            // terminal records are never touched
            continue;
        }
        let consumer_key = keys::task(consumer);
        let pending: u32 = read_u32(txn, &consumer_key, fields::PENDING_COUNT)?;
        let decremented = pending.saturating_sub(1);
        txn.hash_set(
            &consumer_key,
            fields::PENDING_COUNT,
            decremented.to_string(),
        );
        if decremented == 0 {
            status::transition(txn, consumer, TaskStatus::Queued, now)?;
            let service = read_field(txn, &consumer_key, fields::SERVICE)?;
            txn.list_push_back(&keys::queue(&service), consumer.clone());
            ready.push(consumer.clone());
        }
    }
    Ok(ScriptValue::Ids(ready))
}

fn fail_script(
    txn: &mut dyn StoreTxn,
    task_id: &str,
    error: &str,
    cascade: bool,
) -> Result<ScriptValue, OrchestrateError> {
    let now = Utc::now();
    let task = read_task(txn, task_id)?;
    status::transition(txn, task_id, TaskStatus::Failed, now)?;
    txn.hash_set(&keys::task(task_id), fields::ERROR, error.to_string());

    let mut cascaded = Vec::new();
    if cascade {
        let mut frontier: Vec<String> = task.consumers.clone();
        while let Some(consumer) = frontier.pop() {
            if status::read_status(txn, &consumer)? != TaskStatus::Pending {
                continue;
            }
            let consumer_key = keys::task(&consumer);
            // administrative transition outside the worker state machine:
            // PENDING tasks cannot fail through the public table
            txn.hash_set(
                &consumer_key,
                fields::STATUS,
                TaskStatus::Failed.as_str().to_string(),
            );
            txn.hash_set(
                &consumer_key,
                fields::ERROR,
                format!("upstream task '{task_id}' failed"),
            );
            txn.hash_set(&consumer_key, fields::UPDATED_AT, now.to_rfc3339());
            let downstream = read_task(txn, &consumer)?.consumers;
            frontier.extend(downstream);
            cascaded.push(consumer);
        }
    }
    Ok(ScriptValue::Ids(cascaded))
}

// ============================================================================
// Script helpers
// ============================================================================

fn read_task(txn: &dyn StoreTxn, task_id: &str) -> Result<Task, OrchestrateError> {
    let key = keys::task(task_id);
    let raw = txn
        .hash_get_all(&key)
        .ok_or_else(|| OrchestrateError::UnknownTask {
            id: task_id.to_string(),
        })?;
    Ok(Task::from_fields(&key, &raw)?)
}

fn read_field(
    txn: &dyn StoreTxn,
    key: &str,
    field: &str,
) -> Result<String, OrchestrateError> {
    txn.hash_get(key, field).ok_or_else(|| {
        OrchestrateError::Store(StoreError::CorruptRecord {
            key: key.to_string(),
            message: format!("missing field '{field}'"),
        })
    })
}

fn read_u32(txn: &dyn StoreTxn, key: &str, field: &str) -> Result<u32, OrchestrateError> {
    read_field(txn, key, field)?.parse().map_err(|e| {
        OrchestrateError::Store(StoreError::CorruptRecord {
            key: key.to_string(),
            message: format!("field '{field}': {e}"),
        })
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{self, Expansion};
    use crate::publish::Publisher;
    use crate::store::MemoryStore;
    use indexmap::IndexMap;
    use reelflow_core::TemplateDoc;

    const CHAIN_OF_THREE: &str = r#"
name: chain-of-three
tasks:
  - id: "{{ UUID('text') }}"
    service: text-service
    name: CreateText
  - id: "{{ UUID('voice') }}"
    service: voice-service
    name: CreateVoice
    inputs:
      text_task_id: "{{ UUID('text') }}"
  - id: "{{ UUID('video') }}"
    service: video-service
    name: CreateVideo
    inputs:
      voice_track_id: "{{ UUID('voice') }}"
"#;

    fn services() -> Vec<String> {
        ["text-service", "voice-service", "image-service", "video-service"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    struct Fixture {
        store: Arc<dyn Store>,
        dispatcher: Dispatcher,
        expansion: Expansion,
    }

    async fn fixture(yaml: &str, scenario_id: &str, cascade: bool) -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let events = Arc::new(EventEmitter::noop());
        let doc = TemplateDoc::from_yaml(yaml).unwrap();
        let expansion =
            expand::expand(&doc, &IndexMap::new(), scenario_id, &services(), Utc::now())
                .unwrap();
        Publisher::new(Arc::clone(&store), Arc::clone(&events))
            .publish(&expansion)
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&store), events, cascade);
        Fixture {
            store,
            dispatcher,
            expansion,
        }
    }

    async fn status_of(store: &Arc<dyn Store>, id: &str) -> TaskStatus {
        store
            .hash_get(&keys::task(id), fields::STATUS)
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn claim_transitions_to_processing() {
        let f = fixture(CHAIN_OF_THREE, "sc-claim", false).await;
        let text_id = f.expansion.tasks[0].id.clone();

        let claimed = f
            .dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(claimed.as_deref(), Some(text_id.as_str()));
        assert_eq!(status_of(&f.store, &text_id).await, TaskStatus::Processing);
        assert_eq!(f.store.list_len("queue:text-service").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_times_out_on_empty_queue() {
        let f = fixture(CHAIN_OF_THREE, "sc-empty", false).await;
        let claimed = f
            .dispatcher
            .claim("image-service", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(claimed, None);
    }

    #[tokio::test]
    async fn succeed_decrements_and_enqueues_consumer() {
        let f = fixture(CHAIN_OF_THREE, "sc-chain", false).await;
        let text_id = f.expansion.tasks[0].id.clone();
        let voice_id = f.expansion.tasks[1].id.clone();

        f.dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        let ready = f
            .dispatcher
            .succeed(&text_id, "out/text/a.txt")
            .await
            .unwrap();

        assert_eq!(ready, vec![voice_id.clone()]);
        assert_eq!(status_of(&f.store, &text_id).await, TaskStatus::Success);
        assert_eq!(status_of(&f.store, &voice_id).await, TaskStatus::Queued);
        assert_eq!(
            f.store
                .hash_get(&keys::task(&voice_id), fields::PENDING_COUNT)
                .await
                .unwrap()
                .as_deref(),
            Some("0")
        );
        assert_eq!(
            f.store.list_range("queue:voice-service").await.unwrap(),
            vec![voice_id]
        );
        assert_eq!(
            f.store
                .hash_get(&keys::task(&text_id), fields::RESULT_REF)
                .await
                .unwrap()
                .as_deref(),
            Some("out/text/a.txt")
        );
    }

    #[tokio::test]
    async fn succeed_twice_is_rejected_without_refanout() {
        let f = fixture(CHAIN_OF_THREE, "sc-twice", false).await;
        let text_id = f.expansion.tasks[0].id.clone();

        f.dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        f.dispatcher.succeed(&text_id, "out/a").await.unwrap();
        let err = f.dispatcher.succeed(&text_id, "out/b").await.unwrap_err();

        assert!(matches!(
            err,
            OrchestrateError::InvalidTransition {
                from: TaskStatus::Success,
                ..
            }
        ));
        // fan-out did not run twice
        assert_eq!(f.store.list_len("queue:voice-service").await.unwrap(), 1);
        // the original result_ref is untouched
        assert_eq!(
            f.store
                .hash_get(&keys::task(&text_id), fields::RESULT_REF)
                .await
                .unwrap()
                .as_deref(),
            Some("out/a")
        );
    }

    #[tokio::test]
    async fn succeed_without_claim_is_rejected() {
        let f = fixture(CHAIN_OF_THREE, "sc-unclaimed", false).await;
        let text_id = f.expansion.tasks[0].id.clone();
        let err = f.dispatcher.succeed(&text_id, "out/a").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrateError::InvalidTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Success,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn succeed_unknown_task_is_rejected() {
        let f = fixture(CHAIN_OF_THREE, "sc-ghost", false).await;
        let err = f.dispatcher.succeed("ghost", "out/a").await.unwrap_err();
        assert!(matches!(err, OrchestrateError::UnknownTask { .. }));
    }

    #[tokio::test]
    async fn failure_does_not_cascade_by_default() {
        let f = fixture(CHAIN_OF_THREE, "sc-stuck", false).await;
        let text_id = f.expansion.tasks[0].id.clone();
        let voice_id = f.expansion.tasks[1].id.clone();
        let video_id = f.expansion.tasks[2].id.clone();

        f.dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        f.dispatcher.succeed(&text_id, "out/a").await.unwrap();
        f.dispatcher
            .claim("voice-service", Duration::from_millis(10))
            .await
            .unwrap();
        let cascaded = f
            .dispatcher
            .fail(&voice_id, "voice synthesis failed")
            .await
            .unwrap();

        assert!(cascaded.is_empty());
        assert_eq!(status_of(&f.store, &voice_id).await, TaskStatus::Failed);
        assert_eq!(status_of(&f.store, &video_id).await, TaskStatus::Pending);
        assert_eq!(
            f.store
                .hash_get(&keys::task(&video_id), fields::PENDING_COUNT)
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
        assert_eq!(f.store.list_len("queue:video-service").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cascade_fail_fails_transitive_pending_downstream() {
        let f = fixture(CHAIN_OF_THREE, "sc-cascade", true).await;
        let text_id = f.expansion.tasks[0].id.clone();
        let voice_id = f.expansion.tasks[1].id.clone();
        let video_id = f.expansion.tasks[2].id.clone();

        f.dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        let cascaded = f.dispatcher.fail(&text_id, "model overloaded").await.unwrap();

        assert_eq!(cascaded.len(), 2);
        assert!(cascaded.contains(&voice_id));
        assert!(cascaded.contains(&video_id));
        assert_eq!(status_of(&f.store, &voice_id).await, TaskStatus::Failed);
        assert_eq!(status_of(&f.store, &video_id).await, TaskStatus::Failed);
        let error = f
            .store
            .hash_get(&keys::task(&voice_id), fields::ERROR)
            .await
            .unwrap()
            .unwrap();
        assert!(error.contains(&text_id));
    }

    #[tokio::test]
    async fn claim_drops_stale_queue_entries() {
        let f = fixture(CHAIN_OF_THREE, "sc-stale", false).await;
        let text_id = f.expansion.tasks[0].id.clone();

        // forge a duplicate queue entry, as a crashed re-enqueue would
        let forged = text_id.clone();
        f.store
            .execute(Box::new(move |txn| {
                txn.list_push_back("queue:text-service", forged);
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap();

        let first = f
            .dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some(text_id.as_str()));

        // the duplicate refers to a PROCESSING task now; it must be dropped
        let second = f
            .dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(second, None);
        assert_eq!(f.store.list_len("queue:text-service").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_wakes_on_concurrent_enqueue() {
        let f = fixture(CHAIN_OF_THREE, "sc-wake", false).await;
        let text_id = f.expansion.tasks[0].id.clone();
        let voice_id = f.expansion.tasks[1].id.clone();

        f.dispatcher
            .claim("text-service", Duration::from_millis(10))
            .await
            .unwrap();

        let store = Arc::clone(&f.store);
        let events = Arc::new(EventEmitter::noop());
        let waiter = tokio::spawn(async move {
            Dispatcher::new(store, events, false)
                .claim("voice-service", Duration::from_secs(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.dispatcher.succeed(&text_id, "out/a").await.unwrap();

        let claimed = waiter.await.unwrap();
        assert_eq!(claimed.as_deref(), Some(voice_id.as_str()));
    }
}
