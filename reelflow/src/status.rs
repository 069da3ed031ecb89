//! Status controller
//!
//! Validated state-machine transitions applied inside store scripts. The
//! legality table lives on [`TaskStatus`]; this module is the only place
//! that writes the `status` and `updated_at` fields, so every transition
//! in the system goes through the same guard.

use chrono::{DateTime, Utc};
use reelflow_core::task::fields;
use reelflow_core::{OrchestrateError, TaskStatus};

use crate::store::{StoreTxn, keys};

/// Reads a task's current status inside a script.
///
/// # Errors
///
/// Returns [`OrchestrateError::UnknownTask`] when the task hash is absent
/// and a corrupt-record error when the stored status does not parse.
pub fn read_status(txn: &dyn StoreTxn, task_id: &str) -> Result<TaskStatus, OrchestrateError> {
    let key = keys::task(task_id);
    let raw = txn
        .hash_get(&key, fields::STATUS)
        .ok_or_else(|| OrchestrateError::UnknownTask {
            id: task_id.to_string(),
        })?;
    raw.parse().map_err(|message: String| {
        OrchestrateError::Store(reelflow_core::StoreError::CorruptRecord { key, message })
    })
}

/// Transitions a task to `to`, guarded by the state-machine table.
///
/// Writes `status` and `updated_at` and returns the prior status. The
/// caller supplies `now` so that every write in one script shares a
/// timestamp.
///
/// # Errors
///
/// Returns [`OrchestrateError::InvalidTransition`] when the observed
/// status does not admit `to`, leaving the record untouched.
pub fn transition(
    txn: &mut dyn StoreTxn,
    task_id: &str,
    to: TaskStatus,
    now: DateTime<Utc>,
) -> Result<TaskStatus, OrchestrateError> {
    let from = read_status(txn, task_id)?;
    if !from.can_transition_to(to) {
        return Err(OrchestrateError::InvalidTransition {
            id: task_id.to_string(),
            from,
            to,
        });
    }
    let key = keys::task(task_id);
    txn.hash_set(&key, fields::STATUS, to.as_str().to_string());
    txn.hash_set(&key, fields::UPDATED_AT, now.to_rfc3339());
    Ok(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ScriptValue, Store};
    use indexmap::IndexMap;

    async fn seed(store: &MemoryStore, id: &str, status: TaskStatus) {
        let key = keys::task(id);
        let mut raw = IndexMap::new();
        raw.insert(fields::STATUS.to_string(), status.as_str().to_string());
        raw.insert(
            fields::UPDATED_AT.to_string(),
            "2026-03-01T10:00:00+00:00".to_string(),
        );
        store
            .execute(Box::new(move |txn| {
                txn.hash_set_all(&key, raw);
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn legal_transition_updates_status_and_timestamp() {
        let store = MemoryStore::new();
        seed(&store, "t1", TaskStatus::Queued).await;

        store
            .execute(Box::new(|txn| {
                let prior = transition(txn, "t1", TaskStatus::Processing, Utc::now())?;
                assert_eq!(prior, TaskStatus::Queued);
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap();

        assert_eq!(
            store
                .hash_get("task:t1", fields::STATUS)
                .await
                .unwrap()
                .as_deref(),
            Some("PROCESSING")
        );
        let updated_at = store
            .hash_get("task:t1", fields::UPDATED_AT)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(updated_at, "2026-03-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_and_mutates_nothing() {
        let store = MemoryStore::new();
        seed(&store, "t1", TaskStatus::Success).await;

        let err = store
            .execute(Box::new(|txn| {
                transition(txn, "t1", TaskStatus::Processing, Utc::now())?;
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestrateError::InvalidTransition {
                from: TaskStatus::Success,
                to: TaskStatus::Processing,
                ..
            }
        ));
        assert_eq!(
            store
                .hash_get("task:t1", fields::STATUS)
                .await
                .unwrap()
                .as_deref(),
            Some("SUCCESS")
        );
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let store = MemoryStore::new();
        let err = store
            .execute(Box::new(|txn| {
                read_status(txn, "ghost")?;
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrateError::UnknownTask { .. }));
    }

    #[tokio::test]
    async fn corrupt_status_is_reported() {
        let store = MemoryStore::new();
        store
            .execute(Box::new(|txn| {
                txn.hash_set("task:t1", fields::STATUS, "LIMBO".to_string());
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap();

        let err = store
            .execute(Box::new(|txn| {
                read_status(txn, "t1")?;
                Ok(ScriptValue::Unit)
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrateError::Store(_)));
    }
}
