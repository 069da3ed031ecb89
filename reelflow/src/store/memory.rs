//! In-process reference store
//!
//! A mutex-guarded keyspace with per-key wake-ups. Scripts run while the
//! keyspace lock is held, which makes every [`Store::execute`] call a
//! single linearization point for free. A failing script leaves the
//! keyspace untouched: execution works on the live keyspace but restores a
//! pre-script snapshot on error.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use reelflow_core::{OrchestrateError, StoreError};
use tokio::sync::Notify;

use super::{Script, ScriptValue, Store, StoreTxn};

// ============================================================================
// Keyspace
// ============================================================================

#[derive(Debug, Default, Clone)]
struct Keyspace {
    hashes: HashMap<String, IndexMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

/// Mutable view handed to scripts. Records which lists were pushed so the
/// store can fire wake-ups after the lock is released.
struct MemoryTxn<'a> {
    keyspace: &'a mut Keyspace,
    pushed: Vec<String>,
}

impl StoreTxn for MemoryTxn<'_> {
    fn hash_get(&self, key: &str, field: &str) -> Option<String> {
        self.keyspace.hashes.get(key)?.get(field).cloned()
    }

    fn hash_get_all(&self, key: &str) -> Option<IndexMap<String, String>> {
        self.keyspace.hashes.get(key).cloned()
    }

    fn hash_set(&mut self, key: &str, field: &str, value: String) {
        self.keyspace
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    fn hash_set_all(&mut self, key: &str, fields: IndexMap<String, String>) {
        self.keyspace
            .hashes
            .entry(key.to_string())
            .or_default()
            .extend(fields);
    }

    fn list_push_back(&mut self, key: &str, value: String) {
        self.keyspace
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value);
        if !self.pushed.contains(&key.to_string()) {
            self.pushed.push(key.to_string());
        }
    }

    fn list_pop_front(&mut self, key: &str) -> Option<String> {
        self.keyspace.lists.get_mut(key)?.pop_front()
    }

    fn list_len(&self, key: &str) -> usize {
        self.keyspace.lists.get(key).map_or(0, VecDeque::len)
    }

    fn list_range(&self, key: &str) -> Vec<String> {
        self.keyspace
            .lists
            .get(key)
            .map_or_else(Vec::new, |l| l.iter().cloned().collect())
    }

    fn exists(&self, key: &str) -> bool {
        self.keyspace.hashes.contains_key(key) || self.keyspace.lists.contains_key(key)
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-process [`Store`] backend, selected by `STORE_URL=memory://`.
///
/// Suitable for single-process deployments, the demo worker pool, and
/// tests. Cloning the handle shares the underlying keyspace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    wakeups: DashMap<String, Arc<Notify>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn wakeup(&self, key: &str) -> Arc<Notify> {
        self.wakeups
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Keyspace>, StoreError> {
        self.keyspace
            .lock()
            .map_err(|_| StoreError::Unavailable("keyspace lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, script: Script) -> Result<ScriptValue, OrchestrateError> {
        let (value, pushed) = {
            let mut keyspace = self.lock()?;
            let snapshot = keyspace.clone();
            let mut txn = MemoryTxn {
                keyspace: &mut keyspace,
                pushed: Vec::new(),
            };
            match script(&mut txn) {
                Ok(value) => (value, txn.pushed),
                Err(err) => {
                    *keyspace = snapshot;
                    return Err(err);
                }
            }
        };
        for key in pushed {
            // notify_one leaves a permit behind when nobody is waiting, so
            // a waiter arriving after the push still wakes immediately.
            self.wakeup(&key).notify_one();
        }
        Ok(value)
    }

    async fn hash_get_all(
        &self,
        key: &str,
    ) -> Result<Option<IndexMap<String, String>>, StoreError> {
        Ok(self.lock()?.hashes.get(key).cloned())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .lists
            .get(key)
            .map_or_else(Vec::new, |l| l.iter().cloned().collect()))
    }

    async fn wait_for_push(&self, key: &str, timeout: Duration) -> Result<bool, StoreError> {
        let notify = self.wakeup(key);
        Ok(tokio::time::timeout(timeout, notify.notified())
            .await
            .is_ok())
    }
}

// ============================================================================
// Tests
// ============================================================================
