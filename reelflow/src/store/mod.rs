//! Shared key-value store abstraction
//!
//! The orchestrator keeps all state in a networked in-memory KV system with
//! per-key hash maps, ordered lists, and atomic compound operations. The
//! [`Store`] trait captures exactly the guarantees the higher layers
//! consume: plain reads may be stale, but every [`Store::execute`] call runs
//! its script as a single linearization point. Backends with server-side
//! scripting map `execute` onto it directly; backends without it must
//! provide an equivalent optimistic-transaction retry loop that re-runs the
//! script closure.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reelflow_core::{OrchestrateError, StoreError};

pub use memory::MemoryStore;

// ============================================================================
// Key namespaces
// ============================================================================

/// Store key builders. Every key the orchestrator touches is built here.
pub mod keys {
    /// Global list of all published scenario ids, in submission order.
    pub const SCENARIOS: &str = "scenarios";

    /// Hash holding a task record.
    #[must_use]
    pub fn task(id: &str) -> String {
        format!("task:{id}")
    }

    /// Hash holding a scenario record.
    #[must_use]
    pub fn scenario(id: &str) -> String {
        format!("scenario:{id}")
    }

    /// List mirroring a scenario's ordered member task ids.
    #[must_use]
    pub fn scenario_tasks(id: &str) -> String {
        format!("scenario:{id}:tasks")
    }

    /// Per-service queue of ready task ids.
    #[must_use]
    pub fn queue(service: &str) -> String {
        format!("queue:{service}")
    }
}

// ============================================================================
// Transactional view
// ============================================================================

/// Synchronous view of the keyspace presented to a script while it holds
/// the linearization point.
///
/// Scripts observe and mutate through this trait only; a mutation is
/// visible to other callers exactly when the whole script commits.
pub trait StoreTxn {
    /// Reads one hash field.
    fn hash_get(&self, key: &str, field: &str) -> Option<String>;

    /// Reads a whole hash, preserving field insertion order.
    fn hash_get_all(&self, key: &str) -> Option<IndexMap<String, String>>;

    /// Writes one hash field, creating the hash if absent.
    fn hash_set(&mut self, key: &str, field: &str, value: String);

    /// Writes many hash fields at once.
    fn hash_set_all(&mut self, key: &str, fields: IndexMap<String, String>);

    /// Appends to the tail of a list, creating it if absent.
    fn list_push_back(&mut self, key: &str, value: String);

    /// Pops from the head of a list. Empty and absent lists both yield
    /// `None`.
    fn list_pop_front(&mut self, key: &str) -> Option<String>;

    /// Current list length (0 for absent).
    fn list_len(&self, key: &str) -> usize;

    /// Snapshot of a list's contents, head first.
    fn list_range(&self, key: &str) -> Vec<String>;

    /// Whether any record exists under `key`.
    fn exists(&self, key: &str) -> bool;
}

// ============================================================================
// Scripts
// ============================================================================

/// Output of a store script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    /// No output.
    Unit,
    /// An optional task id (claim).
    MaybeId(Option<String>),
    /// A list of task ids (fan-out, cascade, publication).
    Ids(Vec<String>),
}

/// A compound mutation executed atomically against the keyspace.
///
/// The closure runs exactly once per successful execution. Returning an
/// error aborts the script: none of its writes become visible.
pub type Script =
    Box<dyn FnOnce(&mut dyn StoreTxn) -> Result<ScriptValue, OrchestrateError> + Send>;

// ============================================================================
// Store trait
// ============================================================================

/// Handle to the shared store.
///
/// Plain reads (`hash_get*`, `list_*`) need not be linearised against
/// concurrent scripts; a slightly stale view is acceptable for the read
/// side. Correctness of scheduling rests entirely on [`Store::execute`].
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Runs `script` as a single atomic linearization point.
    ///
    /// # Errors
    ///
    /// Propagates the script's own error (with no writes applied), or
    /// [`StoreError::Unavailable`] when the backend cannot be reached.
    async fn execute(&self, script: Script) -> Result<ScriptValue, OrchestrateError>;

    /// Reads a whole hash.
    async fn hash_get_all(
        &self,
        key: &str,
    ) -> Result<Option<IndexMap<String, String>>, StoreError>;

    /// Reads one hash field.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Current length of a list.
    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Snapshot of a list's contents, head first.
    async fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Waits until something is pushed onto the list at `key`, or until
    /// `timeout` elapses. Returns `false` on timeout.
    ///
    /// A push that lands while no caller is waiting leaves a wake-up
    /// pending, so a waiter arriving just after a push does not stall.
    async fn wait_for_push(&self, key: &str, timeout: Duration) -> Result<bool, StoreError>;
}

/// Opens a store from a connection string.
///
/// `memory://` selects the in-process reference backend. Networked
/// backends register their own schemes by implementing [`Store`].
///
/// # Errors
///
/// Returns [`StoreError::UnsupportedUrl`] for unrecognised schemes.
pub fn connect(url: &str) -> Result<Arc<dyn Store>, StoreError> {
    match url {
        "memory://" | "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::UnsupportedUrl {
            url: other.to_string(),
        }),
    }
}
