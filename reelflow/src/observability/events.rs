//! Structured event stream for Reelflow.
//!
//! Discrete, typed events emitted as tasks move through the pipeline.
//! Events are serialized as newline-delimited JSON (JSONL) and include a
//! monotonically increasing sequence number for ordering.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during orchestration.
///
/// Each variant is tagged with `"type"` when serialized to JSON so
/// consumers can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A scenario was expanded and published.
    ScenarioPublished {
        /// When publication committed.
        timestamp: DateTime<Utc>,
        /// The new scenario id.
        scenario_id: String,
        /// Template it was expanded from.
        template_name: String,
        /// Number of member tasks.
        task_count: usize,
        /// Tasks enqueued immediately.
        initially_ready: usize,
    },

    /// A task became eligible and was pushed onto its service queue.
    TaskEnqueued {
        /// When the enqueue committed.
        timestamp: DateTime<Utc>,
        /// The enqueued task.
        task_id: String,
        /// Queue it landed on.
        service: String,
    },

    /// A worker claimed a task.
    TaskClaimed {
        /// When the claim committed.
        timestamp: DateTime<Utc>,
        /// The claimed task.
        task_id: String,
        /// Queue it was claimed from.
        service: String,
    },

    /// A task completed successfully.
    TaskSucceeded {
        /// When the transition committed.
        timestamp: DateTime<Utc>,
        /// The completed task.
        task_id: String,
        /// Consumers that became ready as a result.
        newly_ready: Vec<String>,
    },

    /// A task failed.
    TaskFailed {
        /// When the transition committed.
        timestamp: DateTime<Utc>,
        /// The failed task.
        task_id: String,
        /// Failure description.
        error: String,
        /// Downstream tasks failed by cascade (empty without cascade).
        cascaded: Vec<String>,
    },

    /// The janitor revoked a stale processing lease.
    LeaseExpired {
        /// When the sweep fired.
        timestamp: DateTime<Utc>,
        /// The revoked task.
        task_id: String,
        /// How long the task had been processing.
        age_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    /// Zero-based, monotonically increasing sequence counter.
    sequence: u64,
    /// The wrapped event (flattened into the same JSON object).
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) atomically increments the sequence
/// counter, serializes the event as a single JSON line, and flushes the
/// underlying writer. Serialization or I/O failures are silently dropped
/// because observability must never fail an orchestration call.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr, keeping stdout free for
    /// command output.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that silently discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
