//! Task and scenario records
//!
//! The unit of work (`Task`), the umbrella record grouping tasks
//! (`Scenario`), and the status state machine every task traverses.
//!
//! Both records persist as flat string-field hashes in the shared store;
//! structured fields (`params`, `input_refs`, `consumers`, `task_ids`) are
//! encoded as JSON blobs so they round-trip unchanged.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ============================================================================
// Status State Machine
// ============================================================================

/// Lifecycle status of a task.
///
/// ```text
/// PENDING ──(pending_count reaches 0)──▶ QUEUED
/// QUEUED  ──(claim)────────────────────▶ PROCESSING
/// PROCESSING ──(succeed)──────────────▶ SUCCESS   (terminal)
/// PROCESSING ──(fail)─────────────────▶ FAILED    (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting on upstream dependencies.
    Pending,
    /// Eligible and present on its service queue.
    Queued,
    /// Claimed by a worker.
    Processing,
    /// Completed successfully. Terminal.
    Success,
    /// Completed with an error. Terminal.
    Failed,
}

impl TaskStatus {
    /// The wire representation stored in the `status` hash field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether the state machine permits `self -> to`.
    ///
    /// This is the single source of truth consulted by every transition
    /// script; anything not listed here is an invalid transition.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Processing)
                | (Self::Processing, Self::Success)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unrecognised task status '{other}'")),
        }
    }
}

// ============================================================================
// Input References
// ============================================================================

/// A named reference from a task to one or more upstream tasks.
///
/// Scalar fields (e.g. `text_task_id`) hold exactly one id; list fields
/// (e.g. `slide_ids`) hold an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    /// Single upstream task id.
    One(String),
    /// Ordered list of upstream task ids.
    Many(Vec<String>),
}

impl TaskRef {
    /// Iterates the referenced ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        match self {
            Self::One(id) => std::slice::from_ref(id).iter(),
            Self::Many(ids) => ids.iter(),
        }
        .map(String::as_str)
    }
}

// ============================================================================
// Task Record
// ============================================================================

/// The unit of work, persisted as the hash `task:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable short identifier, globally unique, chosen at expansion time.
    pub id: String,
    /// Owning scenario.
    pub scenario_id: String,
    /// Worker family that executes this task; routes to `queue:{service}`.
    pub service: String,
    /// Operation kind within the service (e.g. `CreateText`).
    pub name: String,
    /// Upstream tasks that must reach `SUCCESS` before dispatch.
    pub pending_count: u32,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Downstream task ids referencing this task as an input.
    pub consumers: Vec<String>,
    /// Free-form input string, if any.
    pub prompt: Option<String>,
    /// Service-specific parameters; opaque to the orchestrator.
    pub params: serde_json::Value,
    /// Named references to upstream task ids feeding this task.
    pub input_refs: IndexMap<String, TaskRef>,
    /// Artefact locator set by the worker on `SUCCESS`.
    pub result_ref: Option<String>,
    /// Failure description when `status = FAILED`.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Distinct upstream task ids, in first-reference order.
    #[must_use]
    pub fn upstream_ids(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for reference in self.input_refs.values() {
            for id in reference.ids() {
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    /// Encodes the record as store hash fields.
    ///
    /// Optional fields absent from the record are omitted entirely rather
    /// than stored as empty strings, so decode distinguishes unset from
    /// empty.
    ///
    /// # Panics
    ///
    /// Does not panic: `serde_json::to_string` is infallible for the field
    /// types involved.
    #[must_use]
    pub fn to_fields(&self) -> IndexMap<String, String> {
        let mut fields = IndexMap::new();
        fields.insert(fields::ID.to_string(), self.id.clone());
        fields.insert(fields::SCENARIO_ID.to_string(), self.scenario_id.clone());
        fields.insert(fields::SERVICE.to_string(), self.service.clone());
        fields.insert(fields::NAME.to_string(), self.name.clone());
        fields.insert(
            fields::PENDING_COUNT.to_string(),
            self.pending_count.to_string(),
        );
        fields.insert(fields::STATUS.to_string(), self.status.as_str().to_string());
        fields.insert(
            fields::CONSUMERS.to_string(),
            serde_json::to_string(&self.consumers).expect("string vec serializes"),
        );
        if let Some(prompt) = &self.prompt {
            fields.insert(fields::PROMPT.to_string(), prompt.clone());
        }
        fields.insert(
            fields::PARAMS.to_string(),
            serde_json::to_string(&self.params).expect("json value serializes"),
        );
        fields.insert(
            fields::INPUT_REFS.to_string(),
            serde_json::to_string(&self.input_refs).expect("ref map serializes"),
        );
        if let Some(result_ref) = &self.result_ref {
            fields.insert(fields::RESULT_REF.to_string(), result_ref.clone());
        }
        if let Some(error) = &self.error {
            fields.insert(fields::ERROR.to_string(), error.clone());
        }
        fields.insert(
            fields::CREATED_AT.to_string(),
            self.created_at.to_rfc3339(),
        );
        fields.insert(
            fields::UPDATED_AT.to_string(),
            self.updated_at.to_rfc3339(),
        );
        fields
    }

    /// Decodes a record from store hash fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRecord`] when a required field is
    /// missing or fails to parse. `key` names the store key for context.
    pub fn from_fields(
        key: &str,
        raw: &IndexMap<String, String>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            id: required(key, raw, fields::ID)?.to_string(),
            scenario_id: required(key, raw, fields::SCENARIO_ID)?.to_string(),
            service: required(key, raw, fields::SERVICE)?.to_string(),
            name: required(key, raw, fields::NAME)?.to_string(),
            pending_count: parse_field(key, fields::PENDING_COUNT, required(key, raw, fields::PENDING_COUNT)?)?,
            status: required(key, raw, fields::STATUS)?
                .parse()
                .map_err(|message: String| corrupt(key, message))?,
            consumers: decode_json(key, fields::CONSUMERS, required(key, raw, fields::CONSUMERS)?)?,
            prompt: raw.get(fields::PROMPT).cloned(),
            params: decode_json(key, fields::PARAMS, required(key, raw, fields::PARAMS)?)?,
            input_refs: decode_json(key, fields::INPUT_REFS, required(key, raw, fields::INPUT_REFS)?)?,
            result_ref: raw.get(fields::RESULT_REF).cloned(),
            error: raw.get(fields::ERROR).cloned(),
            created_at: parse_timestamp(key, fields::CREATED_AT, required(key, raw, fields::CREATED_AT)?)?,
            updated_at: parse_timestamp(key, fields::UPDATED_AT, required(key, raw, fields::UPDATED_AT)?)?,
        })
    }
}

/// Hash field names for [`Task`] and [`Scenario`] records.
pub mod fields {
    /// Task id.
    pub const ID: &str = "id";
    /// Owning scenario id.
    pub const SCENARIO_ID: &str = "scenario_id";
    /// Worker service name.
    pub const SERVICE: &str = "service";
    /// Operation name.
    pub const NAME: &str = "name";
    /// Unmet upstream dependency count.
    pub const PENDING_COUNT: &str = "pending_count";
    /// Lifecycle status.
    pub const STATUS: &str = "status";
    /// Downstream consumer ids (JSON array).
    pub const CONSUMERS: &str = "consumers";
    /// Free-form input string.
    pub const PROMPT: &str = "prompt";
    /// Service parameters (JSON object).
    pub const PARAMS: &str = "params";
    /// Upstream references (JSON object).
    pub const INPUT_REFS: &str = "input_refs";
    /// Artefact locator.
    pub const RESULT_REF: &str = "result_ref";
    /// Failure description.
    pub const ERROR: &str = "error";
    /// Creation timestamp (RFC 3339).
    pub const CREATED_AT: &str = "created_at";
    /// Last transition timestamp (RFC 3339).
    pub const UPDATED_AT: &str = "updated_at";
    /// Template name (scenario record).
    pub const TEMPLATE_NAME: &str = "template_name";
    /// Template version (scenario record).
    pub const TEMPLATE_VERSION: &str = "template_version";
    /// Ordered member task ids (scenario record, JSON array).
    pub const TASK_IDS: &str = "task_ids";
}

// ============================================================================
// Scenario Record
// ============================================================================

/// The umbrella record grouping tasks, persisted as the hash
/// `scenario:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario identifier.
    pub scenario_id: String,
    /// Which template was expanded.
    pub template_name: String,
    /// Template version, if the template declares one.
    pub template_version: Option<String>,
    /// Ordered list of all member task ids.
    pub task_ids: Vec<String>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    /// Encodes the record as store hash fields.
    #[must_use]
    pub fn to_fields(&self) -> IndexMap<String, String> {
        let mut raw = IndexMap::new();
        raw.insert(fields::SCENARIO_ID.to_string(), self.scenario_id.clone());
        raw.insert(
            fields::TEMPLATE_NAME.to_string(),
            self.template_name.clone(),
        );
        if let Some(version) = &self.template_version {
            raw.insert(fields::TEMPLATE_VERSION.to_string(), version.clone());
        }
        raw.insert(
            fields::TASK_IDS.to_string(),
            serde_json::to_string(&self.task_ids).expect("string vec serializes"),
        );
        raw.insert(fields::CREATED_AT.to_string(), self.created_at.to_rfc3339());
        raw
    }

    /// Decodes a record from store hash fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRecord`] when a required field is
    /// missing or fails to parse.
    pub fn from_fields(
        key: &str,
        raw: &IndexMap<String, String>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            scenario_id: required(key, raw, fields::SCENARIO_ID)?.to_string(),
            template_name: required(key, raw, fields::TEMPLATE_NAME)?.to_string(),
            template_version: raw.get(fields::TEMPLATE_VERSION).cloned(),
            task_ids: decode_json(key, fields::TASK_IDS, required(key, raw, fields::TASK_IDS)?)?,
            created_at: parse_timestamp(key, fields::CREATED_AT, required(key, raw, fields::CREATED_AT)?)?,
        })
    }
}

// ============================================================================
// Decode helpers
// ============================================================================

fn corrupt(key: &str, message: impl Into<String>) -> StoreError {
    StoreError::CorruptRecord {
        key: key.to_string(),
        message: message.into(),
    }
}

fn required<'a>(
    key: &str,
    raw: &'a IndexMap<String, String>,
    field: &str,
) -> Result<&'a String, StoreError> {
    raw.get(field)
        .ok_or_else(|| corrupt(key, format!("missing field '{field}'")))
}

fn parse_field<T: std::str::FromStr>(key: &str, field: &str, value: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| corrupt(key, format!("field '{field}': {e}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    key: &str,
    field: &str,
    value: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(value).map_err(|e| corrupt(key, format!("field '{field}': {e}")))
}

fn parse_timestamp(
    key: &str,
    field: &str,
    value: &str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(key, format!("field '{field}': {e}")))
}

// ============================================================================
// Tests
// ============================================================================
