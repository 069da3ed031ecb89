//! Core error types for Reelflow
//!
//! The orchestrator-facing error taxonomy shared across the workspace.
//! Expansion-time errors surface synchronously to the submitter and persist
//! nothing; transition-time errors surface to the calling worker and mutate
//! nothing.

use thiserror::Error;

use crate::task::TaskStatus;

// ============================================================================
// Store Errors
// ============================================================================

/// Errors surfaced by the key-value store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded.
    #[error("corrupt record under '{key}': {message}")]
    CorruptRecord {
        /// Store key holding the record.
        key: String,
        /// What failed to decode.
        message: String,
    },

    /// The connection string names no supported backend.
    #[error("unsupported store URL '{url}'")]
    UnsupportedUrl {
        /// The offending connection string.
        url: String,
    },
}

// ============================================================================
// Orchestrator Errors
// ============================================================================

/// Top-level error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    /// Submitted template name is not registered.
    #[error("unknown template '{name}'{}", suggestion.as_ref().map_or_else(String::new, |s| format!(" (did you mean '{s}'?)")))]
    UnknownTemplate {
        /// The name that failed to resolve.
        name: String,
        /// Closest registered name, if one is within edit distance.
        suggestion: Option<String>,
    },

    /// Template parsing, substitution, or validation failed.
    #[error("invalid template '{name}': {}", issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidTemplate {
        /// Template name (or file path for unregistered documents).
        name: String,
        /// Issues found, most severe first.
        issues: Vec<ValidationIssue>,
    },

    /// Expansion produced a cyclic task graph.
    #[error("template '{name}' expands to a cyclic graph ({} task(s) in cycle)", remaining.len())]
    CyclicTemplate {
        /// Template name.
        name: String,
        /// Task ids left unsorted by the topological pass.
        remaining: Vec<String>,
    },

    /// A scalar field references a multiplied label without an index.
    #[error("task '{task}' field '{field}' references multiplied label '{label}' ambiguously")]
    AmbiguousReference {
        /// Referencing task id.
        task: String,
        /// Input field name.
        field: String,
        /// The multiplied label.
        label: String,
    },

    /// A reference resolves to no materialized task.
    #[error("task '{task}' field '{field}' references '{reference}', which matches no task")]
    DanglingReference {
        /// Referencing task id.
        task: String,
        /// Input field name.
        field: String,
        /// The unresolvable reference.
        reference: String,
    },

    /// The identifier generator produced a duplicate id.
    #[error("identifier collision for label '{label}' after {attempts} attempt(s)")]
    IdCollision {
        /// The colliding label.
        label: String,
        /// How many salted retries were made.
        attempts: u32,
    },

    /// Lookup of a non-existent task id.
    #[error("unknown task '{id}'")]
    UnknownTask {
        /// The id that was not found.
        id: String,
    },

    /// Lookup of a non-existent scenario id.
    #[error("unknown scenario '{id}'")]
    UnknownScenario {
        /// The id that was not found.
        id: String,
    },

    /// A state-machine precondition was violated.
    #[error("invalid transition for task '{id}': {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was rejected.
        id: String,
        /// Status observed at the linearization point.
        from: TaskStatus,
        /// Status the caller attempted to reach.
        to: TaskStatus,
    },

    /// Store-layer failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestrateError>;

// ============================================================================
// Validation Types
// ============================================================================

/// A single issue found while validating a template document.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., `tasks[2].service`).
    pub path: String,
    /// Description of the issue.
    pub message: String,
    /// Severity level.
    pub severity: Severity,
}

impl ValidationIssue {
    /// Creates an error-severity issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Creates a warning-severity issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the template from being expanded.
    Error,
    /// Does not prevent expansion.
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_template_with_suggestion() {
        let err = OrchestrateError::UnknownTemplate {
            name: "shrt-video".to_string(),
            suggestion: Some("short-video".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unknown template 'shrt-video' (did you mean 'short-video'?)"
        );
    }

    #[test]
    fn unknown_template_without_suggestion() {
        let err = OrchestrateError::UnknownTemplate {
            name: "zzz".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown template 'zzz'");
    }

    #[test]
    fn invalid_template_joins_issues() {
        let err = OrchestrateError::InvalidTemplate {
            name: "broken".to_string(),
            issues: vec![
                ValidationIssue::error("tasks", "no tasks defined"),
                ValidationIssue::warning("variables.model", "unused variable"),
            ],
        };
        let display = err.to_string();
        assert!(display.contains("no tasks defined"));
        assert!(display.contains("unused variable"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = OrchestrateError::InvalidTransition {
            id: "t1".to_string(),
            from: TaskStatus::Success,
            to: TaskStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for task 't1': SUCCESS -> PROCESSING"
        );
    }

    #[test]
    fn validation_issue_display() {
        let issue = ValidationIssue::error("tasks[0].id", "missing id");
        assert_eq!(issue.to_string(), "error: missing id at tasks[0].id");
    }

    #[test]
    fn store_error_wraps_transparently() {
        let err: OrchestrateError = StoreError::Unavailable("connection refused".to_string()).into();
        assert_eq!(err.to_string(), "store unavailable: connection refused");
    }
}
