//! Error types for the Reelflow engine and CLI

use thiserror::Error;

/// Top-level error type for engine and CLI operations.
///
/// Orchestration failures carry the structured taxonomy from
/// [`reelflow_core::error`]; the remaining variants cover the surrounding
/// machinery (configuration, file I/O, template files on disk).
#[derive(Debug, Error)]
pub enum Error {
    /// Orchestrator error with a structured kind.
    #[error(transparent)]
    Orchestrate(#[from] reelflow_core::OrchestrateError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reelflow_core::StoreError> for Error {
    fn from(err: reelflow_core::StoreError) -> Self {
        Self::Orchestrate(err.into())
    }
}

/// Result type alias for engine and CLI operations.
pub type Result<T> = std::result::Result<T, Error>;
