//! Runtime configuration
//!
//! Environment-driven settings with sensible defaults. `STORE_URL`,
//! `OUTPUT_DIR` and `SERVICE_NAMES` are the deployment-facing knobs; the
//! `REELFLOW_`-prefixed variables tune engine behaviour.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default worker service enumeration. The TTS queue is named
/// `voice-service`.
pub const DEFAULT_SERVICES: &[&str] = &[
    "text-service",
    "voice-service",
    "image-service",
    "video-service",
];

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable holds a value of the wrong shape.
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Environment variable name.
        field: String,
        /// The value provided.
        value: String,
        /// Description of what was expected.
        expected: String,
    },
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Connection string for the shared store.
    pub store_url: String,
    /// Filesystem root for worker artefacts (workers only; the
    /// orchestrator itself never touches it).
    pub output_dir: PathBuf,
    /// Recognised worker service names; templates naming anything else
    /// fail validation.
    pub service_names: Vec<String>,
    /// Whether `fail` transitively fails downstream `PENDING` tasks.
    pub cascade_fail: bool,
    /// Default long-poll timeout for `claim`.
    pub claim_timeout: Duration,
    /// Age after which the janitor revokes a `PROCESSING` lease.
    pub janitor_horizon: Duration,
    /// Extra template library directory loaded over the built-ins.
    pub template_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_url: "memory://".to_string(),
            output_dir: PathBuf::from("./output"),
            service_names: DEFAULT_SERVICES.iter().map(ToString::to_string).collect(),
            cascade_fail: false,
            claim_timeout: Duration::from_secs(30),
            janitor_horizon: Duration::from_secs(600),
            template_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Builds the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values; unset
    /// variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(&vars)
    }

    /// Builds the configuration from an explicit variable map. Split out
    /// from [`Self::from_env`] so tests never touch process state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values.
    pub fn from_lookup(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = vars.get("STORE_URL") {
            config.store_url = url.clone();
        }
        if let Some(dir) = vars.get("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(names) = vars.get("SERVICE_NAMES") {
            let services: Vec<String> = names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
            if services.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "SERVICE_NAMES".to_string(),
                    value: names.clone(),
                    expected: "a comma-separated list of service names".to_string(),
                });
            }
            config.service_names = services;
        }
        if let Some(flag) = vars.get("REELFLOW_CASCADE_FAIL") {
            config.cascade_fail = parse_bool("REELFLOW_CASCADE_FAIL", flag)?;
        }
        if let Some(timeout) = vars.get("REELFLOW_CLAIM_TIMEOUT") {
            config.claim_timeout = parse_duration("REELFLOW_CLAIM_TIMEOUT", timeout)?;
        }
        if let Some(horizon) = vars.get("REELFLOW_JANITOR_HORIZON") {
            config.janitor_horizon = parse_duration("REELFLOW_JANITOR_HORIZON", horizon)?;
        }
        if let Some(dir) = vars.get("REELFLOW_TEMPLATE_DIR") {
            config.template_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "a boolean (true/false)".to_string(),
        }),
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: "a duration such as '30s' or '10m'".to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
