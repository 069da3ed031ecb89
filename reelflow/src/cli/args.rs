//! CLI argument definitions
//!
//! All Clap derive structs for Reelflow command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use indexmap::IndexMap;

use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::observability::logging::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Scenario-driven task orchestration for AI content pipelines.
#[derive(Parser, Debug)]
#[command(name = "reelflow", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(
        long,
        default_value = "human",
        global = true,
        env = "REELFLOW_LOG_FORMAT"
    )]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and validate scenario templates.
    Template(TemplateCommand),

    /// Expand a template into its task plan without publishing anything.
    Expand(ExpandArgs),

    /// Submit a scenario and drive it to completion with simulated
    /// workers.
    Run(RunArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),
}

// ============================================================================
// Template Command
// ============================================================================

/// Template management commands.
#[derive(Args, Debug)]
pub struct TemplateCommand {
    /// Template subcommand.
    #[command(subcommand)]
    pub subcommand: TemplateSubcommand,
}

/// Template subcommands.
#[derive(Subcommand, Debug)]
pub enum TemplateSubcommand {
    /// List registered templates.
    List,

    /// Print a registered template document.
    Show(TemplateShowArgs),

    /// Validate template files without registering them.
    Validate(TemplateValidateArgs),
}

/// Arguments for `template show`.
#[derive(Args, Debug)]
pub struct TemplateShowArgs {
    /// Template name.
    pub name: String,
}

/// Arguments for `template validate`.
#[derive(Args, Debug)]
pub struct TemplateValidateArgs {
    /// Template files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

// ============================================================================
// Expand / Run
// ============================================================================

/// Arguments for `expand`.
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Template name to expand.
    #[arg(short, long)]
    pub template: String,

    /// Caller parameter as KEY=VALUE; repeatable.
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Print full task records as JSON instead of the plan table.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Template name to submit.
    #[arg(short, long)]
    pub template: String,

    /// Caller parameter as KEY=VALUE; repeatable.
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Artefact output directory (overrides OUTPUT_DIR).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

/// Arguments for `completions`.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

// ============================================================================
// Parameter parsing
// ============================================================================

/// Parses repeated `KEY=VALUE` parameters into a map. Values parse as
/// JSON scalars where possible (`3` is a number, `true` a boolean) and
/// fall back to plain strings.
///
/// # Errors
///
/// Rejects pairs without `=` or with an empty key.
pub fn parse_params(pairs: &[String]) -> Result<IndexMap<String, serde_json::Value>> {
    let mut params = IndexMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "--param".to_string(),
                value: pair.clone(),
                expected: "KEY=VALUE".to_string(),
            }));
        };
        if key.trim().is_empty() {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "--param".to_string(),
                value: pair.clone(),
                expected: "a non-empty key".to_string(),
            }));
        }
        let parsed = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key.trim().to_string(), parsed);
    }
    Ok(params)
}

// ============================================================================
// Tests
// ============================================================================
