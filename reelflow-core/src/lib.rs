//! Reelflow Core — shared data model for the Reelflow orchestrator
//!
//! This crate provides the task and scenario records, the status state
//! machine, the scenario template schema, and the error taxonomy shared
//! across the `reelflow` engine and anything embedding it.

pub mod error;
pub mod task;
pub mod template;

pub use error::{OrchestrateError, Result, Severity, StoreError, ValidationIssue};
pub use task::{Scenario, Task, TaskRef, TaskStatus};
pub use template::{CountSpec, TaskTemplate, TemplateDoc};
