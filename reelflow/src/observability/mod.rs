//! Observability: structured logging, event stream, and metrics.

pub mod events;
pub mod logging;
pub mod metrics;
