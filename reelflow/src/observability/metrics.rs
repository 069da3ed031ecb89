//! Metrics facade for Reelflow.
//!
//! Counters and gauges recorded through the `metrics` crate. A deployment
//! that wants them scraped installs its own recorder; without one these
//! calls are no-ops.

use metrics::{counter, gauge};
use reelflow_core::TaskStatus;

/// Records a committed scenario publication.
pub fn record_scenario_published(template_name: &str, task_count: usize) {
    counter!("reelflow_scenarios_published_total", "template" => template_name.to_string())
        .increment(1);
    counter!("reelflow_tasks_created_total", "template" => template_name.to_string())
        .increment(task_count as u64);
}

/// Records a task landing on a service queue.
pub fn record_enqueued(service: &str) {
    counter!("reelflow_tasks_enqueued_total", "service" => service.to_string()).increment(1);
}

/// Records a committed status transition.
pub fn record_transition(to: TaskStatus) {
    counter!("reelflow_task_transitions_total", "to" => to.as_str()).increment(1);
}

/// Records an observed queue depth.
pub fn record_queue_depth(service: &str, depth: usize) {
    gauge!("reelflow_queue_depth", "service" => service.to_string()).set(depth as f64);
}

/// Records a janitor lease revocation.
pub fn record_lease_expired() {
    counter!("reelflow_leases_expired_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder the macros are no-ops; these calls
    // just prove the label shapes compile and do not panic.
    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_scenario_published("short-video", 9);
        record_enqueued("text-service");
        record_transition(TaskStatus::Queued);
        record_queue_depth("video-service", 3);
        record_lease_expired();
    }
}
