use crate::error::Failure;
use crate::work::WorkInfo;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

/// One reported failure: a failing work set, or a failing batch-end commit.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub failing_operation: String,
    pub failure: Failure,
    /// Works that failed, or whose changes were lost.
    pub failing_works: Vec<WorkInfo>,
    /// Works that never executed because an earlier work failed.
    pub skipped_works: Vec<WorkInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Process-wide sink for failures that no caller may be waiting on.
pub trait FailureHandler: Send + Sync {
    fn handle(&self, event: FailureEvent);
}

/// Logs failure events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureHandler;

impl FailureHandler for TracingFailureHandler {
    fn handle(&self, event: FailureEvent) {
        let failing: Vec<String> = event.failing_works.iter().map(|w| w.to_string()).collect();

        error!(
            operation = %event.failing_operation,
            failing_works = ?failing,
            skipped_works = event.skipped_works.len(),
            "Indexing failure: {}",
            event.failure
        );

        for suppressed in event.failure.suppressed() {
            warn!(
                operation = %event.failing_operation,
                "Suppressed failure: {}",
                suppressed
            );
        }
    }
}
