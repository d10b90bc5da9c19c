//! Prometheus metrics for the batch processor

use prometheus::{register_int_counter_with_registry, IntCounter, Opts, Registry};

#[derive(Clone)]
pub struct OrchestratorMetrics {
    pub work_sets_completed: IntCounter,
    pub work_sets_failed: IntCounter,
    pub commits: IntCounter,
    pub commit_failures: IntCounter,
}

impl OrchestratorMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            work_sets_completed: register_int_counter_with_registry!(
                Opts::new("indexwork_work_sets_completed_total", "Work sets completed"),
                registry
            )?,
            work_sets_failed: register_int_counter_with_registry!(
                Opts::new("indexwork_work_sets_failed_total", "Work sets failed"),
                registry
            )?,
            commits: register_int_counter_with_registry!(
                Opts::new("indexwork_commits_total", "Successful index commits"),
                registry
            )?,
            commit_failures: register_int_counter_with_registry!(
                Opts::new("indexwork_commit_failures_total", "Failed index commits"),
                registry
            )?,
        })
    }

    pub fn failure_rate(&self) -> f64 {
        let failed = self.work_sets_failed.get() as f64;
        let total = failed + self.work_sets_completed.get() as f64;
        if total > 0.0 {
            failed / total
        } else {
            0.0
        }
    }
}
