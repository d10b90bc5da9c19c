use crate::error::Failure;
use crate::failure::{FailureEvent, FailureHandler};
use crate::work::WorkInfo;
use chrono::Utc;
use std::mem;
use std::sync::Arc;

/// Collects the failures of one work set (or one cleanup step) and reports
/// them as a single event.
///
/// The first recorded failure becomes the primary one; every later failure is
/// attached to it as suppressed. Not meant to be shared between work sets.
pub struct ContextualErrorHandler {
    failure_handler: Arc<dyn FailureHandler>,
    failing_operation: String,
    primary: Option<Failure>,
    failing_works: Vec<WorkInfo>,
    skipped_works: Vec<WorkInfo>,
}

impl ContextualErrorHandler {
    pub fn new(failure_handler: Arc<dyn FailureHandler>, failing_operation: impl Into<String>) -> Self {
        Self {
            failure_handler,
            failing_operation: failing_operation.into(),
            primary: None,
            failing_works: Vec::new(),
            skipped_works: Vec::new(),
        }
    }

    pub fn mark_as_failed(&mut self, work: WorkInfo, failure: Failure) {
        self.failing_works.push(work);
        self.add_throwable(failure);
    }

    pub fn mark_as_skipped(&mut self, work: WorkInfo) {
        self.skipped_works.push(work);
    }

    /// Records a work whose changes were lost without the work itself failing,
    /// e.g. when the commit following it failed.
    pub fn mark_as_uncommitted(&mut self, work: WorkInfo) {
        self.failing_works.push(work);
    }

    pub fn add_throwable(&mut self, failure: Failure) {
        match &mut self.primary {
            None => self.primary = Some(failure),
            Some(primary) if primary.same_cause(&failure) => {}
            Some(primary) => primary.add_suppressed(failure),
        }
    }

    pub fn has_failure(&self) -> bool {
        self.primary.is_some()
    }

    /// The primary failure, carrying everything suppressed so far.
    pub fn failure(&self) -> Option<&Failure> {
        self.primary.as_ref()
    }

    pub fn failing_operation(&self) -> &str {
        &self.failing_operation
    }

    /// Passes one event to the failure handler if a failure was recorded.
    ///
    /// Returns the reported failure.
    pub fn handle(self) -> Option<Failure> {
        let failure = self.primary?;

        self.failure_handler.handle(FailureEvent {
            failing_operation: self.failing_operation,
            failure: failure.clone(),
            failing_works: self.failing_works,
            skipped_works: self.skipped_works,
            occurred_at: Utc::now(),
        });
        Some(failure)
    }

    /// Moves everything recorded so far into a new handler, leaving this one empty.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            failure_handler: Arc::clone(&self.failure_handler),
            failing_operation: self.failing_operation.clone(),
            primary: self.primary.take(),
            failing_works: mem::take(&mut self.failing_works),
            skipped_works: mem::take(&mut self.skipped_works),
        }
    }
}
