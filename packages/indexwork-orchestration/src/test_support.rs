//! Test doubles shared by the unit tests of this crate.

use crate::context::{BulkExecution, ExecutionContext, IndexResource};
use crate::failure::{FailureEvent, FailureHandler};
use crate::work::{BulkableWork, Work, WorkInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("work {0} failed")]
pub(crate) struct TestError(pub String);

#[derive(Debug, Error)]
#[error("lock release failed")]
pub(crate) struct ReleaseError;

#[derive(Debug, Error)]
#[error("commit failed")]
pub(crate) struct CommitError;

/// Records every call it receives; each backend operation can be made to fail.
#[derive(Default)]
pub(crate) struct RecordingContext {
    events: Mutex<Vec<String>>,
    fail_flush: AtomicBool,
    fail_commit: AtomicBool,
    fail_refresh: AtomicBool,
    fail_release: AtomicBool,
    fail_bulk: AtomicBool,
}

impl RecordingContext {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn fail_flush(&self) {
        self.fail_flush.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub fn fail_bulk(&self) {
        self.fail_bulk.store(true, Ordering::SeqCst);
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

#[async_trait]
impl ExecutionContext for RecordingContext {
    async fn flush(&self) -> anyhow::Result<()> {
        self.record("flush");
        if self.fail_flush.load(Ordering::SeqCst) {
            anyhow::bail!("flush failed");
        }
        Ok(())
    }
}

#[async_trait]
impl IndexResource for RecordingContext {
    async fn commit(&self) -> anyhow::Result<()> {
        self.record("commit");
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(CommitError.into());
        }
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.record("refresh");
        if self.fail_refresh.load(Ordering::SeqCst) {
            anyhow::bail!("refresh failed");
        }
        Ok(())
    }

    async fn force_lock_release(&self) -> anyhow::Result<()> {
        self.record("release");
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ReleaseError.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BulkExecution for RecordingContext {
    type BulkItem = String;
    type BulkResponse = Vec<Result<String, String>>;

    async fn execute_bulk(&self, items: &[String]) -> anyhow::Result<Self::BulkResponse> {
        self.record(format!("bulk:{}", items.len()));
        if self.fail_bulk.load(Ordering::SeqCst) {
            anyhow::bail!("bulk rejected");
        }
        Ok(items
            .iter()
            .map(|item| match item.strip_prefix("fail:") {
                Some(label) => Err(label.to_string()),
                None => Ok(item.clone()),
            })
            .collect())
    }
}

/// A work returning its own label, or failing with [`TestError`].
#[derive(Debug, Clone)]
pub(crate) struct TestWork {
    label: String,
    fail: bool,
}

impl TestWork {
    pub fn ok(label: &str) -> Self {
        Self {
            label: label.to_string(),
            fail: false,
        }
    }

    pub fn failing(label: &str) -> Self {
        Self {
            label: label.to_string(),
            fail: true,
        }
    }
}

#[async_trait]
impl Work<RecordingContext> for TestWork {
    type Output = String;

    async fn execute(&self, context: &RecordingContext) -> anyhow::Result<String> {
        context.record(format!("execute:{}", self.label));
        if self.fail {
            return Err(TestError(self.label.clone()).into());
        }
        Ok(self.label.clone())
    }

    fn info(&self) -> WorkInfo {
        WorkInfo::new("test").with_target(self.label.clone())
    }
}

/// A bulkable work whose bulk item is its label; labels prefixed with
/// `fail:` make extraction fail.
#[derive(Debug, Clone)]
pub(crate) struct TestBulkable {
    item: String,
}

impl TestBulkable {
    pub fn new(label: &str) -> Self {
        Self {
            item: label.to_string(),
        }
    }

    pub fn failing(label: &str) -> Self {
        Self {
            item: format!("fail:{label}"),
        }
    }
}

#[async_trait]
impl BulkableWork<RecordingContext> for TestBulkable {
    type Output = String;

    fn info(&self) -> WorkInfo {
        WorkInfo::new("bulkable").with_target(self.item.clone())
    }

    fn to_bulk_item(&self) -> String {
        self.item.clone()
    }

    async fn extract(
        &self,
        _context: &RecordingContext,
        response: &Vec<Result<String, String>>,
        offset: usize,
    ) -> anyhow::Result<String> {
        match response.get(offset) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(label)) => Err(TestError(label.clone()).into()),
            None => anyhow::bail!("no bulk item at offset {offset}"),
        }
    }
}

#[derive(Default)]
pub(crate) struct CollectingFailureHandler {
    events: Mutex<Vec<FailureEvent>>,
}

impl CollectingFailureHandler {
    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().clone()
    }
}

impl FailureHandler for CollectingFailureHandler {
    fn handle(&self, event: FailureEvent) {
        self.events.lock().push(event);
    }
}
