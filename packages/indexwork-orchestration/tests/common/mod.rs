//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use indexwork_orchestration::{
    BulkExecution, BulkableWork, ExecutionContext, FailureEvent, FailureHandler, IndexResource,
    Work, WorkInfo,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("work #{0} failed")]
pub struct WorkFailed(pub usize);

#[derive(Debug, Error)]
#[error("index lock could not be released")]
pub struct LockReleaseFailed;

#[derive(Debug, Error)]
#[error("commit rejected")]
pub struct CommitRejected;

/// Counts backend calls; lock release and commit can be made to fail.
#[derive(Default)]
pub struct CountingIndex {
    pub executed: Mutex<Vec<usize>>,
    pub commits: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub releases: AtomicUsize,
    pub flushes: AtomicUsize,
    pub bulks: AtomicUsize,
    pub fail_commit: AtomicBool,
    pub fail_release: AtomicBool,
}

impl CountingIndex {
    pub fn executed(&self) -> Vec<usize> {
        self.executed.lock().clone()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionContext for CountingIndex {
    async fn flush(&self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl IndexResource for CountingIndex {
    async fn commit(&self) -> anyhow::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(CommitRejected.into());
        }
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn force_lock_release(&self) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(LockReleaseFailed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BulkExecution for CountingIndex {
    type BulkItem = usize;
    type BulkResponse = Vec<usize>;

    async fn execute_bulk(&self, items: &[usize]) -> anyhow::Result<Vec<usize>> {
        self.bulks.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().extend_from_slice(items);
        Ok(items.iter().map(|item| item * 10).collect())
    }
}

/// Work #id; returns its id, or fails when `fail` is set. Optionally sleeps first.
#[derive(Debug, Clone)]
pub struct NumberedWork {
    pub id: usize,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl NumberedWork {
    pub fn ok(id: usize) -> Self {
        Self {
            id,
            fail: false,
            delay: None,
        }
    }

    pub fn failing(id: usize) -> Self {
        Self {
            id,
            fail: true,
            delay: None,
        }
    }

    pub fn slow(id: usize, delay: Duration) -> Self {
        Self {
            id,
            fail: false,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl Work<CountingIndex> for NumberedWork {
    type Output = usize;

    async fn execute(&self, index: &CountingIndex) -> anyhow::Result<usize> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        index.executed.lock().push(self.id);
        if self.fail {
            return Err(WorkFailed(self.id).into());
        }
        Ok(self.id)
    }

    fn info(&self) -> WorkInfo {
        WorkInfo::new("numbered").with_target(self.id.to_string())
    }
}

/// Bulkable work #id; its extracted result is `id * 10`.
#[derive(Debug, Clone)]
pub struct NumberedBulkable(pub usize);

#[async_trait]
impl BulkableWork<CountingIndex> for NumberedBulkable {
    type Output = usize;

    fn info(&self) -> WorkInfo {
        WorkInfo::new("numbered_bulkable").with_target(self.0.to_string())
    }

    fn to_bulk_item(&self) -> usize {
        self.0
    }

    async fn extract(
        &self,
        _index: &CountingIndex,
        response: &Vec<usize>,
        offset: usize,
    ) -> anyhow::Result<usize> {
        response
            .get(offset)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("missing bulk item {}", offset))
    }
}

#[derive(Default)]
pub struct RecordingFailureHandler {
    pub events: Mutex<Vec<FailureEvent>>,
}

impl RecordingFailureHandler {
    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().clone()
    }
}

impl FailureHandler for RecordingFailureHandler {
    fn handle(&self, event: FailureEvent) {
        self.events.lock().push(event);
    }
}
