use crate::bulker::WorkBulker;
use crate::context::{BulkExecution, IndexResource};
use crate::error::{Failure, OrchestratorError, Result};
use crate::processor::{BatchProcessor, CommitStrategy, RefreshStrategy};
use crate::sequence::WorkOutcome;
use crate::work::{BulkableWork, Work};
use async_trait::async_trait;
use futures::future;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Works submitted together under one commit and refresh strategy.
#[async_trait]
pub trait WorkSet<C: IndexResource>: Send + 'static {
    /// Runs the work set as the next one of the processor's open batch.
    async fn submit_to(self: Box<Self>, processor: &mut BatchProcessor<C>) -> Result<()>;

    /// Completes the work set with `failure` without running it.
    fn mark_as_failed(self: Box<Self>, failure: Failure);
}

/// Resolves once the work set it belongs to has completed.
pub struct CompletionSignal<T> {
    receiver: oneshot::Receiver<std::result::Result<T, Failure>>,
}

impl<T> CompletionSignal<T> {
    fn channel() -> (oneshot::Sender<std::result::Result<T, Failure>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }
}

impl<T> Future for CompletionSignal<T> {
    type Output = std::result::Result<T, Failure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Failure::from(OrchestratorError::CompletionDropped)))
        })
    }
}

/// A work set made of a single work; its result is the work's output.
pub struct SingleWorkSet<W, T> {
    work: W,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    completion: oneshot::Sender<std::result::Result<T, Failure>>,
}

impl<W, T> SingleWorkSet<W, T> {
    pub fn new(work: W, commit: CommitStrategy, refresh: RefreshStrategy) -> (Self, CompletionSignal<T>) {
        let (completion, signal) = CompletionSignal::channel();
        (
            Self {
                work,
                commit,
                refresh,
                completion,
            },
            signal,
        )
    }
}

#[async_trait]
impl<C, W, T> WorkSet<C> for SingleWorkSet<W, T>
where
    C: IndexResource,
    W: Work<C, Output = T>,
    T: Send + 'static,
{
    async fn submit_to(self: Box<Self>, processor: &mut BatchProcessor<C>) -> Result<()> {
        let SingleWorkSet {
            work,
            commit,
            refresh,
            completion,
        } = *self;

        processor.before_work_set(commit, refresh)?;
        match processor.submit(work).await? {
            Some(output) => processor.after_work_set(completion, output).await,
            None => {
                if let Err(failure) = processor.complete_work_set().await? {
                    let _ = completion.send(Err(failure));
                }
                Ok(())
            }
        }
    }

    fn mark_as_failed(self: Box<Self>, failure: Failure) {
        let _ = self.completion.send(Err(failure));
    }
}

/// A work set of bulkable works, executed in bulks of the processor's
/// maximum bulk size. Its result is every work's output, in submission order.
pub struct BulkWorkSet<B, T> {
    works: Vec<B>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    completion: oneshot::Sender<std::result::Result<Vec<T>, Failure>>,
}

impl<B, T> BulkWorkSet<B, T> {
    pub fn new(
        works: Vec<B>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> (Self, CompletionSignal<Vec<T>>) {
        let (completion, signal) = CompletionSignal::channel();
        (
            Self {
                works,
                commit,
                refresh,
                completion,
            },
            signal,
        )
    }
}

#[async_trait]
impl<C, B, T> WorkSet<C> for BulkWorkSet<B, T>
where
    C: IndexResource + BulkExecution,
    B: BulkableWork<C, Output = T>,
    T: Send + 'static,
{
    async fn submit_to(self: Box<Self>, processor: &mut BatchProcessor<C>) -> Result<()> {
        let BulkWorkSet {
            works,
            commit,
            refresh,
            completion,
        } = *self;

        processor.before_work_set(commit, refresh)?;

        let max_bulk_size = processor.max_bulk_size();
        let sequence = processor.sequence()?;
        let mut bulker = WorkBulker::new(max_bulk_size);
        let mut handles = Vec::with_capacity(works.len());
        for work in works {
            handles.push(bulker.add(sequence, work));
        }
        bulker.finalize_bulk_work();

        let outcomes = future::join_all(handles.into_iter().map(IntoFuture::into_future)).await;
        let result = processor.complete_work_set().await?;

        let _ = completion.send(
            result.map(|()| outcomes.into_iter().filter_map(WorkOutcome::ok).collect()),
        );
        Ok(())
    }

    fn mark_as_failed(self: Box<Self>, failure: Failure) {
        let _ = self.completion.send(Err(failure));
    }
}
