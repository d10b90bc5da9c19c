//! Ordered execution of the works of one work set.
//!
//! Every step is a lazily polled, shared future waiting on the previous one,
//! so works run strictly one after another. A failing work turns the rest of
//! the sequence into skipped steps; the abort travels from step to step as
//! data ([`SequenceAborted`]) and the failure itself is reported once, through
//! the [`ContextualErrorHandler`] of the sequence.
//!
//! Steps are only ever polled in order, from the step chain of the
//! sequence: by the time a step is first polled its predecessor has resolved,
//! so polling never recurses through earlier steps.

use crate::context::{BulkExecution, ExecutionContext};
use crate::error::{Failure, OrchestratorError};
use crate::error_handler::ContextualErrorHandler;
use crate::work::{BulkWork, BulkableWork, Work, WorkInfo};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Marks a step whose predecessor failed. Internal to the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceAborted;

type Step = Shared<BoxFuture<'static, Result<(), SequenceAborted>>>;

/// Completion of a bulk call, shared by the extraction of every bulked work.
pub type BulkResultFuture<R> = Shared<BoxFuture<'static, Result<Arc<R>, SequenceAborted>>>;

/// Every step of a sequence, in the order they must run.
#[derive(Default)]
struct StepChain {
    steps: Mutex<Vec<Step>>,
    /// Steps before this index have resolved
    settled: AtomicUsize,
}

impl StepChain {
    fn push(&self, step: Step) -> usize {
        let mut steps = self.steps.lock();
        steps.push(step);
        steps.len() - 1
    }

    fn len(&self) -> usize {
        self.steps.lock().len()
    }

    /// Polls steps one at a time, in order, until every step before `end`
    /// has resolved.
    async fn drive_to(&self, end: usize) {
        loop {
            let next = self.settled.load(Ordering::Acquire);
            if next >= end {
                return;
            }
            let step = self.steps.lock().get(next).cloned();
            let Some(step) = step else {
                return;
            };
            let _ = step.await;
            self.settled.fetch_max(next + 1, Ordering::AcqRel);
        }
    }
}

impl Drop for StepChain {
    fn drop(&mut self) {
        // Last to first: an unpolled step owns a handle on its predecessor.
        let steps = self.steps.get_mut();
        while let Some(step) = steps.pop() {
            drop(step);
        }
    }
}

/// What happened to one work of a sequence.
#[derive(Debug)]
pub enum WorkOutcome<T> {
    Succeeded(T),
    Failed(Failure),
    /// Never executed because an earlier step of the sequence failed.
    Skipped,
}

impl<T> WorkOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            WorkOutcome::Succeeded(output) => Some(output),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WorkOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, WorkOutcome::Skipped)
    }
}

/// Result of one step. Awaiting it drives the sequence up to that step.
pub struct WorkHandle<T> {
    chain: Arc<StepChain>,
    index: usize,
    outcome: oneshot::Receiver<WorkOutcome<T>>,
}

impl<T: Send + 'static> IntoFuture for WorkHandle<T> {
    type Output = WorkOutcome<T>;
    type IntoFuture = BoxFuture<'static, WorkOutcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        let WorkHandle {
            chain,
            index,
            outcome,
        } = self;
        async move {
            chain.drive_to(index + 1).await;
            outcome.await.unwrap_or(WorkOutcome::Skipped)
        }
        .boxed()
    }
}

pub struct WorkSequenceBuilder<C: ExecutionContext> {
    context: Arc<C>,
    error_handler: Arc<Mutex<ContextualErrorHandler>>,
    /// Resolves once every step added so far succeeded, or one aborted
    tail: Step,
    /// Extractions of the latest bulk, not yet folded into `tail`
    extractions: Vec<Step>,
    submitted: Vec<WorkInfo>,
    chain: Arc<StepChain>,
}

impl<C: ExecutionContext> WorkSequenceBuilder<C> {
    pub fn new(context: Arc<C>, error_handler: ContextualErrorHandler) -> Self {
        Self {
            context,
            error_handler: Arc::new(Mutex::new(error_handler)),
            tail: future::ready(Ok(())).boxed().shared(),
            extractions: Vec::new(),
            submitted: Vec::new(),
            chain: Arc::new(StepChain::default()),
        }
    }

    /// Holds back every later step until `previous` settles, whatever its outcome.
    pub fn init<F>(&mut self, previous: F)
    where
        F: Future + Send + 'static,
    {
        let tail = self.previous_step();
        let gate: Step = async move {
            previous.await;
            tail.await
        }
        .boxed()
        .shared();
        self.push_tail(gate);
    }

    pub fn add_work<W>(&mut self, work: W) -> WorkHandle<W::Output>
    where
        W: Work<C>,
    {
        let info = work.info();
        self.submitted.push(info.clone());

        let (sender, outcome) = oneshot::channel();
        let previous = self.previous_step();
        let context = Arc::clone(&self.context);
        let error_handler = Arc::clone(&self.error_handler);

        let step: Step = async move {
            if let Err(aborted) = previous.await {
                error_handler.lock().mark_as_skipped(info);
                let _ = sender.send(WorkOutcome::Skipped);
                return Err(aborted);
            }

            debug!(work = %info, "Executing work");
            match work.execute(&context).await {
                Ok(output) => {
                    let _ = sender.send(WorkOutcome::Succeeded(output));
                    Ok(())
                }
                Err(error) => {
                    let failure = Failure::new(error);
                    error_handler.lock().mark_as_failed(info, failure.clone());
                    let _ = sender.send(WorkOutcome::Failed(failure));
                    Err(SequenceAborted)
                }
            }
        }
        .boxed()
        .shared();

        let index = self.push_tail(step);
        WorkHandle {
            chain: Arc::clone(&self.chain),
            index,
            outcome,
        }
    }

    /// Number of works added so far, bulked works included.
    pub fn len(&self) -> usize {
        self.submitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted.is_empty()
    }

    /// The step every new step waits on.
    fn previous_step(&mut self) -> Step {
        self.fold_extractions();
        self.tail.clone()
    }

    /// Joins the pending extractions of the latest bulk into the tail.
    fn fold_extractions(&mut self) {
        if !self.extractions.is_empty() {
            let extractions = std::mem::take(&mut self.extractions);
            let gate: Step = async move {
                future::join_all(extractions)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<()>, SequenceAborted>>()
                    .map(|_| ())
            }
            .boxed()
            .shared();
            self.push_tail(gate);
        }
    }

    fn push_tail(&mut self, step: Step) -> usize {
        self.tail = step.clone();
        self.chain.push(step)
    }

    /// Runs every step, then flushes the context once.
    ///
    /// Returns the error handler with everything recorded, still unreported,
    /// along with the descriptors of every work in the sequence.
    pub(crate) async fn settle(mut self) -> (ContextualErrorHandler, Vec<WorkInfo>) {
        self.fold_extractions();
        self.chain.drive_to(self.chain.len()).await;

        if let Err(error) = self.context.flush().await {
            let failure = Failure::new(error.context("Unable to flush the execution context"));
            self.error_handler.lock().add_throwable(failure);
        }

        let handler = self.error_handler.lock().take();
        (handler, std::mem::take(&mut self.submitted))
    }

    /// Runs the sequence, flushes, and reports any failure.
    ///
    /// Resolves to the primary failure of the sequence, if any.
    pub async fn build(self) -> Result<(), Failure> {
        let (handler, _) = self.settle().await;
        handler.handle().map_or(Ok(()), Err)
    }
}

impl<C: BulkExecution> WorkSequenceBuilder<C> {
    /// Appends a bulk call. It executes once every earlier step succeeded and
    /// `bulk_work` is available; it is never reported as a work of its own.
    pub fn add_bulk_execution<F>(&mut self, bulk_work: F) -> BulkResultFuture<C::BulkResponse>
    where
        F: Future<Output = Result<BulkWork<C>, OrchestratorError>> + Send + 'static,
    {
        let previous = self.previous_step();
        let context = Arc::clone(&self.context);
        let error_handler = Arc::clone(&self.error_handler);

        let result = async move {
            let (previous, bulk_work) = future::join(previous, bulk_work).await;
            previous?;

            let response = match bulk_work {
                Ok(bulk_work) => {
                    debug!(work = %bulk_work.info(), "Executing bulk work");
                    bulk_work.execute(&context).await
                }
                Err(error) => Err(error.into()),
            };

            match response {
                Ok(response) => Ok(Arc::new(response)),
                Err(error) => {
                    let failure = Failure::new(error.context("Bulk call failed"));
                    error_handler.lock().add_throwable(failure);
                    Err(SequenceAborted)
                }
            }
        }
        .boxed()
        .shared();

        let bulk_result = result.clone();
        self.push_tail(async move { bulk_result.await.map(|_| ()) }.boxed().shared());
        result
    }

    pub fn start_bulk_result_extraction(
        &mut self,
        bulk_result: BulkResultFuture<C::BulkResponse>,
    ) -> BulkResultExtractionStep<'_, C> {
        BulkResultExtractionStep {
            builder: self,
            bulk_result,
        }
    }
}

/// Extracts the results of bulked works from one bulk call.
///
/// Extractions do not wait on each other: a failed extraction for one offset
/// leaves the others untouched. Later steps of the sequence still wait for all
/// of them.
pub struct BulkResultExtractionStep<'a, C: BulkExecution> {
    builder: &'a mut WorkSequenceBuilder<C>,
    bulk_result: BulkResultFuture<C::BulkResponse>,
}

impl<C: BulkExecution> BulkResultExtractionStep<'_, C> {
    pub fn add<W>(&mut self, work: W, offset: usize) -> WorkHandle<W::Output>
    where
        W: BulkableWork<C>,
    {
        let info = work.info();
        self.builder.submitted.push(info.clone());

        let (sender, outcome) = oneshot::channel();
        let bulk_result = self.bulk_result.clone();
        let context = Arc::clone(&self.builder.context);
        let error_handler = Arc::clone(&self.builder.error_handler);

        let step: Step = async move {
            let response = match bulk_result.await {
                Ok(response) => response,
                Err(aborted) => {
                    error_handler.lock().mark_as_skipped(info);
                    let _ = sender.send(WorkOutcome::Skipped);
                    return Err(aborted);
                }
            };

            match work.extract(&context, &response, offset).await {
                Ok(output) => {
                    let _ = sender.send(WorkOutcome::Succeeded(output));
                    Ok(())
                }
                Err(error) => {
                    let failure = Failure::new(error);
                    error_handler.lock().mark_as_failed(info, failure.clone());
                    let _ = sender.send(WorkOutcome::Failed(failure));
                    Err(SequenceAborted)
                }
            }
        }
        .boxed()
        .shared();

        let index = self.builder.chain.push(step.clone());
        self.builder.extractions.push(step);
        WorkHandle {
            chain: Arc::clone(&self.builder.chain),
            index,
            outcome,
        }
    }
}
