use crate::context::IndexResource;
use crate::error::Failure;
use crate::processor::BatchProcessor;
use crate::workset::WorkSet;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

pub(crate) type QueuedWorkSet<C> = Box<dyn WorkSet<C>>;

/// Background loop owning the batch processor.
///
/// Work sets already waiting in the queue are grouped into one batch. A batch
/// whose commit was deferred is followed by an empty batch once the deferral
/// elapses, unless more work sets arrive first.
pub(crate) struct BatchingExecutor<C: IndexResource> {
    processor: BatchProcessor<C>,
    queue: mpsc::Receiver<QueuedWorkSet<C>>,
    max_work_sets_per_batch: usize,
}

impl<C: IndexResource> BatchingExecutor<C> {
    pub(crate) fn new(
        processor: BatchProcessor<C>,
        queue: mpsc::Receiver<QueuedWorkSet<C>>,
        max_work_sets_per_batch: usize,
    ) -> Self {
        Self {
            processor,
            queue,
            max_work_sets_per_batch: max_work_sets_per_batch.max(1),
        }
    }

    pub(crate) async fn run(mut self) {
        info!(orchestrator = %self.processor.name(), "Batching executor started");

        let mut commit_deadline: Option<Instant> = None;
        loop {
            let received = match commit_deadline {
                Some(deadline) => tokio::select! {
                    received = self.queue.recv() => received,
                    _ = time::sleep_until(deadline) => {
                        commit_deadline = self.run_batch(Vec::new()).await;
                        continue;
                    }
                },
                None => self.queue.recv().await,
            };

            let Some(first) = received else {
                break;
            };

            let mut work_sets = vec![first];
            while work_sets.len() < self.max_work_sets_per_batch {
                match self.queue.try_recv() {
                    Ok(work_set) => work_sets.push(work_set),
                    Err(_) => break,
                }
            }
            commit_deadline = self.run_batch(work_sets).await;
        }

        if let Err(e) = self.processor.complete().await {
            error!(orchestrator = %self.processor.name(), "Final commit skipped: {}", e);
        }
        info!(orchestrator = %self.processor.name(), "Batching executor stopped");
    }

    /// Runs one batch; returns when its deferred commit is due, if deferred.
    async fn run_batch(&mut self, work_sets: Vec<QueuedWorkSet<C>>) -> Option<Instant> {
        if let Err(e) = self.processor.begin_batch() {
            error!(orchestrator = %self.processor.name(), "Unable to start batch: {}", e);
            let failure = Failure::from(e);
            for work_set in work_sets {
                work_set.mark_as_failed(failure.clone());
            }
            return None;
        }

        debug!(
            orchestrator = %self.processor.name(),
            work_sets = work_sets.len(),
            "Processing batch"
        );
        for work_set in work_sets {
            if let Err(e) = work_set.submit_to(&mut self.processor).await {
                error!(orchestrator = %self.processor.name(), "Work set aborted: {}", e);
            }
        }

        match self.processor.end_batch().await {
            // An interval too long to schedule leaves the commit to `close`.
            Ok(Some(delay)) => Instant::now().checked_add(delay),
            Ok(None) => None,
            Err(e) => {
                error!(orchestrator = %self.processor.name(), "Unable to end batch: {}", e);
                None
            }
        }
    }
}
