use crate::config::OrchestratorConfig;
use crate::context::{BulkExecution, IndexResource};
use crate::error::{OrchestratorError, Result};
use crate::executor::{BatchingExecutor, QueuedWorkSet};
use crate::failure::FailureHandler;
#[cfg(feature = "metrics")]
use crate::metrics::OrchestratorMetrics;
use crate::processor::{BatchProcessor, CommitStrategy, RefreshStrategy};
use crate::work::{BulkableWork, Work};
use crate::workset::{BulkWorkSet, CompletionSignal, SingleWorkSet, WorkSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

struct Lifecycle<C: IndexResource> {
    open: bool,
    queue: Option<mpsc::Sender<QueuedWorkSet<C>>>,
}

/// Accepts work sets for one index until closed.
///
/// Submissions hold the shared side of the lifecycle lock and never wait for
/// it: once `close` has started, they are rejected immediately. `close` takes
/// the exclusive side, so submissions already admitted are queued before the
/// executor drains and stops.
pub struct BarrierOrchestrator<C: IndexResource> {
    name: String,
    lifecycle: RwLock<Lifecycle<C>>,
    executor: Mutex<Option<JoinHandle<()>>>,
}

impl<C: IndexResource> BarrierOrchestrator<C> {
    /// Starts the background executor. Must be called within a tokio runtime.
    pub fn start(
        config: &OrchestratorConfig,
        context: Arc<C>,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let name = orchestrator_name(config);
        let processor = BatchProcessor::new(name.clone(), context, failure_handler);
        Ok(Self::launch(name, config, processor))
    }

    #[cfg(feature = "metrics")]
    pub fn start_with_metrics(
        config: &OrchestratorConfig,
        context: Arc<C>,
        failure_handler: Arc<dyn FailureHandler>,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let name = orchestrator_name(config);
        let processor =
            BatchProcessor::new(name.clone(), context, failure_handler).with_metrics(metrics);
        Ok(Self::launch(name, config, processor))
    }

    fn launch(name: String, config: &OrchestratorConfig, processor: BatchProcessor<C>) -> Self {
        let processor = processor
            .with_commit_interval(config.commit_interval())
            .with_max_bulk_size(config.max_bulk_size);
        let (queue, receiver) = mpsc::channel(config.queue_size);
        let executor = BatchingExecutor::new(processor, receiver, config.max_work_sets_per_batch);
        let handle = tokio::spawn(executor.run());

        info!(
            orchestrator = %name,
            queue_size = config.queue_size,
            max_bulk_size = config.max_bulk_size,
            "Orchestrator started"
        );

        Self {
            name,
            lifecycle: RwLock::new(Lifecycle {
                open: true,
                queue: Some(queue),
            }),
            executor: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_open(&self) -> bool {
        self.lifecycle.read().await.open
    }

    /// Queues a work set, waiting for room in the queue if needed.
    ///
    /// Fails with [`OrchestratorError::ShutDown`] once `close` has started.
    pub async fn submit(&self, work_set: Box<dyn WorkSet<C>>) -> Result<()> {
        let Ok(lifecycle) = self.lifecycle.try_read() else {
            return Err(self.shut_down());
        };
        let Some(queue) = lifecycle.queue.as_ref().filter(|_| lifecycle.open) else {
            return Err(self.shut_down());
        };

        queue.send(work_set).await.map_err(|_| self.shut_down())?;
        debug!(orchestrator = %self.name, "Work set queued");
        Ok(())
    }

    pub async fn submit_work<W>(
        &self,
        work: W,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<CompletionSignal<W::Output>>
    where
        W: Work<C>,
    {
        let (work_set, signal) = SingleWorkSet::new(work, commit, refresh);
        self.submit(Box::new(work_set)).await?;
        Ok(signal)
    }

    pub async fn submit_bulk<B>(
        &self,
        works: Vec<B>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<CompletionSignal<Vec<B::Output>>>
    where
        C: BulkExecution,
        B: BulkableWork<C>,
    {
        let (work_set, signal) = BulkWorkSet::new(works, commit, refresh);
        self.submit(Box::new(work_set)).await?;
        Ok(signal)
    }

    /// Stops accepting work sets, then waits for the queued ones to be
    /// processed and the pending changes to be committed.
    ///
    /// Closing an orchestrator that is already closed does nothing.
    pub async fn close(&self) -> Result<()> {
        let queue = {
            let mut lifecycle = self.lifecycle.write().await;
            if !lifecycle.open {
                return Ok(());
            }
            lifecycle.open = false;
            lifecycle.queue.take()
        };
        drop(queue);
        info!(orchestrator = %self.name, "Orchestrator closing");

        let executor = self.executor.lock().take();
        if let Some(executor) = executor {
            if let Err(e) = executor.await {
                error!(orchestrator = %self.name, "Executor task failed: {}", e);
                return Err(OrchestratorError::Other(e.into()));
            }
        }

        info!(orchestrator = %self.name, "Orchestrator closed");
        Ok(())
    }

    fn shut_down(&self) -> OrchestratorError {
        OrchestratorError::ShutDown(self.name.clone())
    }
}

fn orchestrator_name(config: &OrchestratorConfig) -> String {
    config
        .name
        .clone()
        .unwrap_or_else(|| format!("orchestrator-{}", Uuid::new_v4()))
}
