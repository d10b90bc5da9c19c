use crate::context::IndexResource;
use crate::error::{Failure, OrchestratorError, Result};
use crate::error_handler::ContextualErrorHandler;
use crate::failure::FailureHandler;
#[cfg(feature = "metrics")]
use crate::metrics::OrchestratorMetrics;
use crate::sequence::WorkSequenceBuilder;
use crate::work::Work;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const WORK_SET_OPERATION: &str = "Index work set";
pub const WORK_SET_COMMIT_OPERATION: &str = "Commit after a set of index works";
pub const WORK_SET_REFRESH_OPERATION: &str = "Refresh after a set of index works";
pub const BATCH_COMMIT_OPERATION: &str = "Commit after a batch of index works";

/// Whether to commit right after a work set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStrategy {
    #[default]
    None,
    Force,
}

/// Whether to make a work set's changes visible to reads right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategy {
    #[default]
    None,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Idle,
    BatchOpen,
    WorkSetOpen,
}

impl ProcessorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Idle => "idle",
            ProcessorState::BatchOpen => "batch_open",
            ProcessorState::WorkSetOpen => "work_set_open",
        }
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

enum Metric {
    WorkSetCompleted,
    WorkSetFailed,
    Commit,
    CommitFailure,
}

struct OpenWorkSet<C: IndexResource> {
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    sequence: WorkSequenceBuilder<C>,
}

/// Drives work sets against one index, batch after batch.
///
/// Lifecycle: `begin_batch`, then for each work set `before_work_set`,
/// `submit`* and `after_work_set`, then `end_batch`. A batch leaves no change
/// uncommitted behind it unless a commit interval defers the commit.
pub struct BatchProcessor<C: IndexResource> {
    name: String,
    context: Arc<C>,
    failure_handler: Arc<dyn FailureHandler>,
    commit_interval: Option<Duration>,
    max_bulk_size: usize,
    state: ProcessorState,
    work_set: Option<OpenWorkSet<C>>,
    has_uncommitted_works: bool,
    last_commit: Instant,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<OrchestratorMetrics>>,
}

impl<C: IndexResource> BatchProcessor<C> {
    pub fn new(
        name: impl Into<String>,
        context: Arc<C>,
        failure_handler: Arc<dyn FailureHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            failure_handler,
            commit_interval: None,
            max_bulk_size: 250,
            state: ProcessorState::Idle,
            work_set: None,
            has_uncommitted_works: false,
            last_commit: Instant::now(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Defers batch-end commits until `interval` has passed since the last one.
    pub fn with_commit_interval(mut self, interval: Option<Duration>) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn with_max_bulk_size(mut self, max_bulk_size: usize) -> Self {
        self.max_bulk_size = max_bulk_size.max(1);
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<OrchestratorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn max_bulk_size(&self) -> usize {
        self.max_bulk_size
    }

    /// Whether changes were executed since the last successful commit.
    pub fn has_uncommitted_works(&self) -> bool {
        self.has_uncommitted_works
    }

    pub fn begin_batch(&mut self) -> Result<()> {
        self.transition(ProcessorState::Idle, ProcessorState::BatchOpen)
    }

    pub fn before_work_set(&mut self, commit: CommitStrategy, refresh: RefreshStrategy) -> Result<()> {
        self.transition(ProcessorState::BatchOpen, ProcessorState::WorkSetOpen)?;

        let error_handler =
            ContextualErrorHandler::new(Arc::clone(&self.failure_handler), WORK_SET_OPERATION);
        self.work_set = Some(OpenWorkSet {
            commit,
            refresh,
            sequence: WorkSequenceBuilder::new(Arc::clone(&self.context), error_handler),
        });
        Ok(())
    }

    /// Executes `work` right away, unless an earlier work of the current work
    /// set failed, in which case it is recorded as skipped.
    ///
    /// Returns `None` when the work failed or was skipped; the failure is
    /// reported when the work set completes.
    pub async fn submit<W>(&mut self, work: W) -> Result<Option<W::Output>>
    where
        W: Work<C>,
    {
        let handle = self.sequence()?.add_work(work);
        Ok(handle.await.ok())
    }

    /// The sequence of the open work set.
    pub fn sequence(&mut self) -> Result<&mut WorkSequenceBuilder<C>> {
        let state = self.state;
        match self.work_set.as_mut() {
            Some(work_set) => Ok(&mut work_set.sequence),
            None => Err(OrchestratorError::invalid_transition(
                state.as_str(),
                "submit",
            )),
        }
    }

    /// Closes the open work set and passes its outcome, carrying `result` on
    /// success, to `completion`.
    pub async fn after_work_set<T>(
        &mut self,
        completion: oneshot::Sender<std::result::Result<T, Failure>>,
        result: T,
    ) -> Result<()> {
        let outcome = self.complete_work_set().await?;
        let _ = completion.send(outcome.map(|()| result));
        Ok(())
    }

    /// Closes the open work set: settles its works, then applies its commit
    /// and refresh strategies.
    ///
    /// The outer error is a lifecycle misuse; the inner one is the failure of
    /// the work set, already reported to the failure handler.
    pub async fn complete_work_set(&mut self) -> Result<std::result::Result<(), Failure>> {
        let OpenWorkSet {
            commit,
            refresh,
            sequence,
        } = self.take_work_set()?;

        let (mut handler, works) = sequence.settle().await;

        if handler.has_failure() {
            release_lock(&*self.context, &self.name, &mut handler).await;
            self.count(Metric::WorkSetFailed);
            return Ok(handler.handle().map_or(Ok(()), Err));
        }

        if commit == CommitStrategy::Force {
            debug!(processor = %self.name, works = works.len(), "Committing after work set");
            if let Err(error) = self.context.commit().await {
                self.count(Metric::CommitFailure);
                self.count(Metric::WorkSetFailed);

                let mut handler = ContextualErrorHandler::new(
                    Arc::clone(&self.failure_handler),
                    WORK_SET_COMMIT_OPERATION,
                );
                handler.add_throwable(Failure::new(error));
                for work in works {
                    handler.mark_as_uncommitted(work);
                }
                release_lock(&*self.context, &self.name, &mut handler).await;
                return Ok(handler.handle().map_or(Ok(()), Err));
            }
            self.committed();
        } else {
            self.has_uncommitted_works = true;
        }

        if refresh == RefreshStrategy::Force {
            debug!(processor = %self.name, "Refreshing after work set");
            if let Err(error) = self.context.refresh().await {
                self.count(Metric::WorkSetFailed);

                let mut handler = ContextualErrorHandler::new(
                    Arc::clone(&self.failure_handler),
                    WORK_SET_REFRESH_OPERATION,
                );
                handler.add_throwable(Failure::new(error));
                return Ok(handler.handle().map_or(Ok(()), Err));
            }
        }

        self.count(Metric::WorkSetCompleted);
        Ok(Ok(()))
    }

    /// Closes the batch, committing unless the last commit is still fresh.
    ///
    /// Returns how long the commit was deferred for, if it was. A failing
    /// commit is only reported to the failure handler.
    pub async fn end_batch(&mut self) -> Result<Option<Duration>> {
        self.transition(ProcessorState::BatchOpen, ProcessorState::Idle)?;

        if !self.has_uncommitted_works {
            return Ok(None);
        }

        if let Some(interval) = self.commit_interval {
            let elapsed = self.last_commit.elapsed();
            if elapsed < interval {
                return Ok(Some(interval - elapsed));
            }
        }

        self.commit_batch().await;
        Ok(None)
    }

    /// Commits every pending change, ignoring the commit interval.
    pub async fn complete(&mut self) -> Result<()> {
        if self.state != ProcessorState::Idle {
            return Err(OrchestratorError::invalid_transition(
                self.state.as_str(),
                "complete",
            ));
        }

        if self.has_uncommitted_works {
            self.commit_batch().await;
        }
        Ok(())
    }

    async fn commit_batch(&mut self) {
        debug!(processor = %self.name, "Committing after batch");

        match self.context.commit().await {
            Ok(()) => self.committed(),
            Err(error) => {
                self.count(Metric::CommitFailure);

                let mut handler = ContextualErrorHandler::new(
                    Arc::clone(&self.failure_handler),
                    BATCH_COMMIT_OPERATION,
                );
                handler.add_throwable(Failure::new(error));
                release_lock(&*self.context, &self.name, &mut handler).await;
                let _ = handler.handle();

                // Releasing the lock dropped the pending changes.
                self.has_uncommitted_works = false;
            }
        }
    }

    fn committed(&mut self) {
        self.count(Metric::Commit);
        self.has_uncommitted_works = false;
        self.last_commit = Instant::now();
    }

    fn take_work_set(&mut self) -> Result<OpenWorkSet<C>> {
        let work_set = match (self.state, self.work_set.take()) {
            (ProcessorState::WorkSetOpen, Some(work_set)) => work_set,
            (state, _) => {
                return Err(OrchestratorError::invalid_transition(
                    state.as_str(),
                    ProcessorState::BatchOpen.as_str(),
                ))
            }
        };
        self.state = ProcessorState::BatchOpen;
        Ok(work_set)
    }

    fn transition(&mut self, from: ProcessorState, to: ProcessorState) -> Result<()> {
        if self.state != from {
            return Err(OrchestratorError::invalid_transition(
                self.state.as_str(),
                to.as_str(),
            ));
        }
        self.state = to;
        Ok(())
    }

    #[cfg(feature = "metrics")]
    fn count(&self, metric: Metric) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match metric {
            Metric::WorkSetCompleted => metrics.work_sets_completed.inc(),
            Metric::WorkSetFailed => metrics.work_sets_failed.inc(),
            Metric::Commit => metrics.commits.inc(),
            Metric::CommitFailure => metrics.commit_failures.inc(),
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn count(&self, _metric: Metric) {}
}

/// Releases the index lock after a failure; a release failure is attached to
/// the handler's failure.
async fn release_lock<C: IndexResource>(
    context: &C,
    processor: &str,
    handler: &mut ContextualErrorHandler,
) {
    if let Err(error) = context.force_lock_release().await {
        warn!(processor = %processor, "Failed to release the index lock: {:#}", error);
        handler.add_throwable(Failure::new(
            error.context("Unable to clean up after a previous failure"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CollectingFailureHandler, CommitError, RecordingContext, ReleaseError, TestError,
        TestWork,
    };

    fn processor() -> (
        Arc<RecordingContext>,
        Arc<CollectingFailureHandler>,
        BatchProcessor<RecordingContext>,
    ) {
        let context = Arc::new(RecordingContext::default());
        let collector = Arc::new(CollectingFailureHandler::default());
        let processor = BatchProcessor::new("test", Arc::clone(&context), collector.clone());
        (context, collector, processor)
    }

    async fn run_work_set(
        processor: &mut BatchProcessor<RecordingContext>,
        commit: CommitStrategy,
        works: Vec<TestWork>,
    ) -> std::result::Result<(), Failure> {
        processor.before_work_set(commit, RefreshStrategy::None).unwrap();
        for work in works {
            processor.submit(work).await.unwrap();
        }
        let (sender, receiver) = oneshot::channel();
        processor.after_work_set(sender, ()).await.unwrap();
        receiver.await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_once_per_force_and_once_at_batch_end() {
        let (context, collector, mut processor) = processor();
        let strategies = [
            CommitStrategy::None,
            CommitStrategy::Force,
            CommitStrategy::None,
            CommitStrategy::Force,
            CommitStrategy::None,
            CommitStrategy::Force,
            CommitStrategy::None,
        ];

        processor.begin_batch().unwrap();
        for commit in strategies {
            run_work_set(&mut processor, commit, vec![TestWork::ok("w")])
                .await
                .unwrap();
        }
        assert_eq!(context.count("commit"), 3);

        assert_eq!(processor.end_batch().await.unwrap(), None);
        assert_eq!(context.count("commit"), 4);
        assert!(collector.events().is_empty());
    }

    #[tokio::test]
    async fn test_no_extra_commit_when_last_work_set_forced() {
        let (context, _, mut processor) = processor();

        processor.begin_batch().unwrap();
        run_work_set(&mut processor, CommitStrategy::None, vec![TestWork::ok("a")])
            .await
            .unwrap();
        run_work_set(&mut processor, CommitStrategy::Force, vec![TestWork::ok("b")])
            .await
            .unwrap();
        processor.end_batch().await.unwrap();

        assert_eq!(context.count("commit"), 1);
        assert!(!processor.has_uncommitted_works());
    }

    #[tokio::test]
    async fn test_failing_work_set_does_not_block_the_next_one() {
        let (context, collector, mut processor) = processor();

        processor.begin_batch().unwrap();
        let failure = run_work_set(
            &mut processor,
            CommitStrategy::None,
            vec![TestWork::ok("1"), TestWork::failing("2")],
        )
        .await
        .unwrap_err();
        assert!(failure.downcast_ref::<TestError>().is_some());

        run_work_set(
            &mut processor,
            CommitStrategy::None,
            vec![TestWork::ok("3"), TestWork::ok("4"), TestWork::ok("5")],
        )
        .await
        .unwrap();
        processor.end_batch().await.unwrap();

        assert_eq!(context.count("execute:"), 5);
        assert_eq!(context.count("release"), 1);
        assert_eq!(context.count("commit"), 1);
        assert_eq!(collector.events().len(), 1);
        assert_eq!(collector.events()[0].failing_operation, WORK_SET_OPERATION);
    }

    #[tokio::test]
    async fn test_submit_after_failure_is_skipped() {
        let (context, collector, mut processor) = processor();

        processor.begin_batch().unwrap();
        processor
            .before_work_set(CommitStrategy::Force, RefreshStrategy::None)
            .unwrap();
        assert_eq!(processor.submit(TestWork::failing("a")).await.unwrap(), None);
        assert_eq!(processor.submit(TestWork::ok("b")).await.unwrap(), None);
        assert!(processor.complete_work_set().await.unwrap().is_err());

        assert_eq!(context.count("execute:"), 1);
        assert_eq!(context.count("commit"), 0);
        assert_eq!(collector.events()[0].skipped_works, vec![TestWork::ok("b").info()]);
    }

    #[tokio::test]
    async fn test_release_failure_is_suppressed_onto_work_failure() {
        let (context, collector, mut processor) = processor();
        context.fail_release();

        processor.begin_batch().unwrap();
        let failure = run_work_set(
            &mut processor,
            CommitStrategy::None,
            vec![TestWork::ok("1"), TestWork::failing("2")],
        )
        .await
        .unwrap_err();

        assert!(failure.downcast_ref::<TestError>().is_some());
        assert_eq!(failure.suppressed().len(), 1);

        let suppressed = &failure.suppressed()[0];
        assert!(suppressed.to_string().contains("clean up"));
        assert!(suppressed.downcast_ref::<ReleaseError>().is_some());
        assert_eq!(collector.events()[0].failure.suppressed().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_is_primary_over_release_failure() {
        let (context, collector, mut processor) = processor();
        context.fail_commit();
        context.fail_release();

        processor.begin_batch().unwrap();
        let failure = run_work_set(&mut processor, CommitStrategy::Force, vec![TestWork::ok("a")])
            .await
            .unwrap_err();

        assert!(failure.downcast_ref::<CommitError>().is_some());
        assert_eq!(failure.suppressed().len(), 1);
        assert!(failure.suppressed()[0].downcast_ref::<ReleaseError>().is_some());

        let events = collector.events();
        assert_eq!(events[0].failing_operation, WORK_SET_COMMIT_OPERATION);
        assert_eq!(events[0].failing_works, vec![TestWork::ok("a").info()]);
    }

    #[tokio::test]
    async fn test_refresh_failure_fails_the_work_set() {
        let (context, collector, mut processor) = processor();
        context.fail_refresh();

        processor.begin_batch().unwrap();
        processor
            .before_work_set(CommitStrategy::None, RefreshStrategy::Force)
            .unwrap();
        processor.submit(TestWork::ok("a")).await.unwrap();
        assert!(processor.complete_work_set().await.unwrap().is_err());

        assert_eq!(collector.events()[0].failing_operation, WORK_SET_REFRESH_OPERATION);
        assert_eq!(context.count("release"), 0);
    }

    #[tokio::test]
    async fn test_batch_commit_failure_goes_to_failure_handler() {
        let (context, collector, mut processor) = processor();

        processor.begin_batch().unwrap();
        run_work_set(&mut processor, CommitStrategy::None, vec![TestWork::ok("a")])
            .await
            .unwrap();
        context.fail_commit();
        context.fail_release();
        processor.end_batch().await.unwrap();

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].failing_operation, BATCH_COMMIT_OPERATION);
        assert!(events[0].failure.downcast_ref::<CommitError>().is_some());
        assert_eq!(events[0].failure.suppressed().len(), 1);
        assert_eq!(context.count("release"), 1);
    }

    #[tokio::test]
    async fn test_commit_interval_defers_batch_commit() {
        let (context, _, processor) = processor();
        let mut processor = processor.with_commit_interval(Some(Duration::from_secs(60)));

        processor.begin_batch().unwrap();
        run_work_set(&mut processor, CommitStrategy::None, vec![TestWork::ok("a")])
            .await
            .unwrap();
        let delay = processor.end_batch().await.unwrap();

        assert!(delay.is_some_and(|d| d <= Duration::from_secs(60)));
        assert_eq!(context.count("commit"), 0);

        processor.complete().await.unwrap();
        assert_eq!(context.count("commit"), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse_is_an_error() {
        let (_, _, mut processor) = processor();

        assert!(matches!(
            processor.before_work_set(CommitStrategy::None, RefreshStrategy::None),
            Err(OrchestratorError::InvalidStateTransition { .. })
        ));
        assert!(processor.submit(TestWork::ok("a")).await.is_err());
        assert!(processor.end_batch().await.is_err());

        processor.begin_batch().unwrap();
        assert!(processor.begin_batch().is_err());
        assert!(processor.complete().await.is_err());
        assert_eq!(processor.state(), ProcessorState::BatchOpen);
    }
}
