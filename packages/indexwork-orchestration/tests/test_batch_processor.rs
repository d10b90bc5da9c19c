/// Batch processor integration tests
///
/// Drives the processor through whole batches the way the orchestrator does,
/// and checks commit counts and failure reporting.
mod common;

use common::{
    CommitRejected, CountingIndex, LockReleaseFailed, NumberedBulkable, NumberedWork,
    RecordingFailureHandler, WorkFailed,
};
use indexwork_orchestration::{
    BatchProcessor, BulkWorkSet, CommitStrategy, RefreshStrategy, SingleWorkSet, WorkSet,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::oneshot;

fn setup() -> (
    Arc<CountingIndex>,
    Arc<RecordingFailureHandler>,
    BatchProcessor<CountingIndex>,
) {
    let index = Arc::new(CountingIndex::default());
    let failures = Arc::new(RecordingFailureHandler::default());
    let processor = BatchProcessor::new("it", Arc::clone(&index), failures.clone());
    (index, failures, processor)
}

#[tokio::test]
async fn test_failed_work_set_followed_by_successful_one() {
    let (index, failures, mut processor) = setup();
    processor.begin_batch().unwrap();

    // Work set 1: work #2 of 2 fails
    processor
        .before_work_set(CommitStrategy::None, RefreshStrategy::None)
        .unwrap();
    assert_eq!(processor.submit(NumberedWork::ok(1)).await.unwrap(), Some(1));
    assert_eq!(processor.submit(NumberedWork::failing(2)).await.unwrap(), None);
    let (sender, first) = oneshot::channel();
    processor.after_work_set(sender, "first").await.unwrap();

    // Work set 2: three independent works
    processor
        .before_work_set(CommitStrategy::None, RefreshStrategy::None)
        .unwrap();
    for id in 3..=5 {
        assert_eq!(processor.submit(NumberedWork::ok(id)).await.unwrap(), Some(id));
    }
    let (sender, second) = oneshot::channel();
    processor.after_work_set(sender, "second").await.unwrap();

    processor.end_batch().await.unwrap();

    let failure = first.await.unwrap().unwrap_err();
    assert!(failure.downcast_ref::<WorkFailed>().is_some_and(|e| e.0 == 2));
    assert_eq!(second.await.unwrap().unwrap(), "second");

    assert_eq!(index.executed(), vec![1, 2, 3, 4, 5]);
    assert_eq!(index.commits(), 1);
    assert_eq!(index.releases.load(Ordering::SeqCst), 1);
    assert_eq!(failures.events().len(), 1);
}

#[tokio::test]
async fn test_cleanup_failure_is_suppressed_onto_original_failure() {
    let (index, failures, mut processor) = setup();
    index.fail_release.store(true, Ordering::SeqCst);
    processor.begin_batch().unwrap();

    let (work_set, signal) =
        SingleWorkSet::new(NumberedWork::failing(7), CommitStrategy::Force, RefreshStrategy::None);
    Box::new(work_set).submit_to(&mut processor).await.unwrap();
    processor.end_batch().await.unwrap();

    let failure = signal.await.unwrap_err();
    assert!(failure.downcast_ref::<WorkFailed>().is_some());
    assert_eq!(failure.suppressed().len(), 1);

    let cleanup = &failure.suppressed()[0];
    assert!(cleanup.to_string().contains("clean up"));
    assert!(cleanup.downcast_ref::<LockReleaseFailed>().is_some());

    assert_eq!(index.commits(), 0);
    let events = failures.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].failure.same_cause(&failure));
}

#[tokio::test]
async fn test_commit_failure_takes_priority_over_cleanup_failure() {
    let (index, failures, mut processor) = setup();
    index.fail_commit.store(true, Ordering::SeqCst);
    index.fail_release.store(true, Ordering::SeqCst);
    processor.begin_batch().unwrap();

    let (work_set, signal) =
        SingleWorkSet::new(NumberedWork::ok(1), CommitStrategy::Force, RefreshStrategy::None);
    Box::new(work_set).submit_to(&mut processor).await.unwrap();
    processor.end_batch().await.unwrap();

    let failure = signal.await.unwrap_err();
    assert!(failure.downcast_ref::<CommitRejected>().is_some());
    assert_eq!(failure.suppressed().len(), 1);
    assert!(failure.suppressed()[0]
        .downcast_ref::<LockReleaseFailed>()
        .is_some());
    assert_eq!(
        failures.events()[0].failing_operation,
        "Commit after a set of index works"
    );
}

#[tokio::test]
async fn test_bulk_results_match_their_offsets() {
    let (index, _, processor) = setup();
    let mut processor = processor.with_max_bulk_size(3);
    processor.begin_batch().unwrap();

    let works = (1..=7).map(NumberedBulkable).collect();
    let (work_set, signal) = BulkWorkSet::new(works, CommitStrategy::None, RefreshStrategy::Force);
    Box::new(work_set).submit_to(&mut processor).await.unwrap();
    processor.end_batch().await.unwrap();

    assert_eq!(signal.await.unwrap(), vec![10, 20, 30, 40, 50, 60, 70]);
    assert_eq!(index.bulks.load(Ordering::SeqCst), 3);
    assert_eq!(index.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(index.commits(), 1);
}

#[tokio::test]
async fn test_batch_commit_failure_only_reaches_failure_handler() {
    let (index, failures, mut processor) = setup();
    processor.begin_batch().unwrap();

    let (work_set, signal) =
        SingleWorkSet::new(NumberedWork::ok(1), CommitStrategy::None, RefreshStrategy::None);
    Box::new(work_set).submit_to(&mut processor).await.unwrap();
    index.fail_commit.store(true, Ordering::SeqCst);
    processor.end_batch().await.unwrap();

    assert_eq!(signal.await.unwrap(), 1);

    let events = failures.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].failing_operation, "Commit after a batch of index works");
    assert!(events[0].failure.downcast_ref::<CommitRejected>().is_some());
    assert_eq!(index.releases.load(Ordering::SeqCst), 1);
}
