use crate::context::BulkExecution;
use crate::error::OrchestratorError;
use crate::sequence::{BulkResultFuture, WorkHandle, WorkSequenceBuilder};
use crate::work::{BulkWork, BulkableWork};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::debug;

struct PendingBulk<C: BulkExecution> {
    items: Vec<C::BulkItem>,
    ready: oneshot::Sender<BulkWork<C>>,
    result: BulkResultFuture<C::BulkResponse>,
}

/// Groups consecutive bulkable works into bulk calls of at most
/// `max_bulk_size` items.
///
/// The bulk call is appended to the sequence as soon as its first work is
/// added, but only becomes executable once the bulk is finalized. Dropping
/// the bulker with a bulk still open abandons it: its works are skipped.
pub struct WorkBulker<C: BulkExecution> {
    max_bulk_size: usize,
    pending: Option<PendingBulk<C>>,
}

impl<C: BulkExecution> WorkBulker<C> {
    pub fn new(max_bulk_size: usize) -> Self {
        Self {
            max_bulk_size: max_bulk_size.max(1),
            pending: None,
        }
    }

    pub fn add<W>(&mut self, sequence: &mut WorkSequenceBuilder<C>, work: W) -> WorkHandle<W::Output>
    where
        W: BulkableWork<C>,
    {
        let pending = self.pending.get_or_insert_with(|| {
            let (ready, bulk_work) = oneshot::channel();
            let result = sequence.add_bulk_execution(
                bulk_work.map(|received| received.map_err(|_| OrchestratorError::BulkAbandoned)),
            );
            PendingBulk {
                items: Vec::new(),
                ready,
                result,
            }
        });

        let offset = pending.items.len();
        pending.items.push(work.to_bulk_item());
        let handle = sequence
            .start_bulk_result_extraction(pending.result.clone())
            .add(work, offset);

        if pending.items.len() >= self.max_bulk_size {
            self.finalize_bulk_work();
        }
        handle
    }

    /// Releases the open bulk, if any, for execution.
    pub fn finalize_bulk_work(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        debug!(items = pending.items.len(), "Finalizing bulk work");
        let _ = pending.ready.send(BulkWork::new(pending.items));
        true
    }
}
