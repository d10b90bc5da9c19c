use async_trait::async_trait;

/// Backend resource handle passed to works during execution.
///
/// Contexts that buffer writes override [`ExecutionContext::flush`]; it is
/// called exactly once at the end of every work sequence. The default is a
/// no-op, i.e. the context is not flushable.
#[async_trait]
pub trait ExecutionContext: Send + Sync + 'static {
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Contexts able to execute several bulkable works in one backend call.
#[async_trait]
pub trait BulkExecution: ExecutionContext {
    /// Encoded form of one bulkable work.
    type BulkItem: Send + Sync + 'static;
    /// Combined response, from which each work extracts its own result.
    type BulkResponse: Send + Sync + 'static;

    async fn execute_bulk(&self, items: &[Self::BulkItem]) -> anyhow::Result<Self::BulkResponse>;
}

/// Contexts holding a writable index: durable commits, visibility refreshes
/// and a writer lock that can be forcibly released after a failure.
#[async_trait]
pub trait IndexResource: ExecutionContext {
    async fn commit(&self) -> anyhow::Result<()>;

    async fn refresh(&self) -> anyhow::Result<()>;

    /// Releases the writer lock, discarding uncommitted changes.
    async fn force_lock_release(&self) -> anyhow::Result<()>;
}
