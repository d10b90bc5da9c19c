use crate::document::{DocumentOperation, DocumentOutcome, DocumentStore};
use async_trait::async_trait;
use indexwork_orchestration::{BulkableWork, Work, WorkInfo};

/// A document mutation, runnable alone or as part of a bulk call.
#[derive(Debug, Clone)]
pub struct DocumentWork {
    operation: DocumentOperation,
}

impl DocumentWork {
    pub fn new(operation: DocumentOperation) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> &DocumentOperation {
        &self.operation
    }

    fn describe(&self) -> WorkInfo {
        WorkInfo::new(format!("{} document", self.operation.name())).with_target(self.operation.id())
    }
}

impl From<DocumentOperation> for DocumentWork {
    fn from(operation: DocumentOperation) -> Self {
        Self::new(operation)
    }
}

#[async_trait]
impl<S: DocumentStore> Work<S> for DocumentWork {
    type Output = DocumentOutcome;

    async fn execute(&self, store: &S) -> anyhow::Result<DocumentOutcome> {
        Ok(store.apply(&self.operation).await?)
    }

    fn info(&self) -> WorkInfo {
        self.describe()
    }
}

#[async_trait]
impl<S: DocumentStore> BulkableWork<S> for DocumentWork {
    type Output = DocumentOutcome;

    fn info(&self) -> WorkInfo {
        self.describe()
    }

    fn to_bulk_item(&self) -> DocumentOperation {
        self.operation.clone()
    }

    async fn extract(
        &self,
        _store: &S,
        response: &crate::document::BulkResponse,
        offset: usize,
    ) -> anyhow::Result<DocumentOutcome> {
        Ok(response.outcome(offset)?)
    }
}
