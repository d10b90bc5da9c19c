use crate::context::{BulkExecution, ExecutionContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Descriptor of a work, used for failure reporting only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkInfo {
    pub operation: String,
    pub target: Option<String>,
}

impl WorkInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for WorkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} [{}]", self.operation, target),
            None => write!(f, "{}", self.operation),
        }
    }
}

/// One atomic index mutation, executed alone.
#[async_trait]
pub trait Work<C: ExecutionContext>: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn execute(&self, context: &C) -> anyhow::Result<Self::Output>;

    fn info(&self) -> WorkInfo;
}

/// A work that may be combined with its neighbours into one bulk call.
#[async_trait]
pub trait BulkableWork<C: BulkExecution>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn info(&self) -> WorkInfo;

    fn to_bulk_item(&self) -> C::BulkItem;

    /// Extracts this work's own result from the combined response.
    async fn extract(
        &self,
        context: &C,
        response: &C::BulkResponse,
        offset: usize,
    ) -> anyhow::Result<Self::Output>;
}

/// The combined call standing in for several bulkable works.
pub struct BulkWork<C: BulkExecution> {
    items: Vec<C::BulkItem>,
}

impl<C: BulkExecution> BulkWork<C> {
    pub fn new(items: Vec<C::BulkItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl<C: BulkExecution> Work<C> for BulkWork<C> {
    type Output = C::BulkResponse;

    async fn execute(&self, context: &C) -> anyhow::Result<C::BulkResponse> {
        context.execute_bulk(&self.items).await
    }

    fn info(&self) -> WorkInfo {
        WorkInfo::new("bulk").with_target(format!("{} works", self.items.len()))
    }
}
