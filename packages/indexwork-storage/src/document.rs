//! Document model shared by every storage backend
//!
//! A backend accepts [`DocumentOperation`]s, one at a time through
//! [`DocumentStore::apply`] or several at once through a bulk call, and
//! answers each with a [`DocumentOutcome`].

use crate::error::StorageError;
use async_trait::async_trait;
use indexwork_orchestration::{BulkExecution, IndexResource};
use serde::{Deserialize, Serialize};

/// A document to index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// One index mutation.
///
/// `Add` creates or replaces; `Update` requires the document to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DocumentOperation {
    Add(Document),
    Update(Document),
    Delete { id: String },
}

impl DocumentOperation {
    pub fn id(&self) -> &str {
        match self {
            DocumentOperation::Add(document) | DocumentOperation::Update(document) => {
                &document.id
            }
            DocumentOperation::Delete { id } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentOperation::Add(_) => "add",
            DocumentOperation::Update(_) => "update",
            DocumentOperation::Delete { .. } => "delete",
        }
    }
}

/// What a single operation did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// A new document was added
    Created,
    /// An existing document was replaced
    Updated,
    /// The document was written without knowing whether it existed
    Indexed,
    Deleted,
    /// Deletion of a document that did not exist
    NotFound,
}

/// Per-item answer of a bulk call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResponse {
    pub id: String,
    #[serde(flatten)]
    pub result: BulkItemResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemResult {
    Ok(DocumentOutcome),
    Error(String),
}

/// Combined answer of a bulk call, one item per operation, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResponse>,
}

impl BulkResponse {
    pub fn push(&mut self, id: impl Into<String>, result: crate::Result<DocumentOutcome>) {
        let result = match result {
            Ok(outcome) => BulkItemResult::Ok(outcome),
            Err(err) => BulkItemResult::Error(err.to_string()),
        };
        self.items.push(BulkItemResponse {
            id: id.into(),
            result,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item.result, BulkItemResult::Error(_)))
    }

    /// Outcome of the item at `offset`.
    pub fn outcome(&self, offset: usize) -> crate::Result<DocumentOutcome> {
        let item = self.items.get(offset).ok_or_else(|| {
            StorageError::index(format!(
                "Bulk response has {} items, no item at offset {}",
                self.items.len(),
                offset
            ))
        })?;
        match &item.result {
            BulkItemResult::Ok(outcome) => Ok(*outcome),
            BulkItemResult::Error(message) => Err(StorageError::index(format!(
                "Bulk item {} failed: {}",
                item.id, message
            ))),
        }
    }
}

/// A writable document index usable as an execution context.
#[async_trait]
pub trait DocumentStore:
    IndexResource + BulkExecution<BulkItem = DocumentOperation, BulkResponse = BulkResponse>
{
    async fn apply(&self, operation: &DocumentOperation) -> crate::Result<DocumentOutcome>;
}
