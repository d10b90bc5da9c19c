//! In-memory document index
//!
//! Keeps three views of the documents:
//! - working: every applied operation, committed or not
//! - committed: the state as of the last commit
//! - visible: the state as of the last refresh, used for reads
//!
//! The first write takes the writer lock; `force_lock_release` drops it and
//! rolls the working view back to the committed one.

use crate::document::{BulkResponse, Document, DocumentOperation, DocumentOutcome, DocumentStore};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use indexwork_orchestration::{BulkExecution, ExecutionContext, IndexResource};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct IndexState {
    working: BTreeMap<String, String>,
    committed: BTreeMap<String, String>,
    visible: BTreeMap<String, String>,
    locked: bool,
    generation: u64,
}

impl IndexState {
    fn apply(&mut self, operation: &DocumentOperation) -> Result<DocumentOutcome> {
        self.locked = true;
        match operation {
            DocumentOperation::Add(document) => {
                let previous = self
                    .working
                    .insert(document.id.clone(), document.content.clone());
                Ok(if previous.is_some() {
                    DocumentOutcome::Updated
                } else {
                    DocumentOutcome::Created
                })
            }
            DocumentOperation::Update(document) => match self.working.get_mut(&document.id) {
                Some(content) => {
                    *content = document.content.clone();
                    Ok(DocumentOutcome::Updated)
                }
                None => Err(StorageError::document_not_found(&document.id)),
            },
            DocumentOperation::Delete { id } => Ok(match self.working.remove(id) {
                Some(_) => DocumentOutcome::Deleted,
                None => DocumentOutcome::NotFound,
            }),
        }
    }
}

/// Document index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    name: String,
    state: Mutex<IndexState>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(IndexState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads a document as of the last refresh.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.state
            .lock()
            .visible
            .get(id)
            .map(|content| Document::new(id, content.clone()))
    }

    /// Visible documents whose content contains `term`, ordered by id.
    pub fn search(&self, term: &str) -> Vec<Document> {
        self.state
            .lock()
            .visible
            .iter()
            .filter(|(_, content)| content.contains(term))
            .map(|(id, content)| Document::new(id.clone(), content.clone()))
            .collect()
    }

    pub fn visible_count(&self) -> usize {
        self.state.lock().visible.len()
    }

    pub fn committed_count(&self) -> usize {
        self.state.lock().committed.len()
    }

    pub fn is_committed(&self, id: &str) -> bool {
        self.state.lock().committed.contains_key(id)
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        let state = self.state.lock();
        state.working != state.committed
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of commits so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

#[async_trait]
impl ExecutionContext for InMemoryIndex {}

#[async_trait]
impl IndexResource for InMemoryIndex {
    async fn commit(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.committed = state.working.clone();
        state.generation += 1;
        debug!(index = %self.name, generation = state.generation, "Committed");
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.visible = state.working.clone();
        Ok(())
    }

    async fn force_lock_release(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.working = state.committed.clone();
        state.locked = false;
        debug!(index = %self.name, "Writer lock released, uncommitted changes discarded");
        Ok(())
    }
}

#[async_trait]
impl BulkExecution for InMemoryIndex {
    type BulkItem = DocumentOperation;
    type BulkResponse = BulkResponse;

    async fn execute_bulk(&self, items: &[DocumentOperation]) -> anyhow::Result<BulkResponse> {
        let mut state = self.state.lock();
        let mut response = BulkResponse::default();
        for operation in items {
            response.push(operation.id(), state.apply(operation));
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for InMemoryIndex {
    async fn apply(&self, operation: &DocumentOperation) -> Result<DocumentOutcome> {
        self.state.lock().apply(operation)
    }
}
