//! Tantivy-backed document index
//!
//! # Schema
//!
//! 1. `id` - Document ID (STRING, STORED; exact match)
//! 2. `content` - Document body (TEXT, STORED)
//!
//! The writer is opened on the first write and owns the directory lock until
//! it is rolled back by `force_lock_release`. Searches go through a reader
//! that only moves forward on `refresh`.

use crate::document::{BulkResponse, Document, DocumentOperation, DocumentOutcome, DocumentStore};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use indexwork_orchestration::{BulkExecution, ExecutionContext, IndexResource};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

pub const FIELD_ID: &str = "id";
pub const FIELD_CONTENT: &str = "content";

/// Default writer heap (50 MB)
pub const DEFAULT_WRITER_HEAP_BYTES: usize = 50_000_000;

/// Build the two-field document schema
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field(FIELD_ID, STRING | STORED);
    schema_builder.add_text_field(FIELD_CONTENT, TEXT | STORED);
    schema_builder.build()
}

#[derive(Debug, Clone, Copy)]
struct SchemaFields {
    id: Field,
    content: Field,
}

impl SchemaFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field(FIELD_ID)?,
            content: schema.get_field(FIELD_CONTENT)?,
        })
    }
}

/// Search result hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub score: f32,
}

#[derive(Default)]
struct WriterState {
    writer: Option<IndexWriter>,
    /// Existence of documents touched since the last commit
    pending: HashMap<String, bool>,
}

/// Full-text document index on tantivy.
///
/// Writes, commits and rollbacks run on the blocking thread pool.
pub struct TantivyIndexContext {
    inner: Arc<IndexInner>,
    writer_heap_bytes: usize,
}

struct IndexInner {
    index: Index,
    fields: SchemaFields,
    state: Mutex<WriterState>,
    /// Reloaded on refresh; serves searches
    reader: IndexReader,
    /// Reloaded on commit; serves existence checks
    committed_reader: IndexReader,
}

impl TantivyIndexContext {
    /// Open the index in `path`, creating it (and the directory) if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let directory = MmapDirectory::open(path).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, build_schema())?;
        info!(path = %path.display(), "Opened tantivy index");
        Self::from_index(index)
    }

    /// Index held in RAM, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader = Self::manual_reader(&index)?;
        let committed_reader = Self::manual_reader(&index)?;
        Ok(Self {
            inner: Arc::new(IndexInner {
                index,
                fields,
                state: Mutex::new(WriterState::default()),
                reader,
                committed_reader,
            }),
            writer_heap_bytes: DEFAULT_WRITER_HEAP_BYTES,
        })
    }

    fn manual_reader(index: &Index) -> Result<IndexReader> {
        Ok(index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }

    /// Heap given to the writer when it is next opened.
    pub fn with_writer_heap(mut self, bytes: usize) -> Self {
        self.writer_heap_bytes = bytes;
        self
    }

    /// Whether this context currently holds the writer (and its lock).
    pub fn holds_writer(&self) -> bool {
        self.inner.state.lock().writer.is_some()
    }

    /// Number of documents visible as of the last refresh.
    pub fn num_docs(&self) -> u64 {
        self.inner.reader.searcher().num_docs()
    }

    /// Search visible documents (BM25 over `content`).
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let inner = &self.inner;
        let searcher = inner.reader.searcher();
        let query_parser = QueryParser::for_index(&inner.index, vec![inner.fields.content]);
        let parsed_query = query_parser.parse_query(query)?;

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            hits.push(SearchHit {
                id: text(&doc, inner.fields.id),
                content: text(&doc, inner.fields.content),
                score,
            });
        }
        Ok(hits)
    }

    /// Read one visible document by id.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let searcher = self.inner.reader.searcher();
        let query = TermQuery::new(self.inner.id_term(id), IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_, doc_address)) => {
                let doc: TantivyDocument = searcher.doc(*doc_address)?;
                Ok(Some(Document::new(id, text(&doc, self.inner.fields.content))))
            }
            None => Ok(None),
        }
    }

    /// Run `task` against the index on the blocking thread pool.
    async fn blocking<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&IndexInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || task(&inner)).await?
    }
}

fn text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

impl IndexInner {
    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    fn exists(&self, state: &WriterState, id: &str) -> Result<bool> {
        if let Some(exists) = state.pending.get(id) {
            return Ok(*exists);
        }
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        Ok(self.committed_reader.searcher().search(&query, &Count)? > 0)
    }

    fn apply_locked(
        &self,
        state: &mut WriterState,
        operation: &DocumentOperation,
        writer_heap_bytes: usize,
    ) -> Result<DocumentOutcome> {
        let outcome = match operation {
            DocumentOperation::Add(_) => DocumentOutcome::Indexed,
            DocumentOperation::Update(document) => {
                if !self.exists(state, &document.id)? {
                    return Err(StorageError::document_not_found(&document.id));
                }
                DocumentOutcome::Updated
            }
            DocumentOperation::Delete { id } => {
                if self.exists(state, id)? {
                    DocumentOutcome::Deleted
                } else {
                    DocumentOutcome::NotFound
                }
            }
        };

        if state.writer.is_none() {
            let writer: IndexWriter = self.index.writer_with_num_threads(1, writer_heap_bytes)?;
            debug!(heap_bytes = writer_heap_bytes, "Opened index writer");
            state.writer = Some(writer);
        }
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| StorageError::lock("Index writer is not open"))?;

        writer.delete_term(self.id_term(operation.id()));
        match operation {
            DocumentOperation::Add(document) | DocumentOperation::Update(document) => {
                writer.add_document(doc!(
                    self.fields.id => document.id.clone(),
                    self.fields.content => document.content.clone(),
                ))?;
                state.pending.insert(document.id.clone(), true);
            }
            DocumentOperation::Delete { id } => {
                state.pending.insert(id.clone(), false);
            }
        }
        Ok(outcome)
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(writer) = state.writer.as_mut() else {
            return Ok(());
        };
        let opstamp = writer.commit()?;
        state.pending.clear();
        self.committed_reader.reload()?;
        debug!(opstamp, "Committed index writer");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.pending.clear();
        if let Some(mut writer) = state.writer.take() {
            writer.rollback()?;
            debug!("Rolled back index writer, lock released");
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionContext for TantivyIndexContext {}

#[async_trait]
impl IndexResource for TantivyIndexContext {
    async fn commit(&self) -> anyhow::Result<()> {
        self.blocking(|inner| inner.commit()).await?;
        Ok(())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.inner.reader.reload().map_err(StorageError::from)?;
        Ok(())
    }

    async fn force_lock_release(&self) -> anyhow::Result<()> {
        self.blocking(|inner| inner.rollback()).await?;
        Ok(())
    }
}

#[async_trait]
impl BulkExecution for TantivyIndexContext {
    type BulkItem = DocumentOperation;
    type BulkResponse = BulkResponse;

    async fn execute_bulk(&self, items: &[DocumentOperation]) -> anyhow::Result<BulkResponse> {
        let items = items.to_vec();
        let heap = self.writer_heap_bytes;
        let response = self
            .blocking(move |inner| {
                let mut state = inner.state.lock();
                let mut response = BulkResponse::default();
                for operation in &items {
                    response.push(operation.id(), inner.apply_locked(&mut state, operation, heap));
                }
                Ok(response)
            })
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for TantivyIndexContext {
    async fn apply(&self, operation: &DocumentOperation) -> Result<DocumentOutcome> {
        let operation = operation.clone();
        let heap = self.writer_heap_bytes;
        self.blocking(move |inner| {
            let mut state = inner.state.lock();
            inner.apply_locked(&mut state, &operation, heap)
        })
        .await
    }
}
