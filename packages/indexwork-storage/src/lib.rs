//! Indexwork Storage
//!
//! Document indexes driven by the orchestration engine:
//! - [`InMemoryIndex`]: working/committed/visible maps, for tests and demos
//! - [`TantivyIndexContext`]: on-disk full-text index
//!
//! Both implement [`DocumentStore`], so a [`DocumentWork`] runs against either
//! alone or bulked.

pub mod document;
pub mod error;
pub mod loader;
pub mod memory;
pub mod tantivy_index;
pub mod works;

pub use document::{
    BulkItemResponse, BulkItemResult, BulkResponse, Document, DocumentOperation, DocumentOutcome,
    DocumentStore,
};
pub use error::{ErrorKind, Result, StorageError};
pub use loader::{collect_documents, read_operations};
pub use memory::InMemoryIndex;
pub use tantivy_index::{SearchHit, TantivyIndexContext, DEFAULT_WRITER_HEAP_BYTES};
pub use works::DocumentWork;
