//! Error types for indexwork-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Full-text index errors (tantivy)
    Index,
    /// Serialization/deserialization errors
    Serialization,
    /// Document not found
    DocumentNotFound,
    /// Writer lock could not be taken or released
    Lock,
    /// Invalid search query
    Query,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Index => "index",
            ErrorKind::Serialization => "serialization",
            ErrorKind::DocumentNotFound => "document_not_found",
            ErrorKind::Lock => "lock",
            ErrorKind::Query => "query",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::DocumentNotFound,
            format!("Document not found: {}", id.into()),
        )
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lock, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }
}

// Tantivy error conversions
impl From<tantivy::TantivyError> for StorageError {
    fn from(err: tantivy::TantivyError) -> Self {
        let kind = match &err {
            tantivy::TantivyError::LockFailure(..) => ErrorKind::Lock,
            _ => ErrorKind::Index,
        };
        StorageError::new(kind, format!("Tantivy error: {}", err)).with_source(err)
    }
}

impl From<tantivy::query::QueryParserError> for StorageError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        StorageError::query(format!("Invalid query: {}", err)).with_source(err)
    }
}

// Blocking index task conversions
impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::index(format!("Blocking index task failed: {}", err)).with_source(err)
    }
}

// I/O error conversions
impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
