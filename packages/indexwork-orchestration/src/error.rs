use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Orchestrator '{0}' is shut down; the work set was rejected")]
    ShutDown(String),

    #[error("Work set was dropped before reporting completion")]
    CompletionDropped,

    #[error("Bulk work was abandoned before it could be executed")]
    BulkAbandoned,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unsupported backend version: {0}")]
    UnsupportedVersion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn config<E: fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A failure raised while executing works, committing or cleaning up.
///
/// The cause is shared, so every clone of a `Failure` refers to the very same
/// error value: callers can downcast it to the type the work returned.
/// Secondary failures that happened while handling this one are kept as
/// suppressed failures, in the order they were recorded.
#[derive(Clone)]
pub struct Failure {
    cause: Arc<anyhow::Error>,
    suppressed: Vec<Failure>,
}

impl Failure {
    pub fn new(cause: anyhow::Error) -> Self {
        Self {
            cause: Arc::new(cause),
            suppressed: Vec::new(),
        }
    }

    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(anyhow::Error::new(error))
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn suppressed(&self) -> &[Failure] {
        &self.suppressed
    }

    pub fn add_suppressed(&mut self, failure: Failure) {
        self.suppressed.push(failure);
    }

    /// Whether both failures share the same underlying cause.
    pub fn same_cause(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.cause, &other.cause)
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.cause.downcast_ref::<E>()
    }
}

impl From<anyhow::Error> for Failure {
    fn from(cause: anyhow::Error) -> Self {
        Self::new(cause)
    }
}

impl From<OrchestratorError> for Failure {
    fn from(error: OrchestratorError) -> Self {
        Self::from_error(error)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("cause", &format_args!("{:#}", self.cause))
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.cause)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.cause)
    }
}
