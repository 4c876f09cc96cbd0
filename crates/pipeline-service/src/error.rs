//! Error types for the sequence service

use pipeline_engine::PipelineError;
use thiserror::Error;

/// Result type alias using ServiceError
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors raised by the service facade and its collaborators
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service was called before `start()` or after `stop()`
    #[error("Sequence service is not started")]
    NotStarted,

    /// No sequence is registered under the requested id
    #[error("Unknown sequence id: {0}")]
    UnknownSequence(String),

    /// A sequence with this id is already registered
    #[error("A sequence with id '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The sequence exists but accepts a different input type
    #[error("Sequence '{id}' accepts {registered}, not {requested}")]
    SequenceTypeMismatch {
        id: String,
        registered: &'static str,
        requested: &'static str,
    },

    /// Neither the active table nor persistence knows the execution
    #[error("Unknown execution id: {0}")]
    UnknownExecution(String),

    /// The execution already has a run in flight
    #[error("Execution {0} is already running")]
    ExecutionRunning(String),

    /// An execution id cannot be used as a storage name
    #[error("Invalid execution id: {0}")]
    InvalidExecutionId(String),

    /// The persistence collaborator failed or none is configured
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The worker running an execution ended without a result
    #[error("Execution {0} was aborted before it completed")]
    ExecutionAborted(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sequence itself failed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ServiceError {
    /// Create a persistence error with a message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Whether this error reports service state rather than a failed run
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::NotStarted
                | Self::UnknownSequence(_)
                | Self::SequenceTypeMismatch { .. }
                | Self::ExecutionRunning(_)
        )
    }
}
