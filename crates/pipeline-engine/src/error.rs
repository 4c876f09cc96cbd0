//! Error types for the pipeline engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while composing or running nodes
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipeline could not be assembled as configured
    #[error("Construction error: {0}")]
    Construction(String),

    /// Two values collided under a key and no combiner could resolve them
    #[error("Conflicting values for key '{key}' ({type_name}) and no combiner is registered")]
    CombinerConflict { key: String, type_name: String },

    /// A registered combiner rejected the colliding values
    #[error("Combiner for key '{key}' failed: {message}")]
    CombinerFailed { key: String, message: String },

    /// A context lookup found nothing usable under the key
    #[error("Context value not found: {0}")]
    MissingValue(String),

    /// A node failed while applying its input
    #[error("Node execution failed: {0}")]
    NodeFailed(String),

    /// Every permitted attempt of a retried node failed
    #[error("Failed to execute successfully after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// A retried node failed with an error the retry policy does not cover
    #[error("Attempt {attempt} failed with a non-retryable error: {source}")]
    RetryAborted {
        attempt: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// A wrapped node did not complete within its bound
    #[error("Node did not complete within {limit:?}")]
    Timeout { limit: Duration },

    /// No event arrived before the wait bound elapsed
    #[error("No event received within {limit:?}")]
    EventTimeout { limit: Duration },

    /// A spawned branch ended without reporting a result (panicked or aborted)
    #[error("Worker task for {0} ended without producing a result")]
    BranchLost(String),

    /// Spawning requires a tokio runtime and none is active
    #[error("No async runtime available to spawn {0}")]
    NoRuntime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a node failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::NodeFailed(msg.into())
    }

    /// Create a construction error with a message
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    /// Whether this error came from an elapsed deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::EventTimeout { .. })
    }

    /// The innermost error, following retry wrappers
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            Self::RetriesExhausted { source, .. } | Self::RetryAborted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}
