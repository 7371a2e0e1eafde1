//! Error types for a3s-saga-audit

use thiserror::Error;

/// Errors that can occur while building or running a handler pipeline
#[derive(Debug, Error)]
pub enum AuditError {
    /// A message handler (or saga) failed
    ///
    /// Produced by handler code and passed through the pipeline untouched.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required argument was missing or empty
    #[error("Argument '{name}' must not be empty")]
    InvalidArgument { name: String },

    /// Pipeline registration failure
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for pipeline and audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
