//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while working with the data model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An action or operation could not be serialized for hashing.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An action referenced a scope that does not match its operation.
    #[error("scope mismatch: action scope {action_scope:?}, expected {expected:?}")]
    ScopeMismatch {
        /// Scope carried by the action.
        action_scope: String,
        /// Scope the caller expected.
        expected: String,
    },
}
