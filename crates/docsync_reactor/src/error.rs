//! Error types for the reactor.

use docsync_reconcile::IntegrityIssue;
use thiserror::Error;

/// Result type for reactor operations.
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors that can occur in the job pipeline.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// An action failed signature verification.
    ///
    /// Non-retryable; verification happens before any state mutation or
    /// persistence.
    #[error("invalid signature on action {action_id}")]
    InvalidSignature {
        /// Id of the failing action.
        action_id: String,
    },

    /// A history has a missing index.
    ///
    /// Surfaced, never silently skipped.
    #[error("integrity gap at index {index}")]
    IntegrityGap {
        /// The first missing index.
        index: u64,
        /// All issues detected.
        issues: Vec<IntegrityIssue>,
    },

    /// A branch merge failed.
    #[error(transparent)]
    Reconcile(#[from] docsync_reconcile::ReconcileError),

    /// Storage error, including optimistic revision conflicts.
    #[error(transparent)]
    Store(#[from] docsync_store::StoreError),

    /// Data model error.
    #[error(transparent)]
    Model(#[from] docsync_model::ModelError),

    /// An invalid job state transition was attempted.
    ///
    /// This is a programming-contract violation and always fails loudly.
    #[error("invalid job state transition for job {job_id}: {attempted} while {current}")]
    JobState {
        /// The job in question.
        job_id: String,
        /// The attempted transition.
        attempted: &'static str,
        /// The state the job was actually in.
        current: &'static str,
    },

    /// The job does not exist.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The unknown job id.
        job_id: String,
    },

    /// Waiting for a job or a read model timed out.
    #[error("operation timed out")]
    Timeout,

    /// The wait was abandoned by the caller.
    ///
    /// The underlying job continues; only the caller's wait is given up.
    #[error("wait cancelled")]
    Cancelled,

    /// The reactor is shutting down.
    #[error("reactor is shut down")]
    ShutDown,
}

impl ReactorError {
    /// Returns true if the job can be re-queued after this error.
    ///
    /// Signature and integrity failures are never retryable; optimistic
    /// revision conflicts are.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReactorError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
