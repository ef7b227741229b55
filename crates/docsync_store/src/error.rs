//! Error types for the store.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the operation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An optimistic append lost the race: the caller's revision is stale.
    ///
    /// The caller must reload the log and retry.
    #[error("revision conflict on {document_id}/{scope}/{branch}: expected {expected}, actual {actual}")]
    RevisionConflict {
        /// Document the append targeted.
        document_id: String,
        /// Scope the append targeted.
        scope: String,
        /// Branch the append targeted.
        branch: String,
        /// Revision the caller expected.
        expected: u64,
        /// Revision actually stored.
        actual: u64,
    },

    /// The document does not exist.
    #[error("document not found: {document_id}")]
    DocumentNotFound {
        /// The missing document id.
        document_id: String,
    },

    /// The document already exists.
    #[error("document already exists: {document_id}")]
    DocumentExists {
        /// The conflicting document id.
        document_id: String,
    },
}

impl StoreError {
    /// Returns true if the operation can be retried after reloading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::RevisionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_conflict_is_retryable() {
        let err = StoreError::RevisionConflict {
            document_id: "doc-1".into(),
            scope: "global".into(),
            branch: "main".into(),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_retryable());

        let err = StoreError::DocumentNotFound {
            document_id: "doc-1".into(),
        };
        assert!(!err.is_retryable());
    }
}
