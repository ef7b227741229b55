//! The operation store trait and its associated types.

use crate::error::StoreResult;
use docsync_model::{DocumentId, Operation};

/// Global, strictly increasing commit sequence number.
///
/// Ordinals are assigned at the moment an operation is durably committed
/// and are independent of any per-document index. They drive read-after-
/// write consistency tokens and idempotent read-model replay.
pub type Ordinal = u64;

/// An operation stamped with its commit ordinal and log coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedOperation {
    /// Commit ordinal.
    pub ordinal: Ordinal,
    /// Document the operation belongs to.
    pub document_id: DocumentId,
    /// Scope of the operation log.
    pub scope: String,
    /// Branch of the operation log.
    pub branch: String,
    /// The operation itself.
    pub operation: Operation,
}

/// The result of a successful transactional append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedBatch {
    /// Ordinals assigned to the newly committed operations, in commit order.
    pub ordinals: Vec<Ordinal>,
    /// The log revision after the append.
    pub revision: u64,
}

impl AppliedBatch {
    /// Returns the highest ordinal of the batch, if any was committed.
    pub fn last_ordinal(&self) -> Option<Ordinal> {
        self.ordinals.last().copied()
    }
}

/// A full-state snapshot bounding replay cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    /// Document the keyframe belongs to.
    pub document_id: DocumentId,
    /// Scope of the snapshotted log.
    pub scope: String,
    /// Branch of the snapshotted log.
    pub branch: String,
    /// Index of the first operation **not** covered by this snapshot.
    pub next_index: u64,
    /// The snapshotted state.
    pub state: serde_json::Value,
}

/// Configuration for an operation store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// A keyframe is retained every this many appended operations.
    pub keyframe_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 100,
        }
    }
}

/// Durable, append-only operation storage.
///
/// Logs are keyed by `(document_id, scope, branch)`. All mutation is
/// serialized through optimistic revision checks: `append` and `rewrite`
/// are compare-and-swap on the log revision and fail with
/// [`crate::StoreError::RevisionConflict`] when the caller's revision is
/// stale. No partial writes: a batch commits entirely or not at all.
pub trait OperationStore: Send + Sync {
    /// Creates a document with the given initial state.
    fn create_document(&self, document_id: &str, initial_state: serde_json::Value)
        -> StoreResult<()>;

    /// Deletes a document and every operation it owns.
    ///
    /// This is the only path that removes operations.
    fn delete_document(&self, document_id: &str) -> StoreResult<()>;

    /// Returns true if the document exists.
    fn contains(&self, document_id: &str) -> StoreResult<bool>;

    /// Returns the ids of all documents.
    fn document_ids(&self) -> StoreResult<Vec<DocumentId>>;

    /// Returns the current revision of a log.
    ///
    /// A log that has never been written has revision 0.
    fn revision(&self, document_id: &str, scope: &str, branch: &str) -> StoreResult<u64>;

    /// Transactionally appends operations to a log.
    ///
    /// `state` is the document state after the batch; the store retains it
    /// as a keyframe at the configured interval. Assigns one ordinal per
    /// operation, atomically with the append.
    fn append(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        expected_revision: u64,
        operations: Vec<Operation>,
        state: &serde_json::Value,
    ) -> StoreResult<AppliedBatch>;

    /// Transactionally replaces a log with a reconciled trunk.
    ///
    /// Used after a branch attach reshuffles the log. Operations whose id
    /// was already committed keep their ordinal; new operations are stamped
    /// with fresh ordinals.
    fn rewrite(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        expected_revision: u64,
        trunk: Vec<Operation>,
        state: &serde_json::Value,
    ) -> StoreResult<AppliedBatch>;

    /// Reads operations of a log starting at `from_index`.
    fn read(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        from_index: u64,
    ) -> StoreResult<Vec<Operation>>;

    /// Reads committed operations across all documents with ordinal
    /// strictly greater than `ordinal`, in commit order.
    fn read_since(&self, ordinal: Ordinal) -> StoreResult<Vec<CommittedOperation>>;

    /// Returns the highest ordinal assigned so far (0 if none).
    fn latest_ordinal(&self) -> StoreResult<Ordinal>;

    /// Returns the most recent keyframe of a log, if any.
    fn latest_keyframe(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> StoreResult<Option<Keyframe>>;

    /// Returns the initial state a document was created with.
    fn initial_state(&self, document_id: &str) -> StoreResult<serde_json::Value>;
}
