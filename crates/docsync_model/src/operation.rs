//! Operations: actions positioned in a reactor's view of the log.

use crate::action::Action;
use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An action positioned in this reactor's view of the operation log.
///
/// `index` is the operation's position in the log; `skip` counts how many
/// prior operations at conflicting positions this operation supersedes.
/// Operations are created once, never mutated, and only removed by full
/// document deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Deterministic operation id, stable across reshuffles.
    pub id: String,
    /// Position in the log.
    pub index: u64,
    /// Number of superseded operations at conflicting positions.
    pub skip: u64,
    /// UTC timestamp in milliseconds when the operation was produced.
    pub timestamp_utc_ms: u64,
    /// Hash of the document state after applying this operation.
    pub hash: String,
    /// Action-level error, if reduction failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resulting document state, if retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_state: Option<serde_json::Value>,
    /// The action that produced this operation.
    pub action: Action,
}

impl Operation {
    /// Creates an operation from an action at the given position.
    ///
    /// The operation id is derived deterministically from
    /// `(document_id, scope, branch, action_id)`. The action must target
    /// the log's scope.
    pub fn from_action(
        document_id: &str,
        scope: &str,
        branch: &str,
        action: Action,
        index: u64,
        skip: u64,
    ) -> ModelResult<Self> {
        if action.scope != scope {
            return Err(ModelError::ScopeMismatch {
                action_scope: action.scope,
                expected: scope.to_string(),
            });
        }
        let id = derive_operation_id(document_id, scope, branch, &action.id);
        let hash = action.hash()?;
        Ok(Self {
            id,
            index,
            skip,
            timestamp_utc_ms: action.timestamp_utc_ms,
            hash,
            error: None,
            resulting_state: None,
            action,
        })
    }

    /// Attaches an action-level error to this operation.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches the resulting state snapshot.
    pub fn with_resulting_state(mut self, state: serde_json::Value) -> Self {
        self.resulting_state = Some(state);
        self
    }

    /// Returns the scope this operation belongs to.
    pub fn scope(&self) -> &str {
        &self.action.scope
    }
}

/// Derives the deterministic id of an operation.
///
/// The id is stable across reshuffles: it does not cover `index` or `skip`.
pub fn derive_operation_id(document_id: &str, scope: &str, branch: &str, action_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0]);
    hasher.update(scope.as_bytes());
    hasher.update([0]);
    hasher.update(branch.as_bytes());
    hasher.update([0]);
    hasher.update(action_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true if both operations occupy the same `(index, skip)` position.
pub fn same_position(a: &Operation, b: &Operation) -> bool {
    a.index == b.index && a.skip == b.skip
}

/// Returns true if `a` and `b` are duplicates.
///
/// Duplicates share `(index, skip)` and carry the same `(type, input)`.
pub fn is_duplicate(a: &Operation, b: &Operation) -> bool {
    same_position(a, b)
        && a.action.action_type == b.action.action_type
        && a.action.input == b.action.input
}

/// Returns true if `a` and `b` are conflicting-but-equivalent.
///
/// Equivalence is judged by `(index, timestamp)` regardless of skip. It
/// collapses churn from repeated reshuffles that only renumber the skip
/// counter of the same logical edit.
pub fn is_equivalent(a: &Operation, b: &Operation) -> bool {
    a.index == b.index && a.timestamp_utc_ms == b.timestamp_utc_ms
}

/// Sorts operations by `(index, skip)`.
pub fn sort_operations(operations: &mut [Operation]) {
    operations.sort_by_key(|op| (op.index, op.skip));
}

/// Returns the highest index in the slice, if any.
pub fn last_index(operations: &[Operation]) -> Option<u64> {
    operations.iter().map(|op| op.index).max()
}

/// Returns the next expected index after the slice.
pub fn next_index(operations: &[Operation]) -> u64 {
    last_index(operations).map(|i| i + 1).unwrap_or(0)
}
