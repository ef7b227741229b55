//! Error types for the reconciliation engine.

use crate::integrity::IntegrityIssue;
use thiserror::Error;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A merged history failed the integrity check.
    ///
    /// This is surfaced, never silently skipped: the merge produced a
    /// history with missing or duplicated indices.
    #[error("integrity violation: {} issue(s), first: {}", issues.len(), first_message(issues))]
    IntegrityViolation {
        /// The issues found in the merged history.
        issues: Vec<IntegrityIssue>,
    },
}

fn first_message(issues: &[IntegrityIssue]) -> String {
    issues
        .first()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "none".into())
}
