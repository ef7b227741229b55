//! Integrity checks over cleaned operation histories.

use docsync_model::Operation;
use std::fmt;

/// Kind of integrity issue found in a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityIssueKind {
    /// An index is missing: the history has a gap.
    MissingIndex,
    /// An index is occupied more than once.
    DuplicatedIndex,
}

/// A single integrity issue found in a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    /// The kind of issue.
    pub kind: IntegrityIssueKind,
    /// The index where the issue was detected.
    pub index: u64,
    /// Id of the operation that revealed the issue, if any.
    pub op_id: Option<String>,
}

impl IntegrityIssue {
    /// Creates a missing-index issue.
    pub fn missing(index: u64, op_id: Option<String>) -> Self {
        Self {
            kind: IntegrityIssueKind::MissingIndex,
            index,
            op_id,
        }
    }

    /// Creates a duplicated-index issue.
    pub fn duplicated(index: u64, op_id: Option<String>) -> Self {
        Self {
            kind: IntegrityIssueKind::DuplicatedIndex,
            index,
            op_id,
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IntegrityIssueKind::MissingIndex => write!(f, "missing index {}", self.index),
            IntegrityIssueKind::DuplicatedIndex => write!(f, "duplicated index {}", self.index),
        }
    }
}

/// Checks a cleaned history for missing and duplicated indices.
///
/// Operations must be sorted by `(index, skip)`. An operation with skip `s`
/// at index `i` accounts for positions `i - s ..= i`, so a history like
/// `[(1, skip 1), (3, skip 1)]` is contiguous: the skips cover indices 0
/// and 2.
///
/// Returns the list of issues found; an empty list means the history is
/// clean.
pub fn check_operations_integrity(operations: &[Operation]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let mut expected: u64 = 0;

    for op in operations {
        let start = op.index.saturating_sub(op.skip);

        if op.index < expected {
            issues.push(IntegrityIssue::duplicated(op.index, Some(op.id.clone())));
            continue;
        }
        if start > expected {
            issues.push(IntegrityIssue::missing(expected, Some(op.id.clone())));
        }
        expected = op.index + 1;
    }

    issues
}

/// Returns the first genuinely missing index of a history, if any.
///
/// Every operation whose index is at or beyond the first gap is
/// provisionally invalid until the gap is filled.
pub fn first_gap_index(operations: &[Operation]) -> Option<u64> {
    let mut expected: u64 = 0;

    for op in operations {
        let start = op.index.saturating_sub(op.skip);
        if op.index < expected {
            continue;
        }
        if start > expected {
            return Some(expected);
        }
        expected = op.index + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_model::Action;
    use serde_json::json;

    fn make_op(index: u64, skip: u64) -> Operation {
        let action = Action::new("SET", json!({"i": index}), "global").with_timestamp(index);
        Operation::from_action("doc-1", "global", "main", action, index, skip).unwrap()
    }

    #[test]
    fn contiguous_history_is_clean() {
        let ops = vec![make_op(0, 0), make_op(1, 0), make_op(2, 0)];
        assert!(check_operations_integrity(&ops).is_empty());
        assert_eq!(first_gap_index(&ops), None);
    }

    #[test]
    fn skips_cover_superseded_indices() {
        // (1, skip 1) covers 0-1, (3, skip 1) covers 2-3.
        let ops = vec![make_op(1, 1), make_op(3, 1)];
        assert!(check_operations_integrity(&ops).is_empty());
        assert_eq!(first_gap_index(&ops), None);
    }

    #[test]
    fn detects_missing_index() {
        let ops = vec![make_op(0, 0), make_op(2, 0)];
        let issues = check_operations_integrity(&ops);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IntegrityIssueKind::MissingIndex);
        assert_eq!(issues[0].index, 1);
        assert_eq!(first_gap_index(&ops), Some(1));
    }

    #[test]
    fn detects_duplicated_index() {
        let ops = vec![make_op(0, 0), make_op(1, 0), make_op(1, 0)];
        let issues = check_operations_integrity(&ops);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IntegrityIssueKind::DuplicatedIndex);
        assert_eq!(issues[0].index, 1);
    }

    #[test]
    fn empty_history_is_clean() {
        assert!(check_operations_integrity(&[]).is_empty());
        assert_eq!(first_gap_index(&[]), None);
    }

    #[test]
    fn history_not_starting_at_zero_has_gap() {
        let ops = vec![make_op(2, 0), make_op(3, 0)];
        assert_eq!(first_gap_index(&ops), Some(0));
    }
}
