//! Classification of incoming operations against a history.

use crate::integrity::{first_gap_index, IntegrityIssue};
use docsync_model::{is_duplicate, is_equivalent, next_index, sort_operations, Operation};

/// The result of classifying incoming operations against a history.
///
/// Every incoming operation lands in exactly one of the three operation
/// buckets. `integrity_issues` records the gaps that were detected: the
/// history's own first gap (if any) and the first gap in the incoming
/// stream.
#[derive(Debug, Clone, Default)]
pub struct PreparedOperations {
    /// Operations that extend the history at the expected position.
    pub valid_operations: Vec<Operation>,
    /// Operations already present in the history or earlier in the batch.
    pub duplicated_operations: Vec<Operation>,
    /// Operations poisoned by a gap or conflicting with committed history.
    pub invalid_operations: Vec<Operation>,
    /// Gaps detected while classifying.
    pub integrity_issues: Vec<IntegrityIssue>,
}

/// Classifies `incoming` operations against an already-clean `history`.
///
/// This models at-most-once application under unordered, duplicated network
/// delivery while preserving strict ordering:
///
/// - a duplicate of an operation in the history or earlier in the batch is
///   routed to `duplicated_operations` and does not advance the expected
///   index
/// - an operation at the expected index (accounting for its skip) is valid
/// - an operation that skips ahead opens a gap; the gap is recorded as an
///   integrity issue and **every** subsequent operation is invalid, even
///   ones that would otherwise be valid or duplicated
/// - if the history itself has a first gap, every incoming operation at or
///   beyond it is invalid until the gap is filled
pub fn prepare_operations(history: &[Operation], incoming: Vec<Operation>) -> PreparedOperations {
    let mut history = history.to_vec();
    sort_operations(&mut history);
    let mut incoming = incoming;
    sort_operations(&mut incoming);

    let history_gap = first_gap_index(&history);
    let mut next_expected = next_index(&history);

    let mut result = PreparedOperations::default();
    if let Some(gap) = history_gap {
        result.integrity_issues.push(IntegrityIssue::missing(gap, None));
    }

    let mut incoming_gap_found = false;

    for op in incoming {
        // A gap freezes validity for everything after it, duplicates
        // included.
        if incoming_gap_found {
            result.invalid_operations.push(op);
            continue;
        }
        if matches!(history_gap, Some(gap) if op.index >= gap) {
            result.invalid_operations.push(op);
            continue;
        }

        let duplicated = history.iter().any(|h| is_duplicate(h, &op))
            || result
                .valid_operations
                .iter()
                .chain(result.duplicated_operations.iter())
                .any(|seen| is_duplicate(seen, &op));
        if duplicated {
            result.duplicated_operations.push(op);
            continue;
        }

        // Same logical edit reshuffled to a different skip counter.
        let equivalent = history.iter().any(|h| is_equivalent(h, &op))
            || result.valid_operations.iter().any(|v| is_equivalent(v, &op));
        if equivalent {
            result.duplicated_operations.push(op);
            continue;
        }

        let start = op.index.saturating_sub(op.skip);
        if op.index >= next_expected && start <= next_expected {
            next_expected = op.index + 1;
            result.valid_operations.push(op);
        } else if start > next_expected {
            result
                .integrity_issues
                .push(IntegrityIssue::missing(next_expected, Some(op.id.clone())));
            incoming_gap_found = true;
            result.invalid_operations.push(op);
        } else {
            // Behind the expected index but not a duplicate: conflicts with
            // committed history and must go through a branch attach instead.
            result.invalid_operations.push(op);
        }
    }

    result
}
