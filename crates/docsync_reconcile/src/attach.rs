//! Merging an alternate branch history onto a trunk.

use crate::error::{ReconcileError, ReconcileResult};
use crate::integrity::check_operations_integrity;
use docsync_model::{is_duplicate, is_equivalent, sort_operations, Operation};

/// Merges an alternate `branch` history onto `trunk`.
///
/// Returns `(new_trunk, tail)`:
///
/// - trunk operations before the first index the branch covers form the
///   common prefix
/// - from that point on, branch operations replace the corresponding trunk
///   operations
/// - fully overlapping skips at the same branch index collapse to the single
///   highest-skip operation
/// - displaced trunk operations fall in one of three buckets: duplicated by
///   a branch operation (exactly or by `(index, timestamp)` equivalence) and
///   dropped, superseded by a branch operation's skip range and dropped, or
///   neither and returned as `tail` to be replayed on top of the new trunk
///
/// The merged trunk is always re-checked for integrity; a merge that would
/// produce a gapped or duplicated history is an error, never a silent
/// corruption.
pub fn attach_branch(
    trunk: &[Operation],
    branch: &[Operation],
) -> ReconcileResult<(Vec<Operation>, Vec<Operation>)> {
    if branch.is_empty() {
        return Ok((trunk.to_vec(), Vec::new()));
    }

    let mut branch = branch.to_vec();
    sort_operations(&mut branch);
    let branch = collapse_overlapping_skips(branch);

    if trunk.is_empty() {
        ensure_integrity(&branch)?;
        return Ok((branch, Vec::new()));
    }

    let mut trunk = trunk.to_vec();
    sort_operations(&mut trunk);

    // Everything strictly before the first index the branch covers is
    // common prefix. A leading branch operation with a skip reaches back
    // over the indices it supersedes.
    let cut = branch[0].index.saturating_sub(branch[0].skip);
    let mut new_trunk: Vec<Operation> =
        trunk.iter().filter(|op| op.index < cut).cloned().collect();

    let displaced: Vec<&Operation> = trunk.iter().filter(|op| op.index >= cut).collect();

    new_trunk.extend(branch.iter().cloned());

    let tail: Vec<Operation> = displaced
        .into_iter()
        .filter(|t| {
            !branch
                .iter()
                .any(|b| is_duplicate(t, b) || is_equivalent(t, b) || supersedes(b, t))
        })
        .cloned()
        .collect();

    ensure_integrity(&new_trunk)?;
    Ok((new_trunk, tail))
}

/// Returns true if `b`'s skip range supersedes `t`.
fn supersedes(b: &Operation, t: &Operation) -> bool {
    b.skip > 0 && t.index < b.index && t.index >= b.index.saturating_sub(b.skip)
}

/// Collapses operations sharing an index to the highest-skip version.
///
/// A sequence like `B4:0, B4:2` is churn from repeated reshuffles of the
/// same position; only the highest skip survives.
fn collapse_overlapping_skips(sorted: Vec<Operation>) -> Vec<Operation> {
    let mut collapsed: Vec<Operation> = Vec::with_capacity(sorted.len());
    for op in sorted {
        match collapsed.last_mut() {
            Some(last) if last.index == op.index => {
                // Sorted by (index, skip), so `op` has the higher skip.
                *last = op;
            }
            _ => collapsed.push(op),
        }
    }
    collapsed
}

fn ensure_integrity(operations: &[Operation]) -> ReconcileResult<()> {
    let issues = check_operations_integrity(operations);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::IntegrityViolation { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_model::Action;
    use serde_json::json;

    fn make_op(tag: &str, index: u64, skip: u64) -> Operation {
        // Distinct tags give distinct timestamps and payloads.
        let timestamp = 1_000
            + index * 100
            + skip * 10
            + tag.bytes().map(u64::from).sum::<u64>() % 10;
        let action =
            Action::new("SET", json!({"tag": tag, "i": index}), "global").with_timestamp(timestamp);
        Operation::from_action("doc-1", "global", "main", action, index, skip).unwrap()
    }

    fn positions(ops: &[Operation]) -> Vec<(u64, u64)> {
        ops.iter().map(|op| (op.index, op.skip)).collect()
    }

    #[test]
    fn empty_branch_is_identity() {
        let trunk = vec![make_op("t0", 0, 0), make_op("t1", 1, 0)];
        let (new_trunk, tail) = attach_branch(&trunk, &[]).unwrap();
        assert_eq!(new_trunk, trunk);
        assert!(tail.is_empty());
    }

    #[test]
    fn empty_trunk_adopts_branch() {
        let branch = vec![make_op("b0", 0, 0), make_op("b1", 1, 0)];
        let (new_trunk, tail) = attach_branch(&[], &branch).unwrap();
        assert_eq!(new_trunk, branch);
        assert!(tail.is_empty());
    }

    #[test]
    fn attach_is_idempotent() {
        let trunk = vec![
            make_op("t0", 0, 0),
            make_op("t1", 1, 0),
            make_op("t2", 2, 0),
        ];
        let (new_trunk, tail) = attach_branch(&trunk, &trunk).unwrap();
        assert_eq!(new_trunk, trunk);
        assert!(tail.is_empty());
    }

    #[test]
    fn overlapping_branch_replaces_suffix_and_yields_tail() {
        // trunk [T0..T3], branch [B3, B4] overlapping at index 3.
        let trunk = vec![
            make_op("t0", 0, 0),
            make_op("t1", 1, 0),
            make_op("t2", 2, 0),
            make_op("t3", 3, 0),
        ];
        let branch = vec![make_op("b3", 3, 0), make_op("b4", 4, 0)];

        let (new_trunk, tail) = attach_branch(&trunk, &branch).unwrap();

        assert_eq!(
            positions(&new_trunk),
            vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]
        );
        assert_eq!(new_trunk[3], branch[0]);
        assert_eq!(new_trunk[4], branch[1]);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0], trunk[3]);
    }

    #[test]
    fn overlapping_skips_collapse_to_highest() {
        let trunk = vec![
            make_op("t0", 0, 0),
            make_op("t1", 1, 0),
            make_op("t2", 2, 0),
            make_op("t3", 3, 0),
        ];
        // B4:0 then B4:2 at the same index: only the highest skip survives,
        // and its skip supersedes the displaced trunk indices 2-3.
        let branch = vec![make_op("b4a", 4, 0), make_op("b4b", 4, 2)];

        let (new_trunk, tail) = attach_branch(&trunk, &branch).unwrap();
        assert_eq!(positions(&new_trunk), vec![(0, 0), (1, 0), (4, 2)]);
        assert!(tail.is_empty());
    }

    #[test]
    fn equivalent_trunk_operation_is_not_replayed() {
        let trunk = vec![
            make_op("t0", 0, 0),
            make_op("t1", 1, 0),
            make_op("t2", 2, 0),
        ];
        // Same logical edit as t2 but renumbered with a higher skip and the
        // same timestamp: an irrelevant skip difference. Its skip reaches
        // back over index 1.
        let mut reshuffled = trunk[2].clone();
        reshuffled.skip = 1;

        let (new_trunk, tail) = attach_branch(&trunk, &[reshuffled.clone()]).unwrap();
        assert_eq!(positions(&new_trunk), vec![(0, 0), (2, 1)]);
        assert_eq!(new_trunk[1], reshuffled);
        assert!(tail.is_empty());
    }

    #[test]
    fn disjoint_branch_beyond_trunk_end_fails_integrity() {
        let trunk = vec![make_op("t0", 0, 0), make_op("t1", 1, 0)];
        let branch = vec![make_op("b5", 5, 0)];

        let result = attach_branch(&trunk, &branch);
        assert!(matches!(
            result,
            Err(ReconcileError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn merged_trunk_passes_integrity_check() {
        let trunk = vec![
            make_op("t0", 0, 0),
            make_op("t1", 1, 0),
            make_op("t2", 2, 0),
            make_op("t3", 3, 0),
        ];
        let branch = vec![make_op("b2", 2, 0), make_op("b3", 3, 0)];

        let (new_trunk, tail) = attach_branch(&trunk, &branch).unwrap();
        assert!(check_operations_integrity(&new_trunk).is_empty());
        // t2 and t3 were replaced and must be replayed.
        assert_eq!(positions(&tail), vec![(2, 0), (3, 0)]);
    }
}
