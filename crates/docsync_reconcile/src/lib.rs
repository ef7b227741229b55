//! # docsync Reconciliation Engine
//!
//! Algorithms that merge two divergent operation histories into one ordering
//! without data loss.
//!
//! This crate provides:
//! - [`prepare_operations`]: classify incoming operations against a history
//!   (valid / duplicated / invalid, with integrity issues for gaps)
//! - [`attach_branch`]: merge an alternate branch onto a trunk, splicing out
//!   superseded suffixes and returning the operations to replay
//! - [`check_operations_integrity`]: detect missing and duplicated indices
//!
//! ## Key Invariants
//!
//! - A gap poisons everything after it: once a missing index is detected,
//!   every later incoming operation is invalid, never valid
//! - Re-submitting an operation with the same `(index, skip, type, input)`
//!   never produces a second valid entry
//! - `attach_branch` output always passes the integrity check

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attach;
mod error;
mod integrity;
mod prepare;

pub use attach::attach_branch;
pub use error::{ReconcileError, ReconcileResult};
pub use integrity::{
    check_operations_integrity, first_gap_index, IntegrityIssue, IntegrityIssueKind,
};
pub use prepare::{prepare_operations, PreparedOperations};
