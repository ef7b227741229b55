//! # docsync Model
//!
//! Data model for the docsync operation log.
//!
//! Documents are represented as append-only, per-scope operation logs.
//! This crate provides:
//! - [`Action`]: a submitted intent, immutable once created
//! - [`Signature`] and [`Signer`]: the signing context carried by actions
//! - [`Operation`]: an action positioned in a reactor's view of the log
//! - Ordering, duplicate and equivalence rules over operations
//!
//! ## Key Invariants
//!
//! - Operation ids are derived deterministically from
//!   `(document_id, scope, branch, action_id)` and are stable across
//!   reshuffles
//! - Two operations are duplicates iff they share `(index, skip)` and
//!   `(type, input)`
//! - Two operations are equivalent iff they share `(index, timestamp)`,
//!   regardless of skip

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod error;
mod operation;

pub use action::{Action, ActionContext, Signature, Signer};
pub use error::{ModelError, ModelResult};
pub use operation::{
    derive_operation_id, is_duplicate, is_equivalent, last_index, next_index, same_position,
    sort_operations, Operation,
};

/// Identifier of a document.
pub type DocumentId = String;
