//! # docsync Store
//!
//! Durable operation storage and the in-memory write cache.
//!
//! This crate provides:
//! - [`OperationStore`]: the append-only, revision-checked storage trait,
//!   with keyframe snapshots and ordinal-cursor reads
//! - [`InMemoryOperationStore`]: the reference implementation
//! - [`WriteCache`]: a bounded LRU of document state with per-entry ring
//!   buffers of recent operations
//!
//! ## Key Invariants
//!
//! - The store is the single source of truth; the cache is best-effort and
//!   always reconstructable from a keyframe plus replay
//! - Appends are compare-and-swap on a per `(document, scope, branch)`
//!   revision; a stale revision fails, the caller reloads and retries
//! - Every committed operation is stamped with a strictly increasing global
//!   ordinal at commit time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod memory;
mod store;

pub use cache::{CacheConfig, CachedDocument, WriteCache};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryOperationStore;
pub use store::{AppliedBatch, CommittedOperation, Keyframe, OperationStore, Ordinal, StoreConfig};
