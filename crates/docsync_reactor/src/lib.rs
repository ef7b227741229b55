//! # docsync Reactor
//!
//! The document engine: every write flows through its job pipeline.
//!
//! This crate provides:
//! - [`Reactor`]: the facade, one per store
//! - [`Job`], [`JobQueue`]: the unit of work and the shared queue that
//!   serializes jobs per `(document, scope, branch)` log
//! - [`Reducer`]: the pluggable business-logic seam
//! - [`SignatureVerifier`]: action verification ahead of persistence
//! - [`EventBus`]: per-commit document-changed events
//! - [`ConsistencyTracker`] and [`ReadModelHost`]: read-after-write tokens
//!   and exactly-once read-model indexing
//!
//! ## Architecture
//!
//! Submissions enqueue a job and return its id. Worker threads pick up
//! jobs, verify signatures, reduce actions into state and persist the
//! resulting operations with an optimistic revision check; a conflict is
//! retried within the job's budget. After a commit the reactor emits one
//! event, advances the consistency tracker and drives registered read
//! models forward.
//!
//! ## Key Invariants
//!
//! - Jobs for the same log never run concurrently
//! - A reducer failure becomes a failed operation; it never corrupts state
//!   and never aborts the batch
//! - Signature verification happens before any state mutation
//! - Read models index each committed operation exactly once, gated by a
//!   persisted ordinal checkpoint

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod consistency;
mod error;
mod events;
mod executor;
mod job;
mod queue;
mod reactor;
mod read_model;
mod reducer;
mod verify;

pub use consistency::{ConsistencyToken, ConsistencyTracker};
pub use error::{ReactorError, ReactorResult};
pub use events::{ChangeOrigin, DocumentChangedEvent, EventBus, Subscription};
pub use job::{Job, JobKind, JobState, JobStatus};
pub use queue::JobQueue;
pub use reactor::{Reactor, ReactorBuilder, ReactorConfig};
pub use read_model::{ReadModel, ReadModelHost, ViewStateStore};
pub use reducer::{JsonMergeReducer, Reducer, ReducerError};
pub use verify::{verify_actions, AcceptAllVerifier, SignatureVerifier};
