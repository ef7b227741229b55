//! # docsync Channel
//!
//! Inter-reactor synchronization: moving committed operations between
//! reactors and re-entering them through the load pipeline.
//!
//! This crate provides:
//! - [`Mailbox`]: observable inbox/outbox/dead-letter queues
//! - [`RemoteCursor`] and [`CursorStore`]: per-remote feed positions
//! - [`ChannelTransport`]: the poll/push transport seam, with
//!   [`MockTransport`] and an in-process [`loopback_pair`]
//! - [`Channel`]: the per-remote poll and transmit loops with exponential
//!   backoff and health reporting
//! - [`SyncStatusTracker`]: per-document sync status aggregation
//! - [`SyncManager`]: channel ownership and reactor wiring
//!
//! ## Architecture
//!
//! Each tracked remote owns one channel with three mailboxes. Local
//! commits fan out into outboxes and are pushed by the channel's transmit
//! thread; polls pull remote envelopes into the inbox, which the manager
//! turns into load jobs on the reactor. Delivery is at-least-once: the
//! receiving reactor deduplicates through its reconciliation pipeline.
//!
//! ## Key Invariants
//!
//! - Mailboxes are owned by their channel and mutated only through
//!   `add`/`remove`
//! - Cursors advance monotonically and are deleted when a remote is
//!   untracked
//! - One remote's failures never affect another channel; a halted channel
//!   stays halted until explicitly restarted
//! - Channel loops never block the job executor

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod cursor;
mod error;
mod mailbox;
mod manager;
mod status;
mod transport;

pub use channel::{Channel, ChannelConfig, ChannelHealth, ChannelStats};
pub use cursor::{CursorStore, RemoteCursor};
pub use error::{ChannelError, ChannelResult};
pub use mailbox::{Mailbox, ObserverHandle, SyncOperation, SyncOperationStatus};
pub use manager::SyncManager;
pub use status::{DocumentSyncStatus, StatusSubscription, SyncStatusTracker};
pub use transport::{loopback_pair, ChannelMeta, ChannelTransport, Envelope, LoopbackTransport, MockTransport};
