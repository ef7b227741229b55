//! Transport abstraction for sync channels.

use crate::error::{ChannelError, ChannelResult};
use crate::mailbox::SyncOperation;
use docsync_model::Operation;
use docsync_store::Ordinal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Channel registration metadata, upserted on the remote by `touch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    /// Unique channel id.
    pub channel_id: String,
    /// The remote this channel talks to.
    pub remote_name: String,
    /// Optional document filter; `None` means all documents.
    pub document_filter: Option<Vec<String>>,
}

/// What a poll returns.
///
/// A closed union: operation batches advance the cursor and land in the
/// inbox; control envelopes carry metadata updates only.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A batch of operations from the remote feed.
    Operations {
        /// The document the operations belong to.
        document_id: String,
        /// Scope of the operations.
        scope: String,
        /// Branch of the operations.
        branch: String,
        /// The operations, log order.
        operations: Vec<Operation>,
        /// Remote feed position after this envelope.
        cursor: Ordinal,
    },
    /// A metadata update from the remote.
    Control {
        /// The updated channel metadata.
        meta: ChannelMeta,
        /// Remote feed position, if the control message advances it.
        cursor: Option<Ordinal>,
    },
}

impl Envelope {
    /// Returns the feed cursor this envelope advances to, if any.
    pub fn cursor(&self) -> Option<Ordinal> {
        match self {
            Envelope::Operations { cursor, .. } => Some(*cursor),
            Envelope::Control { cursor, .. } => *cursor,
        }
    }
}

/// The request/response surface a channel needs from its transport.
///
/// Three calls: an idempotent registration, a cursor-based poll and a push.
/// Wire framing is the implementation's concern.
pub trait ChannelTransport: Send + Sync {
    /// Registers or refreshes the channel on the remote. Idempotent.
    fn touch(&self, meta: &ChannelMeta) -> ChannelResult<()>;

    /// Returns envelopes with feed position greater than `cursor`.
    fn poll(&self, channel_id: &str, cursor: Ordinal) -> ChannelResult<Vec<Envelope>>;

    /// Delivers a batch of local operations to the remote.
    fn push(&self, meta: &ChannelMeta, batch: &SyncOperation) -> ChannelResult<()>;
}

#[derive(Default)]
struct MockInner {
    touches: Vec<ChannelMeta>,
    pushes: Vec<SyncOperation>,
    poll_queue: VecDeque<Vec<Envelope>>,
}

/// A scriptable transport for tests.
///
/// Poll responses are consumed from a queue (empty queue polls return no
/// envelopes); pushes and touches are recorded. `set_failing` makes every
/// call return a transport error.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
    failing: AtomicBool,
}

impl MockTransport {
    /// Creates a mock transport that succeeds with empty polls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the envelopes the next poll returns.
    pub fn enqueue_poll(&self, envelopes: Vec<Envelope>) {
        self.inner.lock().poll_queue.push_back(envelopes);
    }

    /// Makes every call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Channel metadata recorded by `touch` calls.
    pub fn touches(&self) -> Vec<ChannelMeta> {
        self.inner.lock().touches.clone()
    }

    /// Batches recorded by `push` calls.
    pub fn pushes(&self) -> Vec<SyncOperation> {
        self.inner.lock().pushes.clone()
    }

    fn check(&self, remote: &str) -> ChannelResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport {
                remote: remote.to_string(),
                message: "mock failure".into(),
            });
        }
        Ok(())
    }
}

impl ChannelTransport for MockTransport {
    fn touch(&self, meta: &ChannelMeta) -> ChannelResult<()> {
        self.check(&meta.remote_name)?;
        self.inner.lock().touches.push(meta.clone());
        Ok(())
    }

    fn poll(&self, channel_id: &str, _cursor: Ordinal) -> ChannelResult<Vec<Envelope>> {
        self.check(channel_id)?;
        Ok(self.inner.lock().poll_queue.pop_front().unwrap_or_default())
    }

    fn push(&self, meta: &ChannelMeta, batch: &SyncOperation) -> ChannelResult<()> {
        self.check(&meta.remote_name)?;
        self.inner.lock().pushes.push(batch.clone());
        Ok(())
    }
}

/// One direction of an in-process feed.
#[derive(Default)]
struct Feed {
    envelopes: Vec<Envelope>,
}

impl Feed {
    fn publish(&mut self, batch: &SyncOperation) {
        // One envelope per scope so each lands on one log.
        for scope in &batch.scopes {
            let operations: Vec<Operation> = batch
                .operations
                .iter()
                .filter(|op| op.scope() == scope)
                .cloned()
                .collect();
            if operations.is_empty() {
                continue;
            }
            let cursor = self.envelopes.len() as Ordinal + 1;
            self.envelopes.push(Envelope::Operations {
                document_id: batch.document_id.clone(),
                scope: scope.clone(),
                branch: batch.branch.clone(),
                operations,
                cursor,
            });
        }
    }

    fn since(&self, cursor: Ordinal) -> Vec<Envelope> {
        self.envelopes
            .iter()
            .skip(cursor as usize)
            .cloned()
            .collect()
    }
}

/// One end of an in-process transport pair.
///
/// Pushes publish to the peer's feed; polls consume the own feed. Useful
/// for wiring two reactors together in tests without a network.
pub struct LoopbackTransport {
    incoming: Arc<Mutex<Feed>>,
    outgoing: Arc<Mutex<Feed>>,
}

/// Creates two connected loopback transports.
pub fn loopback_pair() -> (LoopbackTransport, LoopbackTransport) {
    let a_feed = Arc::new(Mutex::new(Feed::default()));
    let b_feed = Arc::new(Mutex::new(Feed::default()));
    (
        LoopbackTransport {
            incoming: Arc::clone(&a_feed),
            outgoing: Arc::clone(&b_feed),
        },
        LoopbackTransport {
            incoming: b_feed,
            outgoing: a_feed,
        },
    )
}

impl ChannelTransport for LoopbackTransport {
    fn touch(&self, _meta: &ChannelMeta) -> ChannelResult<()> {
        Ok(())
    }

    fn poll(&self, _channel_id: &str, cursor: Ordinal) -> ChannelResult<Vec<Envelope>> {
        Ok(self.incoming.lock().since(cursor))
    }

    fn push(&self, _meta: &ChannelMeta, batch: &SyncOperation) -> ChannelResult<()> {
        self.outgoing.lock().publish(batch);
        Ok(())
    }
}
