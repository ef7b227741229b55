//! Wiring channels to the local reactor.

use crate::channel::{Channel, ChannelConfig};
use crate::cursor::{CursorStore, RemoteCursor};
use crate::error::{ChannelError, ChannelResult};
use crate::mailbox::{ObserverHandle, SyncOperation, SyncOperationStatus};
use crate::status::SyncStatusTracker;
use crate::transport::ChannelTransport;
use docsync_model::Operation;
use docsync_reactor::{ChangeOrigin, DocumentChangedEvent, Reactor, Subscription};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

struct ChannelEntry {
    channel: Arc<Channel>,
    inbox_observer: Option<ObserverHandle>,
}

/// Owns one channel per tracked remote and wires them to the reactor.
///
/// Local commits fan out to every channel's outbox; inbound batches become
/// load jobs on the reactor. Commits that originated from a remote load
/// carry [`ChangeOrigin::Remote`] and are not broadcast back out.
pub struct SyncManager {
    reactor: Arc<Reactor>,
    cursors: Arc<CursorStore>,
    status: Arc<SyncStatusTracker>,
    config: ChannelConfig,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    event_subscription: Mutex<Option<Subscription>>,
}

impl SyncManager {
    /// Creates a manager over a reactor with default channel configuration.
    pub fn new(reactor: Arc<Reactor>) -> Arc<Self> {
        Self::with_config(reactor, ChannelConfig::default())
    }

    /// Creates a manager with the given channel configuration.
    pub fn with_config(reactor: Arc<Reactor>, config: ChannelConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            reactor: Arc::clone(&reactor),
            cursors: Arc::new(CursorStore::new()),
            status: Arc::new(SyncStatusTracker::new()),
            config,
            channels: RwLock::new(HashMap::new()),
            event_subscription: Mutex::new(None),
        });

        let fan_out = Arc::downgrade(&manager);
        let subscription = reactor.subscribe(move |event| {
            if let Some(manager) = fan_out.upgrade() {
                manager.on_local_commit(event);
            }
        });
        *manager.event_subscription.lock() = Some(subscription);

        manager
    }

    /// Tracks a remote: creates its channel, wires the inbox to the
    /// reactor and starts polling. Tracking an already-tracked remote
    /// returns the existing channel.
    pub fn track_remote(
        &self,
        remote_name: &str,
        transport: Arc<dyn ChannelTransport>,
    ) -> ChannelResult<Arc<Channel>> {
        if let Some(entry) = self.channels.read().get(remote_name) {
            return Ok(Arc::clone(&entry.channel));
        }

        let channel = Channel::new(
            remote_name,
            transport,
            Arc::clone(&self.cursors),
            Arc::clone(&self.status),
            self.config.clone(),
        );

        let reactor = Arc::clone(&self.reactor);
        let inbox = Arc::clone(channel.inbox());
        let dead_letter = Arc::clone(channel.dead_letter());
        let inbox_observer = channel.inbox().on_added(move |batch| {
            for sync_op in batch {
                inbox.set_status(&sync_op.id, SyncOperationStatus::Started);
                let failed = !enqueue_load(&reactor, sync_op);
                // Consumed either way; failures are parked for inspection.
                if let Some(removed) = inbox.remove(&sync_op.id) {
                    if failed {
                        dead_letter.add(removed.with_status(SyncOperationStatus::Failed));
                    }
                }
            }
        });

        channel.start()?;
        self.channels.write().insert(
            remote_name.to_string(),
            ChannelEntry {
                channel: Arc::clone(&channel),
                inbox_observer: Some(inbox_observer),
            },
        );
        Ok(channel)
    }

    /// Untracks a remote: halts its channel and cascades the cursor delete.
    pub fn untrack_remote(&self, remote_name: &str) -> ChannelResult<()> {
        let mut entry = self.channels.write().remove(remote_name).ok_or_else(|| {
            ChannelError::UnknownRemote {
                remote: remote_name.to_string(),
            }
        })?;
        if let Some(observer) = entry.inbox_observer.take() {
            observer.unsubscribe();
        }
        entry.channel.halt();
        self.cursors.remove(remote_name);
        Ok(())
    }

    /// Returns the channel for a remote, if tracked.
    pub fn channel(&self, remote_name: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .get(remote_name)
            .map(|entry| Arc::clone(&entry.channel))
    }

    /// Names of all tracked remotes, sorted.
    pub fn remotes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The per-document status tracker.
    pub fn status(&self) -> &Arc<SyncStatusTracker> {
        &self.status
    }

    /// The remote cursor table.
    pub fn cursors(&self) -> Vec<RemoteCursor> {
        self.cursors.list()
    }

    /// Halts every channel and stops observing the reactor.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.event_subscription.lock().take() {
            subscription.unsubscribe();
        }
        let entries: Vec<ChannelEntry> = {
            let mut channels = self.channels.write();
            channels.drain().map(|(_, entry)| entry).collect()
        };
        for mut entry in entries {
            if let Some(observer) = entry.inbox_observer.take() {
                observer.unsubscribe();
            }
            entry.channel.halt();
        }
    }

    fn on_local_commit(&self, event: &DocumentChangedEvent) {
        // Remote-originated commits stay where they landed; only local
        // mutations fan out. A node therefore does not relay third-party
        // operations onward.
        if event.origin == ChangeOrigin::Remote {
            return;
        }
        let operations: Vec<Operation> = event
            .operations
            .iter()
            .map(|committed| committed.operation.clone())
            .collect();
        if operations.is_empty() {
            return;
        }

        let channels: Vec<Arc<Channel>> = self
            .channels
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.channel))
            .collect();
        for channel in channels {
            channel.outbox().add(SyncOperation::new(
                channel.remote_name(),
                &event.document_id,
                vec![event.scope.clone()],
                &event.branch,
                operations.clone(),
            ));
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turns one inbound batch into load jobs, one per scope.
///
/// Returns false if any enqueue failed.
fn enqueue_load(reactor: &Reactor, sync_op: &SyncOperation) -> bool {
    let mut ok = true;
    for scope in &sync_op.scopes {
        let operations: Vec<Operation> = sync_op
            .operations
            .iter()
            .filter(|op| op.scope() == scope)
            .cloned()
            .collect();
        if operations.is_empty() {
            continue;
        }
        if let Err(err) =
            reactor.load_operations(&sync_op.document_id, scope, &sync_op.branch, operations)
        {
            tracing::warn!(
                document = %sync_op.document_id,
                scope = %scope,
                error = %err,
                "enqueueing inbound batch failed",
            );
            ok = false;
        }
    }
    ok
}
