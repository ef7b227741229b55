//! Observable mailboxes holding in-flight sync operations.

use docsync_model::Operation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Delivery lifecycle of a [`SyncOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperationStatus {
    /// Waiting in a mailbox.
    Queued,
    /// Handed to the transport.
    Transported,
    /// Local application has begun.
    Started,
    /// Applied or delivered successfully.
    Acked,
    /// Delivery or application failed.
    Failed,
}

/// One or more operations travelling between reactors.
///
/// A sync operation lives in exactly one mailbox at a time.
#[derive(Debug, Clone)]
pub struct SyncOperation {
    /// Unique id of this batch.
    pub id: String,
    /// The remote this batch is travelling to or from.
    pub remote_name: String,
    /// The document the operations belong to.
    pub document_id: String,
    /// Scopes covered by the operations.
    pub scopes: Vec<String>,
    /// Branch the operations belong to.
    pub branch: String,
    /// The operations themselves.
    pub operations: Vec<Operation>,
    /// Delivery status.
    pub status: SyncOperationStatus,
}

impl SyncOperation {
    /// Creates a queued sync operation.
    pub fn new(
        remote_name: impl Into<String>,
        document_id: impl Into<String>,
        scopes: Vec<String>,
        branch: impl Into<String>,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            remote_name: remote_name.into(),
            document_id: document_id.into(),
            scopes,
            branch: branch.into(),
            operations,
            status: SyncOperationStatus::Queued,
        }
    }

    /// Returns a copy with the given status.
    pub fn with_status(mut self, status: SyncOperationStatus) -> Self {
        self.status = status;
        self
    }
}

type BatchObserver = Arc<dyn Fn(&[SyncOperation]) + Send + Sync>;

struct MailboxInner {
    items: Vec<SyncOperation>,
    paused: bool,
    buffered_added: Vec<SyncOperation>,
    buffered_removed: Vec<SyncOperation>,
    added_observers: Vec<(u64, BatchObserver)>,
    removed_observers: Vec<(u64, BatchObserver)>,
    next_observer: u64,
}

/// An observable queue of [`SyncOperation`]s.
///
/// A mailbox is owned exclusively by its channel and mutated only through
/// `add`/`remove`. Observers are notified in batches, outside the internal
/// lock, so a callback may re-enter the mailbox. While paused,
/// notifications are buffered and flushed on resume; the items themselves
/// are stored either way.
pub struct Mailbox {
    inner: Arc<Mutex<MailboxInner>>,
}

/// Handle returned by [`Mailbox::on_added`] / [`Mailbox::on_removed`].
pub struct ObserverHandle {
    id: u64,
    added: bool,
    inner: Arc<Mutex<MailboxInner>>,
}

impl ObserverHandle {
    /// Removes the observer from the mailbox.
    pub fn unsubscribe(self) {
        let mut inner = self.inner.lock();
        if self.added {
            inner.added_observers.retain(|(id, _)| *id != self.id);
        } else {
            inner.removed_observers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Mailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MailboxInner {
                items: Vec::new(),
                paused: false,
                buffered_added: Vec::new(),
                buffered_removed: Vec::new(),
                added_observers: Vec::new(),
                removed_observers: Vec::new(),
                next_observer: 0,
            })),
        }
    }

    /// Adds one sync operation.
    pub fn add(&self, operation: SyncOperation) {
        self.add_batch(vec![operation]);
    }

    /// Adds a batch of sync operations, notifying observers once.
    pub fn add_batch(&self, operations: Vec<SyncOperation>) {
        if operations.is_empty() {
            return;
        }
        let observers = {
            let mut inner = self.inner.lock();
            inner.items.extend(operations.iter().cloned());
            if inner.paused {
                inner.buffered_added.extend(operations.iter().cloned());
                return;
            }
            snapshot(&inner.added_observers)
        };
        notify(&observers, &operations);
    }

    /// Removes a sync operation by id, returning it.
    pub fn remove(&self, id: &str) -> Option<SyncOperation> {
        let (removed, observers) = {
            let mut inner = self.inner.lock();
            let pos = inner.items.iter().position(|op| op.id == id)?;
            let removed = inner.items.remove(pos);
            if inner.paused {
                inner.buffered_removed.push(removed.clone());
                return Some(removed);
            }
            (removed, snapshot(&inner.removed_observers))
        };
        notify(&observers, std::slice::from_ref(&removed));
        Some(removed)
    }

    /// Registers a batch observer for added operations.
    pub fn on_added(
        &self,
        callback: impl Fn(&[SyncOperation]) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.register(true, Arc::new(callback))
    }

    /// Registers a batch observer for removed operations.
    pub fn on_removed(
        &self,
        callback: impl Fn(&[SyncOperation]) + Send + Sync + 'static,
    ) -> ObserverHandle {
        self.register(false, Arc::new(callback))
    }

    fn register(&self, added: bool, callback: BatchObserver) -> ObserverHandle {
        let mut inner = self.inner.lock();
        let id = inner.next_observer;
        inner.next_observer += 1;
        if added {
            inner.added_observers.push((id, callback));
        } else {
            inner.removed_observers.push((id, callback));
        }
        ObserverHandle {
            id,
            added,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Updates the status of a stored operation in place.
    ///
    /// Status changes do not notify observers. Returns false if the id is
    /// not in the mailbox.
    pub fn set_status(&self, id: &str, status: SyncOperationStatus) -> bool {
        let mut inner = self.inner.lock();
        match inner.items.iter_mut().find(|op| op.id == id) {
            Some(op) => {
                op.status = status;
                true
            }
            None => false,
        }
    }

    /// Suspends observer notification; items are buffered.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Resumes notification, flushing everything buffered while paused.
    pub fn resume(&self) {
        let (added, removed, added_observers, removed_observers) = {
            let mut inner = self.inner.lock();
            inner.paused = false;
            (
                std::mem::take(&mut inner.buffered_added),
                std::mem::take(&mut inner.buffered_removed),
                snapshot(&inner.added_observers),
                snapshot(&inner.removed_observers),
            )
        };
        if !added.is_empty() {
            notify(&added_observers, &added);
        }
        if !removed.is_empty() {
            notify(&removed_observers, &removed);
        }
    }

    /// Returns a snapshot of the mailbox contents.
    pub fn items(&self) -> Vec<SyncOperation> {
        self.inner.lock().items.clone()
    }

    /// Returns true if the mailbox holds an operation with this id.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().items.iter().any(|op| op.id == id)
    }

    /// Number of operations in the mailbox.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns true if the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(observers: &[(u64, BatchObserver)]) -> Vec<BatchObserver> {
    observers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
}

fn notify(observers: &[BatchObserver], batch: &[SyncOperation]) {
    for observer in observers {
        observer(batch);
    }
}
