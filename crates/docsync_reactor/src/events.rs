//! Document-changed events.

use docsync_store::CommittedOperation;
use parking_lot::RwLock;
use std::sync::Arc;

/// Where a committed batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Actions submitted to this reactor.
    Local,
    /// Operations loaded from a remote.
    Remote,
}

/// Emitted after a batch of operations commits to one log.
///
/// Events are delivered synchronously and deterministically after the
/// state mutation, batched per commit.
#[derive(Debug, Clone)]
pub struct DocumentChangedEvent {
    /// The document that changed.
    pub document_id: String,
    /// Scope of the changed log.
    pub scope: String,
    /// Branch of the changed log.
    pub branch: String,
    /// Whether the commit was a local mutation or a remote load.
    pub origin: ChangeOrigin,
    /// The newly committed operations with their ordinals, commit order.
    pub operations: Vec<CommittedOperation>,
}

type Callback = Box<dyn Fn(&DocumentChangedEvent) + Send + Sync>;

struct Registration {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Registration>,
    next_id: u64,
}

/// Subscription list for document-changed events.
///
/// Subscribing returns an explicit unsubscribe handle. Callbacks run on
/// the emitting thread, in subscription order.
#[derive(Default)]
pub struct EventBus {
    inner: Arc<RwLock<BusInner>>,
}

/// Handle returned by [`EventBus::subscribe`]; unsubscribes explicitly.
pub struct Subscription {
    id: u64,
    inner: Arc<RwLock<BusInner>>,
}

impl Subscription {
    /// Removes the subscription from the bus.
    pub fn unsubscribe(self) {
        self.inner.write().subscribers.retain(|r| r.id != self.id);
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback; returns its unsubscribe handle.
    pub fn subscribe(
        &self,
        callback: impl Fn(&DocumentChangedEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Registration {
            id,
            callback: Box::new(callback),
        });
        Subscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Delivers an event to every subscriber, in subscription order.
    pub fn emit(&self, event: &DocumentChangedEvent) {
        // Snapshot under the read lock is not possible without cloning the
        // boxed callbacks; hold the read lock for the synchronous delivery
        // instead. Subscribing from within a callback would deadlock and is
        // not supported.
        let inner = self.inner.read();
        for registration in &inner.subscribers {
            (registration.callback)(event);
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn make_event(doc: &str) -> DocumentChangedEvent {
        DocumentChangedEvent {
            document_id: doc.into(),
            scope: "global".into(),
            branch: "main".into(),
            origin: ChangeOrigin::Local,
            operations: vec![],
        }
    }

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let _sub_a = bus.subscribe(move |e| seen_a.lock().push(format!("a:{}", e.document_id)));
        let seen_b = Arc::clone(&seen);
        let _sub_b = bus.subscribe(move |e| seen_b.lock().push(format!("b:{}", e.document_id)));

        bus.emit(&make_event("doc-1"));
        assert_eq!(*seen.lock(), vec!["a:doc-1", "b:doc-1"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let seen_cb = Arc::clone(&seen);
        let sub = bus.subscribe(move |_| *seen_cb.lock() += 1);

        bus.emit(&make_event("doc-1"));
        sub.unsubscribe();
        bus.emit(&make_event("doc-1"));

        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
