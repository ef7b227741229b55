//! Per-document sync status aggregation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The aggregated sync state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSyncStatus {
    /// No outstanding traffic in either direction.
    Synced,
    /// Outbox items pending transmission.
    Outgoing,
    /// Inbox items pending local application.
    Incoming,
    /// Traffic pending in both directions.
    OutgoingAndIncoming,
    /// Dead-lettered operations exist; wins over every other state.
    Error,
}

type StatusObserver = Arc<dyn Fn(&str, DocumentSyncStatus) + Send + Sync>;

#[derive(Default)]
struct TrackerInner {
    outgoing: HashMap<String, usize>,
    incoming: HashMap<String, usize>,
    dead: HashMap<String, usize>,
    current: HashMap<String, DocumentSyncStatus>,
    observers: Vec<(u64, StatusObserver)>,
    next_observer: u64,
}

impl TrackerInner {
    fn compute(&self, document_id: &str) -> DocumentSyncStatus {
        let count = |map: &HashMap<String, usize>| map.get(document_id).copied().unwrap_or(0);
        if count(&self.dead) > 0 {
            return DocumentSyncStatus::Error;
        }
        match (count(&self.outgoing) > 0, count(&self.incoming) > 0) {
            (true, true) => DocumentSyncStatus::OutgoingAndIncoming,
            (true, false) => DocumentSyncStatus::Outgoing,
            (false, true) => DocumentSyncStatus::Incoming,
            (false, false) => DocumentSyncStatus::Synced,
        }
    }
}

/// Aggregates mailbox traffic into one status per document.
///
/// Channels report mailbox movements; subscribers are notified exactly once
/// per actual transition, never for movements that leave the computed
/// status unchanged.
#[derive(Default)]
pub struct SyncStatusTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

/// Handle returned by [`SyncStatusTracker::subscribe`].
pub struct StatusSubscription {
    id: u64,
    inner: Arc<Mutex<TrackerInner>>,
}

impl StatusSubscription {
    /// Removes the subscription.
    pub fn unsubscribe(self) {
        self.inner.lock().observers.retain(|(id, _)| *id != self.id);
    }
}

impl SyncStatusTracker {
    /// Creates a tracker with every document implicitly `Synced`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current status of a document.
    pub fn status(&self, document_id: &str) -> DocumentSyncStatus {
        let inner = self.inner.lock();
        inner
            .current
            .get(document_id)
            .copied()
            .unwrap_or(DocumentSyncStatus::Synced)
    }

    /// Subscribes to status transitions.
    pub fn subscribe(
        &self,
        callback: impl Fn(&str, DocumentSyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let mut inner = self.inner.lock();
        let id = inner.next_observer;
        inner.next_observer += 1;
        inner.observers.push((id, Arc::new(callback)));
        StatusSubscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Records outbox arrivals for a document.
    pub fn outbox_added(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Outgoing, count as isize);
    }

    /// Records outbox departures for a document.
    pub fn outbox_removed(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Outgoing, -(count as isize));
    }

    /// Records inbox arrivals for a document.
    pub fn inbox_added(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Incoming, count as isize);
    }

    /// Records inbox departures for a document.
    pub fn inbox_removed(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Incoming, -(count as isize));
    }

    /// Records dead-letter arrivals for a document.
    pub fn dead_letter_added(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Dead, count as isize);
    }

    /// Records dead-letter departures for a document.
    pub fn dead_letter_removed(&self, document_id: &str, count: usize) {
        self.adjust(document_id, Bucket::Dead, -(count as isize));
    }

    fn adjust(&self, document_id: &str, bucket: Bucket, delta: isize) {
        let (changed, observers) = {
            let mut inner = self.inner.lock();
            let map = match bucket {
                Bucket::Outgoing => &mut inner.outgoing,
                Bucket::Incoming => &mut inner.incoming,
                Bucket::Dead => &mut inner.dead,
            };
            let entry = map.entry(document_id.to_string()).or_insert(0);
            *entry = entry.saturating_add_signed(delta);

            let status = inner.compute(document_id);
            let previous = inner
                .current
                .insert(document_id.to_string(), status)
                .unwrap_or(DocumentSyncStatus::Synced);
            if previous == status {
                (None, Vec::new())
            } else {
                let observers: Vec<StatusObserver> = inner
                    .observers
                    .iter()
                    .map(|(_, cb)| Arc::clone(cb))
                    .collect();
                (Some(status), observers)
            }
        };
        if let Some(status) = changed {
            for observer in &observers {
                observer(document_id, status);
            }
        }
    }
}

enum Bucket {
    Outgoing,
    Incoming,
    Dead,
}

#[cfg(test)]
mod tests {
    use super::*;

    type Seen = Arc<Mutex<Vec<(String, DocumentSyncStatus)>>>;

    fn collecting(tracker: &SyncStatusTracker) -> (Seen, StatusSubscription) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let subscription = tracker.subscribe(move |doc, status| {
            seen_cb.lock().push((doc.to_string(), status));
        });
        (seen, subscription)
    }

    #[test]
    fn defaults_to_synced() {
        let tracker = SyncStatusTracker::new();
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Synced);
    }

    #[test]
    fn directions_combine() {
        let tracker = SyncStatusTracker::new();
        tracker.outbox_added("doc-1", 1);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Outgoing);

        tracker.inbox_added("doc-1", 2);
        assert_eq!(
            tracker.status("doc-1"),
            DocumentSyncStatus::OutgoingAndIncoming
        );

        tracker.outbox_removed("doc-1", 1);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Incoming);

        tracker.inbox_removed("doc-1", 2);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Synced);
    }

    #[test]
    fn dead_letter_wins() {
        let tracker = SyncStatusTracker::new();
        tracker.outbox_added("doc-1", 3);
        tracker.dead_letter_added("doc-1", 1);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Error);

        tracker.dead_letter_removed("doc-1", 1);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Outgoing);
    }

    #[test]
    fn transitions_fire_exactly_once() {
        let tracker = SyncStatusTracker::new();
        let (seen, _sub) = collecting(&tracker);

        tracker.outbox_added("doc-1", 1);
        // Same computed status: no second notification.
        tracker.outbox_added("doc-1", 1);
        tracker.outbox_removed("doc-1", 2);

        assert_eq!(
            *seen.lock(),
            vec![
                ("doc-1".to_string(), DocumentSyncStatus::Outgoing),
                ("doc-1".to_string(), DocumentSyncStatus::Synced),
            ]
        );
    }

    #[test]
    fn documents_are_tracked_independently() {
        let tracker = SyncStatusTracker::new();
        tracker.outbox_added("doc-1", 1);
        assert_eq!(tracker.status("doc-1"), DocumentSyncStatus::Outgoing);
        assert_eq!(tracker.status("doc-2"), DocumentSyncStatus::Synced);
    }
}
