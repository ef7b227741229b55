//! Global ordinal tracking and read-after-write consistency.

use docsync_store::Ordinal;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// An ordinal-derived handle for read-after-write waits.
///
/// Returned from writes; pass it to [`ConsistencyTracker::wait_for`] to
/// block until a read model has indexed at least this far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConsistencyToken(pub Ordinal);

#[derive(Default)]
struct TrackerInner {
    last_committed: Ordinal,
    /// Per read model: the highest ordinal it has fully indexed.
    views: HashMap<String, Ordinal>,
}

/// Tracks the global commit ordinal and read-model progress.
///
/// Writers advance `last_committed` at commit time; read models report the
/// ordinal they have indexed up to. Waiters block on a condvar until a
/// given view catches up to a token.
#[derive(Default)]
pub struct ConsistencyTracker {
    inner: Mutex<TrackerInner>,
    cond: Condvar,
}

impl ConsistencyTracker {
    /// Creates a tracker with no progress recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a commit; returns the token for it.
    ///
    /// Ordinals are strictly increasing, so the highest wins.
    pub fn advance_committed(&self, ordinal: Ordinal) -> ConsistencyToken {
        let mut inner = self.inner.lock();
        inner.last_committed = inner.last_committed.max(ordinal);
        let token = ConsistencyToken(inner.last_committed);
        drop(inner);
        self.cond.notify_all();
        token
    }

    /// The highest committed ordinal observed.
    pub fn last_committed(&self) -> Ordinal {
        self.inner.lock().last_committed
    }

    /// Records that a read model has indexed up to `ordinal`.
    pub fn view_caught_up(&self, view_id: &str, ordinal: Ordinal) {
        let mut inner = self.inner.lock();
        let entry = inner.views.entry(view_id.to_string()).or_insert(0);
        *entry = (*entry).max(ordinal);
        drop(inner);
        self.cond.notify_all();
    }

    /// The highest ordinal a read model has indexed (0 if unknown).
    pub fn view_ordinal(&self, view_id: &str) -> Ordinal {
        self.inner
            .lock()
            .views
            .get(view_id)
            .copied()
            .unwrap_or(0)
    }

    /// Blocks until `view_id` has indexed at least up to `token`.
    ///
    /// Returns true if the view caught up within the timeout.
    pub fn wait_for(&self, view_id: &str, token: ConsistencyToken, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.views.get(view_id).copied().unwrap_or(0) >= token.0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.cond.wait_for(&mut inner, deadline - now);
        }
    }
}
