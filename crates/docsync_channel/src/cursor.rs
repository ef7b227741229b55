//! Remote cursors: how far each remote feed has been consumed.

use docsync_store::Ordinal;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-remote consumption cursor.
///
/// One per `(local reactor, remote)` pair; created on first sync touch,
/// advanced monotonically, deleted when the remote is untracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    /// The remote the cursor belongs to.
    pub remote_name: String,
    /// Highest remote ordinal consumed so far.
    pub cursor_ordinal: Ordinal,
    /// UTC milliseconds of the last successful sync, if any.
    pub last_synced_at_utc_ms: Option<u64>,
}

/// Cursor table keyed by remote name.
#[derive(Default)]
pub struct CursorStore {
    cursors: RwLock<HashMap<String, RemoteCursor>>,
}

impl CursorStore {
    /// Creates an empty cursor store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cursor for a remote, creating it on first touch.
    pub fn cursor(&self, remote_name: &str) -> RemoteCursor {
        if let Some(cursor) = self.cursors.read().get(remote_name) {
            return cursor.clone();
        }
        let cursor = RemoteCursor {
            remote_name: remote_name.to_string(),
            cursor_ordinal: 0,
            last_synced_at_utc_ms: None,
        };
        self.cursors
            .write()
            .entry(remote_name.to_string())
            .or_insert_with(|| cursor.clone())
            .clone()
    }

    /// Advances a cursor; a stale ordinal never moves it backwards.
    pub fn advance(&self, remote_name: &str, ordinal: Ordinal, synced_at_utc_ms: u64) {
        let mut cursors = self.cursors.write();
        let entry = cursors
            .entry(remote_name.to_string())
            .or_insert_with(|| RemoteCursor {
                remote_name: remote_name.to_string(),
                cursor_ordinal: 0,
                last_synced_at_utc_ms: None,
            });
        entry.cursor_ordinal = entry.cursor_ordinal.max(ordinal);
        entry.last_synced_at_utc_ms = Some(synced_at_utc_ms);
    }

    /// Deletes a remote's cursor; called when the remote is untracked.
    pub fn remove(&self, remote_name: &str) -> Option<RemoteCursor> {
        self.cursors.write().remove(remote_name)
    }

    /// Returns all cursors, sorted by remote name.
    pub fn list(&self) -> Vec<RemoteCursor> {
        let mut cursors: Vec<_> = self.cursors.read().values().cloned().collect();
        cursors.sort_by(|a, b| a.remote_name.cmp(&b.remote_name));
        cursors
    }
}
