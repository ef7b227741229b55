//! Bounded LRU cache of document state.

use docsync_model::{DocumentId, Operation};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Configuration for the write cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of documents held in the cache.
    pub max_entries: usize,
    /// Number of recent operations retained per entry.
    pub ring_buffer_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            ring_buffer_size: 32,
        }
    }
}

/// A cached view of one document.
#[derive(Debug, Clone)]
pub struct CachedDocument {
    /// Current state per `(scope, branch)`.
    pub states: HashMap<(String, String), serde_json::Value>,
    /// Recent operations, oldest first, bounded by the ring buffer size.
    pub recent_operations: VecDeque<Operation>,
}

impl CachedDocument {
    fn new() -> Self {
        Self {
            states: HashMap::new(),
            recent_operations: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<DocumentId, CachedDocument>,
    /// Most recently used document ids, front is coldest.
    usage: VecDeque<DocumentId>,
}

/// A bounded LRU of document state with per-entry operation ring buffers.
///
/// The cache is purely an optimization: correctness never depends on a hit.
/// A miss is reconstructed from the operation store's latest keyframe plus
/// replay.
pub struct WriteCache {
    config: CacheConfig,
    inner: RwLock<CacheInner>,
}

impl WriteCache {
    /// Creates a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a cache with the given configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Returns the cached state of a document scope, if present.
    pub fn get_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> Option<serde_json::Value> {
        let mut inner = self.inner.write();
        let state = inner
            .entries
            .get(document_id)?
            .states
            .get(&(scope.to_string(), branch.to_string()))
            .cloned()?;
        touch(&mut inner.usage, document_id);
        Some(state)
    }

    /// Stores the state of a document scope and its newest operations.
    pub fn put_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        state: serde_json::Value,
        new_operations: &[Operation],
    ) {
        let mut inner = self.inner.write();

        let entry = inner
            .entries
            .entry(document_id.to_string())
            .or_insert_with(CachedDocument::new);
        entry
            .states
            .insert((scope.to_string(), branch.to_string()), state);
        for op in new_operations {
            if entry.recent_operations.len() == self.config.ring_buffer_size {
                entry.recent_operations.pop_front();
            }
            entry.recent_operations.push_back(op.clone());
        }

        touch(&mut inner.usage, document_id);
        self.evict_over_capacity(&mut inner);
    }

    /// Evicts a document from the cache.
    pub fn invalidate(&self, document_id: &str) {
        let mut inner = self.inner.write();
        inner.entries.remove(document_id);
        inner.usage.retain(|id| id != document_id);
    }

    /// Returns the recent operations of a cached document, oldest first.
    pub fn recent_operations(&self, document_id: &str) -> Vec<Operation> {
        self.inner
            .read()
            .entries
            .get(document_id)
            .map(|e| e.recent_operations.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of cached documents.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    fn evict_over_capacity(&self, inner: &mut CacheInner) {
        while inner.entries.len() > self.config.max_entries {
            let Some(coldest) = inner.usage.pop_front() else {
                break;
            };
            inner.entries.remove(&coldest);
        }
    }
}

impl Default for WriteCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Moves `document_id` to the hot end of the usage queue.
fn touch(usage: &mut VecDeque<DocumentId>, document_id: &str) {
    usage.retain(|id| id != document_id);
    usage.push_back(document_id.to_string());
}
