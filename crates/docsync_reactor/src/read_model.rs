//! Exactly-once indexing into downstream read views.

use crate::consistency::ConsistencyTracker;
use crate::error::ReactorResult;
use docsync_store::{CommittedOperation, OperationStore, Ordinal};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A downstream view indexing committed operations.
///
/// Indexing is keyed by `(document_id, branch, scope, index)` and gated by
/// the persisted `last_ordinal`, so re-delivery after a crash is a no-op.
pub trait ReadModel: Send + Sync {
    /// Stable identifier; keys the persisted `last_ordinal`.
    fn id(&self) -> &str;

    /// Indexes one committed operation. Must be idempotent per key.
    fn index(&self, operation: &CommittedOperation);
}

/// Persisted progress per read model.
///
/// The `ViewState` table: one `last_ordinal` per read model id.
#[derive(Default)]
pub struct ViewStateStore {
    states: RwLock<HashMap<String, Ordinal>>,
}

impl ViewStateStore {
    /// Creates an empty view-state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last ordinal processed by a read model (0 if none).
    pub fn last_ordinal(&self, read_model_id: &str) -> Ordinal {
        self.states
            .read()
            .get(read_model_id)
            .copied()
            .unwrap_or(0)
    }

    /// Persists the last ordinal processed by a read model.
    pub fn set_last_ordinal(&self, read_model_id: &str, ordinal: Ordinal) {
        self.states
            .write()
            .insert(read_model_id.to_string(), ordinal);
    }
}

/// Drives read models over the committed-operation feed.
///
/// On `catch_up`, each registered read model receives exactly the
/// operations with ordinal greater than its persisted `last_ordinal`, in
/// commit order; the consistency tracker is advanced afterwards so
/// read-after-write waiters unblock.
pub struct ReadModelHost {
    store: Arc<dyn OperationStore>,
    view_states: ViewStateStore,
    tracker: Arc<ConsistencyTracker>,
    models: RwLock<Vec<Arc<dyn ReadModel>>>,
}

impl ReadModelHost {
    /// Creates a host over a store and consistency tracker.
    pub fn new(store: Arc<dyn OperationStore>, tracker: Arc<ConsistencyTracker>) -> Self {
        Self {
            store,
            view_states: ViewStateStore::new(),
            tracker,
            models: RwLock::new(Vec::new()),
        }
    }

    /// Registers a read model.
    ///
    /// A freshly registered model starts from ordinal 0 and will index the
    /// full committed history on the next catch-up.
    pub fn register(&self, model: Arc<dyn ReadModel>) {
        self.models.write().push(model);
    }

    /// Indexes everything committed since each model's `last_ordinal`.
    pub fn catch_up(&self) -> ReactorResult<()> {
        let models: Vec<Arc<dyn ReadModel>> = self.models.read().clone();
        for model in models {
            self.catch_up_model(&model)?;
        }
        Ok(())
    }

    fn catch_up_model(&self, model: &Arc<dyn ReadModel>) -> ReactorResult<()> {
        let last = self.view_states.last_ordinal(model.id());
        let operations = self.store.read_since(last)?;
        let mut newest = last;
        for op in &operations {
            model.index(op);
            newest = op.ordinal;
            // Persisting per operation keeps the replay window minimal
            // after a crash; re-delivery is idempotent either way.
            self.view_states.set_last_ordinal(model.id(), newest);
        }
        self.tracker.view_caught_up(model.id(), newest);
        Ok(())
    }

    /// Returns the persisted progress of a read model.
    pub fn last_ordinal(&self, read_model_id: &str) -> Ordinal {
        self.view_states.last_ordinal(read_model_id)
    }
}
