//! In-memory operation store.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    AppliedBatch, CommittedOperation, Keyframe, OperationStore, Ordinal, StoreConfig,
};
use docsync_model::{DocumentId, Operation};
use parking_lot::RwLock;
use std::collections::HashMap;

type LogKey = (String, String);

#[derive(Debug, Default)]
struct ScopeLog {
    operations: Vec<Operation>,
    revision: u64,
    /// Ordinals by operation id; ids are stable across reshuffles.
    ordinals: HashMap<String, Ordinal>,
    keyframes: Vec<Keyframe>,
    appended_since_keyframe: u64,
}

#[derive(Debug)]
struct DocumentRecord {
    initial_state: serde_json::Value,
    logs: HashMap<LogKey, ScopeLog>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<DocumentId, DocumentRecord>,
    committed: Vec<CommittedOperation>,
    next_ordinal: Ordinal,
}

/// An in-memory operation store.
///
/// The reference implementation of [`OperationStore`], suitable for tests
/// and ephemeral reactors. All logs live behind one lock; appends across
/// documents still serialize here, but the revision check is what callers
/// must rely on for correctness.
pub struct InMemoryOperationStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
}

impl InMemoryOperationStore {
    /// Creates an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                documents: HashMap::new(),
                committed: Vec::new(),
                next_ordinal: 1,
            }),
        }
    }

    fn commit_keyframe(config: &StoreConfig, key: &LogKey, document_id: &str, log: &mut ScopeLog, state: &serde_json::Value) {
        if log.appended_since_keyframe < config.keyframe_interval {
            return;
        }
        let next_index = log.operations.last().map(|op| op.index + 1).unwrap_or(0);
        log.keyframes.push(Keyframe {
            document_id: document_id.to_string(),
            scope: key.0.clone(),
            branch: key.1.clone(),
            next_index,
            state: state.clone(),
        });
        log.appended_since_keyframe = 0;
    }
}

impl Default for InMemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn create_document(
        &self,
        document_id: &str,
        initial_state: serde_json::Value,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.documents.contains_key(document_id) {
            return Err(StoreError::DocumentExists {
                document_id: document_id.into(),
            });
        }
        inner.documents.insert(
            document_id.to_string(),
            DocumentRecord {
                initial_state,
                logs: HashMap::new(),
            },
        );
        Ok(())
    }

    fn delete_document(&self, document_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.documents.remove(document_id).is_none() {
            return Err(StoreError::DocumentNotFound {
                document_id: document_id.into(),
            });
        }
        // Full document deletion is the only operation removal path.
        inner.committed.retain(|c| c.document_id != document_id);
        Ok(())
    }

    fn contains(&self, document_id: &str) -> StoreResult<bool> {
        Ok(self.inner.read().documents.contains_key(document_id))
    }

    fn document_ids(&self) -> StoreResult<Vec<DocumentId>> {
        let mut ids: Vec<_> = self.inner.read().documents.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn revision(&self, document_id: &str, scope: &str, branch: &str) -> StoreResult<u64> {
        let inner = self.inner.read();
        let record = inner.documents.get(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        Ok(record
            .logs
            .get(&(scope.to_string(), branch.to_string()))
            .map(|log| log.revision)
            .unwrap_or(0))
    }

    fn append(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        expected_revision: u64,
        operations: Vec<Operation>,
        state: &serde_json::Value,
    ) -> StoreResult<AppliedBatch> {
        let mut guard = self.inner.write();
        let Inner {
            documents,
            committed,
            next_ordinal,
        } = &mut *guard;
        let record = documents.get_mut(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        let key = (scope.to_string(), branch.to_string());
        let log = record.logs.entry(key.clone()).or_default();

        if log.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                document_id: document_id.into(),
                scope: scope.into(),
                branch: branch.into(),
                expected: expected_revision,
                actual: log.revision,
            });
        }

        let mut ordinals = Vec::with_capacity(operations.len());
        for op in operations {
            let ordinal = *next_ordinal;
            *next_ordinal += 1;
            ordinals.push(ordinal);
            log.ordinals.insert(op.id.clone(), ordinal);
            committed.push(CommittedOperation {
                ordinal,
                document_id: document_id.to_string(),
                scope: scope.to_string(),
                branch: branch.to_string(),
                operation: op.clone(),
            });
            log.operations.push(op);
            log.appended_since_keyframe += 1;
        }
        log.revision += 1;
        Self::commit_keyframe(&self.config, &key, document_id, log, state);

        Ok(AppliedBatch {
            ordinals,
            revision: log.revision,
        })
    }

    fn rewrite(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        expected_revision: u64,
        trunk: Vec<Operation>,
        state: &serde_json::Value,
    ) -> StoreResult<AppliedBatch> {
        let mut guard = self.inner.write();
        let Inner {
            documents,
            committed,
            next_ordinal,
        } = &mut *guard;
        let record = documents.get_mut(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        let key = (scope.to_string(), branch.to_string());
        let log = record.logs.entry(key.clone()).or_default();

        if log.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                document_id: document_id.into(),
                scope: scope.into(),
                branch: branch.into(),
                expected: expected_revision,
                actual: log.revision,
            });
        }

        // A rewrite invalidates snapshots taken over the old log shape.
        log.keyframes.clear();
        log.appended_since_keyframe = 0;

        let mut ordinals = Vec::new();
        for op in &trunk {
            if log.ordinals.contains_key(&op.id) {
                continue;
            }
            let ordinal = *next_ordinal;
            *next_ordinal += 1;
            ordinals.push(ordinal);
            log.ordinals.insert(op.id.clone(), ordinal);
            committed.push(CommittedOperation {
                ordinal,
                document_id: document_id.to_string(),
                scope: scope.to_string(),
                branch: branch.to_string(),
                operation: op.clone(),
            });
        }
        log.operations = trunk;
        log.revision += 1;
        log.appended_since_keyframe = ordinals.len() as u64;
        Self::commit_keyframe(&self.config, &key, document_id, log, state);

        Ok(AppliedBatch {
            ordinals,
            revision: log.revision,
        })
    }

    fn read(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        from_index: u64,
    ) -> StoreResult<Vec<Operation>> {
        let inner = self.inner.read();
        let record = inner.documents.get(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        Ok(record
            .logs
            .get(&(scope.to_string(), branch.to_string()))
            .map(|log| {
                log.operations
                    .iter()
                    .filter(|op| op.index >= from_index)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn read_since(&self, ordinal: Ordinal) -> StoreResult<Vec<CommittedOperation>> {
        Ok(self
            .inner
            .read()
            .committed
            .iter()
            .filter(|c| c.ordinal > ordinal)
            .cloned()
            .collect())
    }

    fn latest_ordinal(&self) -> StoreResult<Ordinal> {
        Ok(self.inner.read().next_ordinal - 1)
    }

    fn latest_keyframe(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> StoreResult<Option<Keyframe>> {
        let inner = self.inner.read();
        let record = inner.documents.get(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        Ok(record
            .logs
            .get(&(scope.to_string(), branch.to_string()))
            .and_then(|log| log.keyframes.last().cloned()))
    }

    fn initial_state(&self, document_id: &str) -> StoreResult<serde_json::Value> {
        let inner = self.inner.read();
        let record = inner.documents.get(document_id).ok_or_else(|| {
            StoreError::DocumentNotFound {
                document_id: document_id.into(),
            }
        })?;
        Ok(record.initial_state.clone())
    }
}
