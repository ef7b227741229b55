//! The executor: turns queued jobs into committed operations.

use crate::consistency::{ConsistencyToken, ConsistencyTracker};
use crate::error::{ReactorError, ReactorResult};
use crate::events::{ChangeOrigin, DocumentChangedEvent, EventBus};
use crate::job::{Job, JobKind};
use crate::queue::JobQueue;
use crate::read_model::ReadModelHost;
use crate::reducer::Reducer;
use crate::verify::{verify_actions, SignatureVerifier};
use docsync_model::{next_index, Operation};
use docsync_reconcile::{attach_branch, prepare_operations};
use docsync_store::{CommittedOperation, OperationStore, WriteCache};
use std::sync::Arc;

/// Everything a worker needs to process jobs.
pub(crate) struct ExecutorContext {
    pub(crate) store: Arc<dyn OperationStore>,
    pub(crate) cache: Arc<WriteCache>,
    pub(crate) reducer: Arc<dyn Reducer>,
    pub(crate) verifier: Arc<dyn SignatureVerifier>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) tracker: Arc<ConsistencyTracker>,
    pub(crate) read_models: Arc<ReadModelHost>,
}

/// Worker loop: drains the queue until shutdown.
///
/// Retryable failures (optimistic revision conflicts) are re-queued within
/// the job's retry budget; everything else resolves the job as failed.
pub(crate) fn run_worker(queue: &JobQueue, ctx: &ExecutorContext) {
    while let Some(mut job) = queue.next_ready() {
        match process_job(ctx, &job) {
            Ok(token) => {
                if let Err(err) = queue.complete(&job, token) {
                    tracing::error!(job_id = %job.id, error = %err, "resolving job failed");
                }
            }
            Err(err) if err.is_retryable() && job.retry_count < job.max_retries => {
                tracing::debug!(
                    job_id = %job.id,
                    retry = job.retry_count + 1,
                    error = %err,
                    "retrying job",
                );
                job.record_error(err.to_string());
                if let Err(err) = queue.requeue(job) {
                    tracing::error!(error = %err, "re-queueing job failed");
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "job failed");
                if let Err(err) = queue.fail(&job, err.to_string()) {
                    tracing::error!(error = %err, "resolving job failed");
                }
            }
        }
    }
}

/// Processes one job end to end.
///
/// Returns the consistency token of the commit, or `None` if the job
/// committed nothing (empty batch, pure duplicates).
fn process_job(ctx: &ExecutorContext, job: &Job) -> ReactorResult<Option<ConsistencyToken>> {
    match &job.kind {
        JobKind::Mutation { actions } => {
            verify_actions(actions.iter(), ctx.verifier.as_ref())?;
            process_mutation(ctx, job, actions)
        }
        JobKind::Load { operations } => {
            verify_actions(operations.iter().map(|op| &op.action), ctx.verifier.as_ref())?;
            process_load(ctx, job, operations)
        }
    }
}

fn process_mutation(
    ctx: &ExecutorContext,
    job: &Job,
    actions: &[docsync_model::Action],
) -> ReactorResult<Option<ConsistencyToken>> {
    if actions.is_empty() {
        return Ok(None);
    }
    let revision = ctx.store.revision(&job.document_id, &job.scope, &job.branch)?;
    let history = ctx.store.read(&job.document_id, &job.scope, &job.branch, 0)?;
    let mut state = current_state(ctx, &job.document_id, &job.scope, &job.branch, &history)?;

    let mut index = next_index(&history);
    let mut operations = Vec::with_capacity(actions.len());
    for action in actions {
        let mut op = Operation::from_action(
            &job.document_id,
            &job.scope,
            &job.branch,
            action.clone(),
            index,
            0,
        )?;
        // A reducer failure becomes a failed operation in the log; the
        // state is left untouched and the batch keeps going.
        match ctx.reducer.reduce(&state, action) {
            Ok(next_state) => state = next_state,
            Err(err) => op = op.with_error(err.to_string()),
        }
        operations.push(op);
        index += 1;
    }

    commit_append(ctx, job, revision, operations, state)
}

fn process_load(
    ctx: &ExecutorContext,
    job: &Job,
    operations: &[Operation],
) -> ReactorResult<Option<ConsistencyToken>> {
    if operations.is_empty() {
        return Ok(None);
    }
    // A load may target a document this reactor has never seen.
    if !ctx.store.contains(&job.document_id)? {
        ctx.store
            .create_document(&job.document_id, serde_json::Value::Object(Default::default()))?;
    }
    let revision = ctx.store.revision(&job.document_id, &job.scope, &job.branch)?;
    let history = ctx.store.read(&job.document_id, &job.scope, &job.branch, 0)?;
    let prepared = prepare_operations(&history, operations.to_vec());

    if !prepared.integrity_issues.is_empty() {
        // Commit what extends the log cleanly, then surface the gap. The
        // job fails; the sender is expected to re-deliver the full range.
        if !prepared.valid_operations.is_empty() {
            commit_remote(ctx, job, revision, &history, prepared.valid_operations)?;
        }
        let index = prepared
            .integrity_issues
            .iter()
            .map(|issue| issue.index)
            .min()
            .unwrap_or(0);
        return Err(ReactorError::IntegrityGap {
            index,
            issues: prepared.integrity_issues,
        });
    }

    if prepared.invalid_operations.is_empty() {
        if prepared.valid_operations.is_empty() {
            // Pure duplicates: at-most-once application, nothing to do.
            return Ok(None);
        }
        return commit_remote(ctx, job, revision, &history, prepared.valid_operations);
    }

    // Conflicting operations without a gap: the incoming batch is an
    // alternate branch of this log. Reshuffle the trunk around it.
    merge_branch(ctx, job, revision, &history, operations)
}

/// Appends already-sequenced remote operations, reducing them into the
/// current state as they land.
fn commit_remote(
    ctx: &ExecutorContext,
    job: &Job,
    revision: u64,
    history: &[Operation],
    valid: Vec<Operation>,
) -> ReactorResult<Option<ConsistencyToken>> {
    let mut state = current_state(ctx, &job.document_id, &job.scope, &job.branch, history)?;
    let mut operations = Vec::with_capacity(valid.len());
    for mut op in valid {
        if op.error.is_none() {
            match ctx.reducer.reduce(&state, &op.action) {
                Ok(next_state) => state = next_state,
                Err(err) => op = op.with_error(err.to_string()),
            }
        }
        operations.push(op);
    }
    commit_append(ctx, job, revision, operations, state)
}

/// Attaches the incoming batch as a branch, replays the merged trunk from
/// the initial state and rewrites the log.
fn merge_branch(
    ctx: &ExecutorContext,
    job: &Job,
    revision: u64,
    history: &[Operation],
    incoming: &[Operation],
) -> ReactorResult<Option<ConsistencyToken>> {
    let (new_trunk, tail) = attach_branch(history, incoming)?;

    // Displaced trunk operations are re-appended after the branch, at
    // fresh indices. Their ids are position-independent, so an operation
    // keeps its identity (and its ordinal) across the move.
    let mut trunk = new_trunk;
    for displaced in tail {
        let index = next_index(&trunk);
        let op = Operation::from_action(
            &job.document_id,
            &job.scope,
            &job.branch,
            displaced.action,
            index,
            0,
        )?;
        trunk.push(op);
    }

    // The reshuffle invalidates every snapshot of the old log shape; the
    // state is recomputed by a full replay from the initial state.
    let mut state = ctx.store.initial_state(&job.document_id)?;
    let mut replayed = Vec::with_capacity(trunk.len());
    for mut op in trunk {
        if op.error.is_none() {
            match ctx.reducer.reduce(&state, &op.action) {
                Ok(next_state) => state = next_state,
                Err(err) => op = op.with_error(err.to_string()),
            }
        }
        replayed.push(op);
    }

    let before = ctx.store.latest_ordinal()?;
    ctx.store.rewrite(
        &job.document_id,
        &job.scope,
        &job.branch,
        revision,
        replayed.clone(),
        &state,
    )?;
    ctx.cache.invalidate(&job.document_id);
    ctx.cache
        .put_state(&job.document_id, &job.scope, &job.branch, state, &replayed);

    // Only operations new to this log got ordinals; the commit feed is the
    // authoritative mapping back to them.
    let committed: Vec<CommittedOperation> = ctx
        .store
        .read_since(before)?
        .into_iter()
        .filter(|c| {
            c.document_id == job.document_id && c.scope == job.scope && c.branch == job.branch
        })
        .collect();
    finish_commit(ctx, job, committed)
}

fn commit_append(
    ctx: &ExecutorContext,
    job: &Job,
    revision: u64,
    operations: Vec<Operation>,
    state: serde_json::Value,
) -> ReactorResult<Option<ConsistencyToken>> {
    if operations.is_empty() {
        return Ok(None);
    }
    let batch = ctx.store.append(
        &job.document_id,
        &job.scope,
        &job.branch,
        revision,
        operations.clone(),
        &state,
    )?;
    ctx.cache
        .put_state(&job.document_id, &job.scope, &job.branch, state, &operations);

    let committed = batch
        .ordinals
        .iter()
        .zip(operations)
        .map(|(&ordinal, operation)| CommittedOperation {
            ordinal,
            document_id: job.document_id.clone(),
            scope: job.scope.clone(),
            branch: job.branch.clone(),
            operation,
        })
        .collect();
    finish_commit(ctx, job, committed)
}

/// Publishes a commit: event, consistency token, read-model catch-up.
fn finish_commit(
    ctx: &ExecutorContext,
    job: &Job,
    committed: Vec<CommittedOperation>,
) -> ReactorResult<Option<ConsistencyToken>> {
    let Some(last) = committed.last().map(|c| c.ordinal) else {
        return Ok(None);
    };
    let origin = match &job.kind {
        JobKind::Mutation { .. } => ChangeOrigin::Local,
        JobKind::Load { .. } => ChangeOrigin::Remote,
    };
    ctx.events.emit(&DocumentChangedEvent {
        document_id: job.document_id.clone(),
        scope: job.scope.clone(),
        branch: job.branch.clone(),
        origin,
        operations: committed,
    });
    let token = ctx.tracker.advance_committed(last);
    ctx.read_models.catch_up()?;
    Ok(Some(token))
}

/// Resolves the current document state for one log.
///
/// Cache hit wins; a miss replays from the latest keyframe, or from the
/// initial state when no keyframe exists. Failed operations are skipped.
pub(crate) fn current_state(
    ctx: &ExecutorContext,
    document_id: &str,
    scope: &str,
    branch: &str,
    history: &[Operation],
) -> ReactorResult<serde_json::Value> {
    if let Some(state) = ctx.cache.get_state(document_id, scope, branch) {
        return Ok(state);
    }
    let (mut state, from) = match ctx.store.latest_keyframe(document_id, scope, branch)? {
        Some(keyframe) => (keyframe.state, keyframe.next_index),
        None => (ctx.store.initial_state(document_id)?, 0),
    };
    for op in history.iter().filter(|op| op.index >= from) {
        if op.error.is_some() {
            continue;
        }
        if let Ok(next_state) = ctx.reducer.reduce(&state, &op.action) {
            state = next_state;
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::JsonMergeReducer;
    use crate::verify::AcceptAllVerifier;
    use docsync_model::Action;
    use docsync_store::InMemoryOperationStore;
    use serde_json::json;

    fn make_ctx() -> ExecutorContext {
        let store = Arc::new(InMemoryOperationStore::new());
        let tracker = Arc::new(ConsistencyTracker::new());
        let read_models = Arc::new(ReadModelHost::new(store.clone(), tracker.clone()));
        ExecutorContext {
            store,
            cache: Arc::new(WriteCache::new()),
            reducer: Arc::new(JsonMergeReducer),
            verifier: Arc::new(AcceptAllVerifier),
            events: Arc::new(EventBus::new()),
            tracker,
            read_models,
        }
    }

    fn make_action(input: serde_json::Value) -> Action {
        Action::new("SET", input, "global")
    }

    fn make_remote_op(index: u64, skip: u64, input: serde_json::Value) -> Operation {
        let action = make_action(input).with_timestamp(1_000 + index * 10 + skip);
        Operation::from_action("doc-1", "global", "main", action, index, skip).unwrap()
    }

    fn mutation_job(actions: Vec<Action>) -> Job {
        Job::mutation("doc-1", "global", "main", actions)
    }

    fn load_job(operations: Vec<Operation>) -> Job {
        Job::load("doc-1", "global", "main", operations)
    }

    #[test]
    fn mutation_reduces_and_commits() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        let job = mutation_job(vec![
            make_action(json!({"a": 1})),
            make_action(json!({"b": 2})),
        ]);
        let token = process_job(&ctx, &job).unwrap();
        assert!(token.is_some());

        let ops = ctx.store.read("doc-1", "global", "main", 0).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].index, 0);
        assert_eq!(ops[1].index, 1);
        assert_eq!(
            ctx.cache.get_state("doc-1", "global", "main"),
            Some(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn reducer_failure_becomes_failed_operation() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        let job = mutation_job(vec![
            make_action(json!({"a": 1})),
            Action::new("FAIL", json!({}), "global"),
            make_action(json!({"b": 2})),
        ]);
        process_job(&ctx, &job).unwrap();

        let ops = ctx.store.read("doc-1", "global", "main", 0).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops[0].error.is_none());
        assert!(ops[1].error.is_some());
        assert!(ops[2].error.is_none());
        // The failed action did not touch the state.
        assert_eq!(
            ctx.cache.get_state("doc-1", "global", "main"),
            Some(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn mutation_emits_one_event_per_commit() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = ctx
            .events
            .subscribe(move |e| seen_cb.lock().push(e.operations.len()));

        let job = mutation_job(vec![
            make_action(json!({"a": 1})),
            make_action(json!({"b": 2})),
        ]);
        process_job(&ctx, &job).unwrap();

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn commit_events_carry_their_origin() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = ctx.events.subscribe(move |e| seen_cb.lock().push(e.origin));

        process_job(&ctx, &mutation_job(vec![make_action(json!({"a": 1}))])).unwrap();
        process_job(&ctx, &load_job(vec![make_remote_op(1, 0, json!({"b": 2}))])).unwrap();

        assert_eq!(*seen.lock(), vec![ChangeOrigin::Local, ChangeOrigin::Remote]);
    }

    #[test]
    fn load_appends_remote_operations() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        let job = load_job(vec![
            make_remote_op(0, 0, json!({"a": 1})),
            make_remote_op(1, 0, json!({"b": 2})),
        ]);
        let token = process_job(&ctx, &job).unwrap();
        assert!(token.is_some());

        assert_eq!(ctx.store.read("doc-1", "global", "main", 0).unwrap().len(), 2);
        assert_eq!(
            ctx.cache.get_state("doc-1", "global", "main"),
            Some(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn load_creates_unknown_document() {
        let ctx = make_ctx();
        let job = load_job(vec![make_remote_op(0, 0, json!({"a": 1}))]);
        process_job(&ctx, &job).unwrap();
        assert!(ctx.store.contains("doc-1").unwrap());
    }

    #[test]
    fn redelivered_load_is_a_no_op() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        let ops = vec![make_remote_op(0, 0, json!({"a": 1}))];
        process_job(&ctx, &load_job(ops.clone())).unwrap();
        let ordinal_after_first = ctx.store.latest_ordinal().unwrap();

        let token = process_job(&ctx, &load_job(ops)).unwrap();
        assert!(token.is_none());
        assert_eq!(ctx.store.latest_ordinal().unwrap(), ordinal_after_first);
    }

    #[test]
    fn load_with_gap_fails_and_commits_nothing_past_it() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();
        process_job(&ctx, &load_job(vec![make_remote_op(0, 0, json!({"a": 1}))])).unwrap();

        // Index 1 is expected; 3 opens a gap.
        let err = process_job(&ctx, &load_job(vec![make_remote_op(3, 0, json!({"x": 9}))]))
            .unwrap_err();
        match err {
            ReactorError::IntegrityGap { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.store.read("doc-1", "global", "main", 0).unwrap().len(), 1);
    }

    #[test]
    fn conflicting_load_reshuffles_the_trunk() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        // Local history: two operations.
        let job = mutation_job(vec![
            make_action(json!({"a": 1})),
            make_action(json!({"b": 2})),
        ]);
        process_job(&ctx, &job).unwrap();

        // Remote batch conflicts at index 1 with a different payload.
        let remote = make_remote_op(1, 0, json!({"c": 3}));
        process_job(&ctx, &load_job(vec![remote])).unwrap();

        let ops = ctx.store.read("doc-1", "global", "main", 0).unwrap();
        // Prefix, remote at 1, displaced local op re-appended at 2.
        let positions: Vec<_> = ops.iter().map(|op| (op.index, op.skip)).collect();
        assert_eq!(positions, vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(ops[1].action.input, json!({"c": 3}));
        assert_eq!(ops[2].action.input, json!({"b": 2}));
        assert_eq!(
            ctx.cache.get_state("doc-1", "global", "main"),
            Some(json!({"a": 1, "b": 2, "c": 3}))
        );
    }

    #[test]
    fn reshuffled_operation_keeps_its_ordinal() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        process_job(
            &ctx,
            &mutation_job(vec![make_action(json!({"a": 1})), make_action(json!({"b": 2}))]),
        )
        .unwrap();
        let displaced_id = ctx.store.read("doc-1", "global", "main", 0).unwrap()[1].id.clone();
        let feed = ctx.store.read_since(0).unwrap();
        let original_ordinal = feed
            .iter()
            .find(|c| c.operation.id == displaced_id)
            .map(|c| c.ordinal)
            .unwrap();

        process_job(&ctx, &load_job(vec![make_remote_op(1, 0, json!({"c": 3}))])).unwrap();

        // The displaced operation moved to index 2 but was not re-committed.
        let feed = ctx.store.read_since(0).unwrap();
        let ordinals: Vec<_> = feed
            .iter()
            .filter(|c| c.operation.id == displaced_id)
            .map(|c| c.ordinal)
            .collect();
        assert_eq!(ordinals, vec![original_ordinal]);
    }

    #[test]
    fn state_reconstructs_from_keyframe_on_cache_miss() {
        let store = Arc::new(InMemoryOperationStore::with_config(
            docsync_store::StoreConfig {
                keyframe_interval: 2,
            },
        ));
        let tracker = Arc::new(ConsistencyTracker::new());
        let read_models = Arc::new(ReadModelHost::new(store.clone(), tracker.clone()));
        let ctx = ExecutorContext {
            store,
            cache: Arc::new(WriteCache::new()),
            reducer: Arc::new(JsonMergeReducer),
            verifier: Arc::new(AcceptAllVerifier),
            events: Arc::new(EventBus::new()),
            tracker,
            read_models,
        };
        ctx.store.create_document("doc-1", json!({})).unwrap();

        process_job(
            &ctx,
            &mutation_job(vec![make_action(json!({"a": 1})), make_action(json!({"b": 2}))]),
        )
        .unwrap();
        assert!(ctx
            .store
            .latest_keyframe("doc-1", "global", "main")
            .unwrap()
            .is_some());

        // Drop the cache entry; the next mutation must rebuild from the
        // keyframe plus replay.
        ctx.cache.invalidate("doc-1");
        process_job(&ctx, &mutation_job(vec![make_action(json!({"c": 3}))])).unwrap();

        assert_eq!(
            ctx.cache.get_state("doc-1", "global", "main"),
            Some(json!({"a": 1, "b": 2, "c": 3}))
        );
    }

    #[test]
    fn signature_failure_blocks_persistence() {
        use docsync_model::{ActionContext, Signer};

        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();

        let unsignable = make_action(json!({"a": 1})).with_context(ActionContext {
            signer: Some(Signer {
                user: Some("mallory".into()),
                app: None,
                signatures: vec![],
            }),
            ..Default::default()
        });
        let err = process_job(&ctx, &mutation_job(vec![unsignable])).unwrap_err();
        assert!(matches!(err, ReactorError::InvalidSignature { .. }));
        assert!(ctx.store.read("doc-1", "global", "main", 0).unwrap().is_empty());
    }

    #[test]
    fn empty_mutation_commits_nothing() {
        let ctx = make_ctx();
        ctx.store.create_document("doc-1", json!({})).unwrap();
        let token = process_job(&ctx, &mutation_job(vec![])).unwrap();
        assert!(token.is_none());
        assert_eq!(ctx.store.latest_ordinal().unwrap(), 0);
    }
}
