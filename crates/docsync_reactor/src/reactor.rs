//! The reactor: the single write path of a document store.

use crate::consistency::{ConsistencyToken, ConsistencyTracker};
use crate::error::{ReactorError, ReactorResult};
use crate::events::{DocumentChangedEvent, EventBus, Subscription};
use crate::executor::{current_state, run_worker, ExecutorContext};
use crate::job::{Job, JobStatus};
use crate::queue::JobQueue;
use crate::read_model::{ReadModel, ReadModelHost};
use crate::reducer::{JsonMergeReducer, Reducer};
use crate::verify::{AcceptAllVerifier, SignatureVerifier};
use docsync_model::{Action, Operation};
use docsync_store::{CacheConfig, InMemoryOperationStore, OperationStore, WriteCache};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Configuration for a reactor.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of executor worker threads.
    pub worker_threads: usize,
    /// Default timeout for [`Reactor::submit_and_wait`].
    pub job_timeout: Duration,
    /// Write-cache sizing.
    pub cache: CacheConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            job_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
        }
    }
}

/// Builds a [`Reactor`] with pluggable parts.
///
/// Everything has a working default: an in-memory store, the JSON merge
/// reducer and a verifier that accepts all signed actions.
pub struct ReactorBuilder {
    store: Option<Arc<dyn OperationStore>>,
    reducer: Option<Arc<dyn Reducer>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    config: ReactorConfig,
}

impl ReactorBuilder {
    /// Sets the operation store.
    pub fn with_store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the reducer.
    pub fn with_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Sets the signature verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Sets the reactor configuration.
    pub fn with_config(mut self, config: ReactorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the reactor and starts its worker threads.
    pub fn build(self) -> Reactor {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryOperationStore::new()));
        let tracker = Arc::new(ConsistencyTracker::new());
        let read_models = Arc::new(ReadModelHost::new(Arc::clone(&store), Arc::clone(&tracker)));
        let ctx = Arc::new(ExecutorContext {
            cache: Arc::new(WriteCache::with_config(self.config.cache.clone())),
            reducer: self.reducer.unwrap_or_else(|| Arc::new(JsonMergeReducer)),
            verifier: self.verifier.unwrap_or_else(|| Arc::new(AcceptAllVerifier)),
            events: Arc::new(EventBus::new()),
            tracker,
            read_models,
            store,
        });
        let queue = Arc::new(JobQueue::new());

        let workers = (0..self.config.worker_threads.max(1))
            .map(|_| {
                let queue = Arc::clone(&queue);
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || run_worker(&queue, &ctx))
            })
            .collect();

        Reactor {
            ctx,
            queue,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            config: self.config,
        }
    }
}

/// The document engine.
///
/// All writes flow through the job pipeline: submissions enqueue a job and
/// return its id; worker threads verify, reduce and persist. Reads go
/// straight to the cache and store. One reactor owns one store.
pub struct Reactor {
    ctx: Arc<ExecutorContext>,
    queue: Arc<JobQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    config: ReactorConfig,
}

impl Reactor {
    /// Returns a builder with defaults.
    pub fn builder() -> ReactorBuilder {
        ReactorBuilder {
            store: None,
            reducer: None,
            verifier: None,
            config: ReactorConfig::default(),
        }
    }

    /// Creates a reactor with an in-memory store and default configuration.
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// Creates a document with the given initial state.
    pub fn create_document(
        &self,
        document_id: &str,
        initial_state: serde_json::Value,
    ) -> ReactorResult<()> {
        self.ctx.store.create_document(document_id, initial_state)?;
        Ok(())
    }

    /// Deletes a document, its operations and its cached state.
    pub fn delete_document(&self, document_id: &str) -> ReactorResult<()> {
        self.ctx.store.delete_document(document_id)?;
        self.ctx.cache.invalidate(document_id);
        Ok(())
    }

    /// Returns true if the document exists.
    pub fn contains(&self, document_id: &str) -> ReactorResult<bool> {
        Ok(self.ctx.store.contains(document_id)?)
    }

    /// Returns the ids of all documents.
    pub fn document_ids(&self) -> ReactorResult<Vec<String>> {
        Ok(self.ctx.store.document_ids()?)
    }

    /// Enqueues locally produced actions against one log.
    ///
    /// Returns the job id; resolution is observed through
    /// [`Reactor::wait_for_job`] or [`Reactor::job_status`].
    pub fn submit_actions(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        actions: Vec<Action>,
    ) -> ReactorResult<String> {
        self.enqueue(Job::mutation(document_id, scope, branch, actions))
    }

    /// Enqueues already-sequenced operations, e.g. received from a remote.
    pub fn load_operations(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        operations: Vec<Operation>,
    ) -> ReactorResult<String> {
        self.enqueue(Job::load(document_id, scope, branch, operations))
    }

    /// Enqueues a pre-built job, preserving its dependencies and hints.
    pub fn enqueue(&self, job: Job) -> ReactorResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReactorError::ShutDown);
        }
        let id = job.id.clone();
        self.queue.push(job);
        Ok(id)
    }

    /// Submits actions and blocks until the job resolves.
    ///
    /// Convenience over [`Reactor::submit_actions`] plus
    /// [`Reactor::wait_for_job`] with the configured default timeout.
    pub fn submit_and_wait(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        actions: Vec<Action>,
    ) -> ReactorResult<JobStatus> {
        let job_id = self.submit_actions(document_id, scope, branch, actions)?;
        self.wait_for_job(&job_id, self.config.job_timeout)
    }

    /// Blocks until a job resolves or the timeout expires.
    pub fn wait_for_job(&self, job_id: &str, timeout: Duration) -> ReactorResult<JobStatus> {
        let cancelled = AtomicBool::new(false);
        self.queue.wait(job_id, timeout, &cancelled)
    }

    /// Like [`Reactor::wait_for_job`], abandoning the wait when `cancelled`
    /// is raised. The job itself keeps running.
    pub fn wait_for_job_with_cancel(
        &self,
        job_id: &str,
        timeout: Duration,
        cancelled: &AtomicBool,
    ) -> ReactorResult<JobStatus> {
        self.queue.wait(job_id, timeout, cancelled)
    }

    /// Returns the status of a job, if known.
    pub fn job_status(&self, job_id: &str) -> ReactorResult<JobStatus> {
        self.queue
            .status(job_id)
            .ok_or_else(|| ReactorError::JobNotFound {
                job_id: job_id.into(),
            })
    }

    /// Returns the current state of one document log.
    pub fn document_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> ReactorResult<serde_json::Value> {
        let history = self.ctx.store.read(document_id, scope, branch, 0)?;
        current_state(&self.ctx, document_id, scope, branch, &history)
    }

    /// Returns the operations of one document log, log order.
    pub fn operations(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> ReactorResult<Vec<Operation>> {
        Ok(self.ctx.store.read(document_id, scope, branch, 0)?)
    }

    /// Subscribes to document-changed events.
    pub fn subscribe(
        &self,
        callback: impl Fn(&DocumentChangedEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.ctx.events.subscribe(callback)
    }

    /// Registers a read model; it catches up on the next commit.
    pub fn register_read_model(&self, model: Arc<dyn ReadModel>) {
        self.ctx.read_models.register(model);
    }

    /// Blocks until a read model has indexed at least up to `token`.
    pub fn wait_for_view(
        &self,
        view_id: &str,
        token: ConsistencyToken,
        timeout: Duration,
    ) -> bool {
        self.ctx.tracker.wait_for(view_id, token, timeout)
    }

    /// The consistency tracker, for advanced wiring.
    pub fn consistency(&self) -> &ConsistencyTracker {
        &self.ctx.tracker
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.ctx.store
    }

    /// Stops accepting jobs, drains the queue and joins the workers.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("executor worker panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(input: serde_json::Value) -> Action {
        Action::new("SET", input, "global")
    }

    fn make_reactor() -> Reactor {
        let reactor = Reactor::in_memory();
        reactor.create_document("doc-1", json!({})).unwrap();
        reactor
    }

    #[test]
    fn submit_and_wait_commits() {
        let reactor = make_reactor();
        let status = reactor
            .submit_and_wait("doc-1", "global", "main", vec![set(json!({"a": 1}))])
            .unwrap();

        assert!(status.succeeded());
        assert!(status.token.is_some());
        assert_eq!(
            reactor.document_state("doc-1", "global", "main").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn sequential_submissions_extend_the_log() {
        let reactor = make_reactor();
        for i in 0..5 {
            reactor
                .submit_and_wait("doc-1", "global", "main", vec![set(json!({"n": i}))])
                .unwrap();
        }

        let ops = reactor.operations("doc-1", "global", "main").unwrap();
        let indices: Vec<_> = ops.iter().map(|op| op.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            reactor.document_state("doc-1", "global", "main").unwrap(),
            json!({"n": 4})
        );
    }

    #[test]
    fn concurrent_submissions_all_land() {
        let reactor = Arc::new(make_reactor());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reactor = Arc::clone(&reactor);
                std::thread::spawn(move || {
                    reactor
                        .submit_and_wait(
                            "doc-1",
                            "global",
                            "main",
                            vec![set(json!({ (format!("k{i}")): i }))],
                        )
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().succeeded());
        }

        let ops = reactor.operations("doc-1", "global", "main").unwrap();
        assert_eq!(ops.len(), 8);
        // Strictly contiguous indices regardless of interleaving.
        let indices: Vec<_> = ops.iter().map(|op| op.index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<u64>>());

        let state = reactor.document_state("doc-1", "global", "main").unwrap();
        assert_eq!(state.as_object().unwrap().len(), 8);
    }

    #[test]
    fn scopes_and_branches_are_independent_logs() {
        let reactor = make_reactor();
        reactor
            .submit_and_wait("doc-1", "global", "main", vec![set(json!({"g": 1}))])
            .unwrap();
        reactor
            .submit_and_wait(
                "doc-1",
                "local",
                "main",
                vec![Action::new("SET", json!({"l": 1}), "local")],
            )
            .unwrap();

        assert_eq!(
            reactor.document_state("doc-1", "global", "main").unwrap(),
            json!({"g": 1})
        );
        assert_eq!(
            reactor.document_state("doc-1", "local", "main").unwrap(),
            json!({"l": 1})
        );
        assert_eq!(reactor.operations("doc-1", "global", "main").unwrap().len(), 1);
    }

    #[test]
    fn dependent_job_runs_after_its_dependency() {
        let reactor = make_reactor();
        let first = Job::mutation("doc-1", "global", "main", vec![set(json!({"a": 1}))]);
        let second = Job::mutation("doc-1", "global", "main", vec![set(json!({"b": 2}))])
            .with_depends_on(vec![first.id.clone()]);
        let second_id = reactor.enqueue(second).unwrap();
        reactor.enqueue(first).unwrap();

        let status = reactor
            .wait_for_job(&second_id, Duration::from_secs(5))
            .unwrap();
        assert!(status.succeeded());
        assert_eq!(
            reactor.document_state("doc-1", "global", "main").unwrap(),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn failed_job_reports_its_error() {
        let reactor = make_reactor();
        let status = reactor
            .submit_and_wait(
                "doc-2",
                "global",
                "main",
                vec![set(json!({"a": 1}))],
            )
            .unwrap();
        // doc-2 was never created.
        assert!(!status.succeeded());
        assert!(status.error.as_deref().unwrap_or("").contains("doc-2"));
    }

    #[test]
    fn read_after_write_via_consistency_token() {
        use crate::read_model::ReadModel;
        use docsync_store::CommittedOperation;

        struct CountingModel(parking_lot::Mutex<usize>);
        impl ReadModel for CountingModel {
            fn id(&self) -> &str {
                "counter"
            }
            fn index(&self, _operation: &CommittedOperation) {
                *self.0.lock() += 1;
            }
        }

        let reactor = make_reactor();
        let model = Arc::new(CountingModel(parking_lot::Mutex::new(0)));
        reactor.register_read_model(model.clone());

        let status = reactor
            .submit_and_wait("doc-1", "global", "main", vec![set(json!({"a": 1}))])
            .unwrap();
        let token = status.token.unwrap();

        assert!(reactor.wait_for_view("counter", token, Duration::from_secs(2)));
        assert_eq!(*model.0.lock(), 1);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let reactor = make_reactor();
        reactor.shutdown();
        let result = reactor.submit_actions("doc-1", "global", "main", vec![]);
        assert!(matches!(result, Err(ReactorError::ShutDown)));
    }

    #[test]
    fn events_fire_after_commit() {
        let reactor = make_reactor();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = reactor.subscribe(move |e| {
            seen_cb
                .lock()
                .push((e.document_id.clone(), e.operations.len()));
        });

        reactor
            .submit_and_wait(
                "doc-1",
                "global",
                "main",
                vec![set(json!({"a": 1})), set(json!({"b": 2}))],
            )
            .unwrap();

        assert_eq!(*seen.lock(), vec![("doc-1".to_string(), 2)]);
    }
}
