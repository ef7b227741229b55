//! The shared job queue.

use crate::error::{ReactorError, ReactorResult};
use crate::job::{Job, JobState, JobStatus};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

type LogKey = (String, String, String);

/// Resolved statuses kept around for late `status`/`wait` callers; older
/// entries are evicted so a long-running queue stays bounded.
const RESOLVED_RETENTION: usize = 1024;

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Job>,
    running: HashMap<String, LogKey>,
    /// Logs currently being written; jobs for the same log serialize.
    busy_logs: HashSet<LogKey>,
    resolved: HashMap<String, JobStatus>,
    resolved_order: VecDeque<String>,
    shutdown: bool,
}

/// A single shared queue feeding the executor worker pool.
///
/// Jobs for the same `(document, scope, branch)` are serialized: a job is
/// only handed out when no other job for its log is running. Jobs with
/// unresolved dependencies stay queued. State transitions are enforced
/// loudly: starting a job that is not ready, or resolving one that is not
/// running, is a [`ReactorError::JobState`].
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

impl JobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cond: Condvar::new(),
        }
    }

    /// Enqueues a job in the `Ready` state.
    pub fn push(&self, job: Job) {
        let mut inner = self.inner.lock();
        inner.pending.push_back(job);
        drop(inner);
        self.cond.notify_all();
    }

    /// Takes the next runnable job, blocking until one is available.
    ///
    /// Returns `None` once the queue is shut down and drained of runnable
    /// work. The returned job is marked `Running`.
    pub fn next_ready(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(pos) = Self::find_runnable(&inner) {
                let job = inner
                    .pending
                    .remove(pos)
                    .unwrap_or_else(|| unreachable!("position found above"));
                let key = job.log_key();
                inner.running.insert(job.id.clone(), key.clone());
                inner.busy_logs.insert(key);
                return Some(job);
            }
            if inner.shutdown {
                return None;
            }
            self.cond.wait(&mut inner);
        }
    }

    fn find_runnable(inner: &QueueInner) -> Option<usize> {
        inner.pending.iter().position(|job| {
            !inner.busy_logs.contains(&job.log_key())
                && job.depends_on.iter().all(|dep| Self::is_settled(inner, dep))
        })
    }

    /// A dependency gates its dependents only while it is still queued or
    /// running; anything else has resolved (its status may already have
    /// been evicted).
    fn is_settled(inner: &QueueInner, job_id: &str) -> bool {
        !inner.running.contains_key(job_id)
            && !inner.pending.iter().any(|job| job.id == job_id)
    }

    /// Resolves a running job successfully.
    ///
    /// `token` carries the commit's read-after-write handle, if the job
    /// committed anything.
    pub fn complete(
        &self,
        job: &Job,
        token: Option<crate::consistency::ConsistencyToken>,
    ) -> ReactorResult<()> {
        self.resolve(
            job,
            JobStatus {
                state: JobState::Resolved,
                error: None,
                error_history: job.error_history.clone(),
                token,
            },
        )
    }

    /// Resolves a running job as failed.
    pub fn fail(&self, job: &Job, error: impl Into<String>) -> ReactorResult<()> {
        let error = error.into();
        let mut history = job.error_history.clone();
        if history.last().map(String::as_str) != Some(error.as_str()) {
            history.push(error.clone());
        }
        self.resolve(
            job,
            JobStatus {
                state: JobState::Resolved,
                error: Some(error),
                error_history: history,
                token: None,
            },
        )
    }

    fn resolve(&self, job: &Job, status: JobStatus) -> ReactorResult<()> {
        let mut inner = self.inner.lock();
        let Some(key) = inner.running.remove(&job.id) else {
            return Err(ReactorError::JobState {
                job_id: job.id.clone(),
                attempted: "resolve",
                current: Self::state_of(&inner, &job.id).name(),
            });
        };
        inner.busy_logs.remove(&key);
        inner.resolved.insert(job.id.clone(), status);
        inner.resolved_order.push_back(job.id.clone());
        while inner.resolved_order.len() > RESOLVED_RETENTION {
            if let Some(evicted) = inner.resolved_order.pop_front() {
                inner.resolved.remove(&evicted);
            }
        }
        drop(inner);
        self.cond.notify_all();
        Ok(())
    }

    /// Puts a running job back in the queue for a retry.
    pub fn requeue(&self, mut job: Job) -> ReactorResult<()> {
        let mut inner = self.inner.lock();
        let Some(key) = inner.running.remove(&job.id) else {
            return Err(ReactorError::JobState {
                job_id: job.id.clone(),
                attempted: "requeue",
                current: Self::state_of(&inner, &job.id).name(),
            });
        };
        inner.busy_logs.remove(&key);
        job.retry_count += 1;
        inner.pending.push_back(job);
        drop(inner);
        self.cond.notify_all();
        Ok(())
    }

    fn state_of(inner: &QueueInner, job_id: &str) -> JobState {
        if inner.running.contains_key(job_id) {
            JobState::Running
        } else if inner.resolved.contains_key(job_id) {
            JobState::Resolved
        } else {
            JobState::Ready
        }
    }

    /// Returns the status of a job, if known.
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        let inner = self.inner.lock();
        if let Some(status) = inner.resolved.get(job_id) {
            return Some(status.clone());
        }
        if inner.running.contains_key(job_id) {
            return Some(JobStatus {
                state: JobState::Running,
                error: None,
                error_history: Vec::new(),
                token: None,
            });
        }
        inner.pending.iter().find(|j| j.id == job_id).map(|j| JobStatus {
            state: JobState::Ready,
            error: None,
            error_history: j.error_history.clone(),
            token: None,
        })
    }

    /// Blocks until a job resolves, times out, or the caller's cancel flag
    /// is raised.
    ///
    /// Abandoning the wait never affects the job itself.
    pub fn wait(
        &self,
        job_id: &str,
        timeout: Duration,
        cancelled: &std::sync::atomic::AtomicBool,
    ) -> ReactorResult<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(status) = inner.resolved.get(job_id) {
                return Ok(status.clone());
            }
            if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ReactorError::Cancelled);
            }
            if inner.shutdown {
                return Err(ReactorError::ShutDown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReactorError::Timeout);
            }
            // Bounded wait so cancellation is observed promptly.
            let step = (deadline - now).min(Duration::from_millis(20));
            self.cond.wait_for(&mut inner, step);
        }
    }

    /// Shuts the queue down; blocked workers drain and exit.
    pub fn shutdown(&self) {
        self.inner.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Number of jobs waiting to run.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
