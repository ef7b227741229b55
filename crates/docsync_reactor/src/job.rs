//! Jobs: the unit of work of the pipeline.

use docsync_model::{Action, Operation};

/// What a job carries.
///
/// A closed union: mutation jobs carry actions to be reduced, load jobs
/// carry already-sequenced operations to be merged in (e.g. from a remote).
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Locally submitted actions to reduce and persist.
    Mutation {
        /// The actions, in submission order.
        actions: Vec<Action>,
    },
    /// Remote operations to reconcile into the local log.
    Load {
        /// The incoming operations.
        operations: Vec<Operation>,
    },
}

/// A unit of work against one `(document, scope, branch)` log.
///
/// Jobs are created on submission, mutated only by the executor, and
/// destroyed on resolution.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job id.
    pub id: String,
    /// Target document.
    pub document_id: String,
    /// Target scope.
    pub scope: String,
    /// Target branch.
    pub branch: String,
    /// The work itself.
    pub kind: JobKind,
    /// Jobs that must resolve before this one starts.
    pub depends_on: Vec<String>,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// Retries allowed for transient storage failures.
    pub max_retries: u32,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// All error messages, oldest first.
    pub error_history: Vec<String>,
    /// UTC creation time in milliseconds.
    pub created_at_utc_ms: u64,
    /// Opaque scheduling hint, carried through untouched.
    pub queue_hint: Option<String>,
}

impl Job {
    /// Creates a mutation job.
    pub fn mutation(
        document_id: impl Into<String>,
        scope: impl Into<String>,
        branch: impl Into<String>,
        actions: Vec<Action>,
    ) -> Self {
        Self::new(
            document_id,
            scope,
            branch,
            JobKind::Mutation { actions },
        )
    }

    /// Creates a load job.
    pub fn load(
        document_id: impl Into<String>,
        scope: impl Into<String>,
        branch: impl Into<String>,
        operations: Vec<Operation>,
    ) -> Self {
        Self::new(
            document_id,
            scope,
            branch,
            JobKind::Load { operations },
        )
    }

    fn new(
        document_id: impl Into<String>,
        scope: impl Into<String>,
        branch: impl Into<String>,
        kind: JobKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            scope: scope.into(),
            branch: branch.into(),
            kind,
            depends_on: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            error_history: Vec::new(),
            created_at_utc_ms: now_utc_ms(),
            queue_hint: None,
        }
    }

    /// Sets the jobs this one depends on.
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the scheduling hint.
    pub fn with_queue_hint(mut self, hint: impl Into<String>) -> Self {
        self.queue_hint = Some(hint.into());
        self
    }

    /// Records an error on the job.
    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error_history.push(error.clone());
        self.last_error = Some(error);
    }

    /// The `(document, scope, branch)` key jobs serialize on.
    pub fn log_key(&self) -> (String, String, String) {
        (
            self.document_id.clone(),
            self.scope.clone(),
            self.branch.clone(),
        )
    }
}

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued, not yet started.
    Ready,
    /// Being executed.
    Running,
    /// Finished, successfully or not.
    Resolved,
}

impl JobState {
    /// Short name used in state-transition errors.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Ready => "ready",
            JobState::Running => "running",
            JobState::Resolved => "resolved",
        }
    }
}

/// The caller-visible status of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    /// Lifecycle state.
    pub state: JobState,
    /// The error the job resolved with, if it failed.
    pub error: Option<String>,
    /// Every error recorded across retries, oldest first.
    pub error_history: Vec<String>,
    /// Read-after-write token, set when the job committed operations.
    pub token: Option<crate::consistency::ConsistencyToken>,
}

impl JobStatus {
    /// Returns true if the job resolved successfully.
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Resolved && self.error.is_none()
    }
}

pub(crate) fn now_utc_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
