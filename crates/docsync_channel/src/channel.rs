//! Per-remote sync channels.

use crate::cursor::CursorStore;
use crate::error::{ChannelError, ChannelResult};
use crate::mailbox::{Mailbox, ObserverHandle, SyncOperation, SyncOperationStatus};
use crate::status::SyncStatusTracker;
use crate::transport::{ChannelMeta, ChannelTransport, Envelope};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Configuration for one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Interval between polls while healthy.
    pub poll_interval: Duration,
    /// First backoff delay after a failure.
    pub retry_initial_delay: Duration,
    /// Upper bound for backoff delays.
    pub retry_max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Consecutive failures before the channel halts with `Error` health.
    pub max_failures: u32,
    /// Optional document filter sent with the channel registration.
    pub document_filter: Option<Vec<String>>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_failures: 5,
            document_filter: None,
        }
    }
}

impl ChannelConfig {
    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the initial backoff delay.
    pub fn with_retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = delay;
        self
    }

    /// Sets the backoff upper bound.
    pub fn with_retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Sets the failure budget before the channel halts.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Sets the document filter.
    pub fn with_document_filter(mut self, documents: Vec<String>) -> Self {
        self.document_filter = Some(documents);
        self
    }

    /// Backoff delay after the given consecutive failure count (1-based).
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        let base = self.retry_initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(failures.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.retry_max_delay.as_secs_f64()))
    }
}

/// Operational health of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    /// Not polling.
    Idle,
    /// Poll loop is active.
    Running,
    /// Halted after exhausting the failure budget; must be restarted.
    Error,
}

/// Counters for operational visibility.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Failures over the channel's lifetime.
    pub total_failures: u64,
    /// UTC milliseconds of the last failure.
    pub last_failure_at_utc_ms: Option<u64>,
    /// UTC milliseconds of the last successful poll.
    pub last_poll_at_utc_ms: Option<u64>,
    /// Successful polls.
    pub polls: u64,
    /// Operation envelopes received.
    pub envelopes_received: u64,
    /// Batches pushed to the remote.
    pub batches_pushed: u64,
    /// Batches moved to the dead-letter mailbox.
    pub dead_lettered: u64,
}

/// Hand-off between outbox observers and the transmit thread.
struct TransmitQueue {
    pending: Mutex<VecDeque<SyncOperation>>,
    wake: Condvar,
    stop: AtomicBool,
}

impl TransmitQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }
}

/// One tracked remote: three mailboxes, a cursor, a poll loop and a
/// transmit loop.
///
/// Polling and transmission each run on their own thread and never block
/// the thread that adds to the outbox; an `add` only queues the hand-off.
/// On a successful push the item is optimistically removed, on failure it
/// moves to the dead-letter mailbox. Poll failures back off exponentially;
/// after `max_failures` consecutive failures the channel halts with
/// `Error` health until explicitly restarted.
pub struct Channel {
    meta: ChannelMeta,
    config: ChannelConfig,
    transport: Arc<dyn ChannelTransport>,
    inbox: Arc<Mailbox>,
    outbox: Arc<Mailbox>,
    dead_letter: Arc<Mailbox>,
    cursors: Arc<CursorStore>,
    health: RwLock<ChannelHealth>,
    stats: RwLock<ChannelStats>,
    stop: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    transmits: Arc<TransmitQueue>,
    transmitter: Mutex<Option<JoinHandle<()>>>,
    observers: Mutex<Vec<ObserverHandle>>,
}

impl Channel {
    /// Creates a channel for one remote and wires its mailboxes.
    ///
    /// The channel is created idle; call [`Channel::start`] to begin
    /// polling.
    pub fn new(
        remote_name: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        cursors: Arc<CursorStore>,
        status: Arc<SyncStatusTracker>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let remote_name = remote_name.into();
        let meta = ChannelMeta {
            channel_id: uuid::Uuid::new_v4().to_string(),
            remote_name: remote_name.clone(),
            document_filter: config.document_filter.clone(),
        };
        let channel = Arc::new(Self {
            meta,
            config,
            transport,
            inbox: Arc::new(Mailbox::new()),
            outbox: Arc::new(Mailbox::new()),
            dead_letter: Arc::new(Mailbox::new()),
            cursors,
            health: RwLock::new(ChannelHealth::Idle),
            stats: RwLock::new(ChannelStats::default()),
            stop: AtomicBool::new(false),
            poller: Mutex::new(None),
            transmits: Arc::new(TransmitQueue::new()),
            transmitter: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        });

        let mut observers = Vec::new();
        observers.extend(wire_status(
            &channel.inbox,
            &status,
            SyncStatusTracker::inbox_added,
            SyncStatusTracker::inbox_removed,
        ));
        observers.extend(wire_status(
            &channel.outbox,
            &status,
            SyncStatusTracker::outbox_added,
            SyncStatusTracker::outbox_removed,
        ));
        observers.extend(wire_status(
            &channel.dead_letter,
            &status,
            SyncStatusTracker::dead_letter_added,
            SyncStatusTracker::dead_letter_removed,
        ));

        // Adding to the outbox only queues the hand-off; the transmit
        // thread owns every transport push, so a slow remote never stalls
        // the committing thread.
        let transmits = Arc::clone(&channel.transmits);
        observers.push(channel.outbox.on_added(move |batch| {
            transmits.pending.lock().extend(batch.iter().cloned());
            transmits.wake.notify_one();
        }));
        *channel.observers.lock() = observers;

        let queue = Arc::clone(&channel.transmits);
        let worker = Arc::downgrade(&channel);
        *channel.transmitter.lock() =
            Some(std::thread::spawn(move || transmit_loop(&queue, &worker)));

        channel
    }

    /// The remote this channel talks to.
    pub fn remote_name(&self) -> &str {
        &self.meta.remote_name
    }

    /// The channel registration metadata.
    pub fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    /// Operations received and pending local application.
    pub fn inbox(&self) -> &Arc<Mailbox> {
        &self.inbox
    }

    /// Local operations pending transmission.
    pub fn outbox(&self) -> &Arc<Mailbox> {
        &self.outbox
    }

    /// Operations that exhausted retries or failed transport.
    pub fn dead_letter(&self) -> &Arc<Mailbox> {
        &self.dead_letter
    }

    /// Current health.
    pub fn health(&self) -> ChannelHealth {
        *self.health.read()
    }

    /// A snapshot of the channel's counters.
    pub fn stats(&self) -> ChannelStats {
        self.stats.read().clone()
    }

    /// Registers the channel on the remote and starts the poll loop.
    ///
    /// Also restarts a halted channel, resetting its failure counter.
    pub fn start(self: &Arc<Self>) -> ChannelResult<()> {
        self.halt();
        self.transport.touch(&self.meta)?;

        self.stop.store(false, Ordering::SeqCst);
        self.stats.write().consecutive_failures = 0;
        *self.health.write() = ChannelHealth::Running;

        let channel = Arc::clone(self);
        *self.poller.lock() = Some(std::thread::spawn(move || channel.poll_loop()));
        Ok(())
    }

    /// Stops the poll loop and joins its thread. Idempotent.
    pub fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poller.lock().take() {
            if handle.join().is_err() {
                tracing::error!(remote = %self.meta.remote_name, "channel poller panicked");
            }
        }
    }

    /// Polls the remote once: new envelopes land in the inbox, the cursor
    /// advances and the failure counter resets.
    ///
    /// A channel halted by its failure budget refuses explicit polls until
    /// restarted with [`Channel::start`].
    pub fn poll_now(&self) -> ChannelResult<usize> {
        if *self.health.read() == ChannelHealth::Error {
            return Err(ChannelError::Halted {
                remote: self.meta.remote_name.clone(),
            });
        }
        let cursor = self.cursors.cursor(&self.meta.remote_name).cursor_ordinal;
        let envelopes = self.transport.poll(&self.meta.channel_id, cursor)?;

        let mut newest = cursor;
        let mut received = 0usize;
        for envelope in envelopes {
            if let Some(position) = envelope.cursor() {
                newest = newest.max(position);
            }
            if let Envelope::Operations {
                document_id,
                scope,
                branch,
                operations,
                ..
            } = envelope
            {
                received += 1;
                self.inbox.add(SyncOperation::new(
                    &self.meta.remote_name,
                    document_id,
                    vec![scope],
                    branch,
                    operations,
                ));
            }
        }
        self.cursors
            .advance(&self.meta.remote_name, newest, now_utc_ms());

        let mut stats = self.stats.write();
        stats.consecutive_failures = 0;
        stats.polls += 1;
        stats.envelopes_received += received as u64;
        stats.last_poll_at_utc_ms = Some(now_utc_ms());
        Ok(received)
    }

    fn poll_loop(&self) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            match self.poll_now() {
                Ok(_) => self.sleep_interruptible(self.config.poll_interval),
                Err(err) => {
                    let failures = {
                        let mut stats = self.stats.write();
                        stats.consecutive_failures += 1;
                        stats.total_failures += 1;
                        stats.last_failure_at_utc_ms = Some(now_utc_ms());
                        stats.consecutive_failures
                    };
                    tracing::warn!(
                        remote = %self.meta.remote_name,
                        failures,
                        error = %err,
                        "poll failed",
                    );
                    if failures >= self.config.max_failures {
                        tracing::warn!(
                            remote = %self.meta.remote_name,
                            "failure budget exhausted, channel halted",
                        );
                        *self.health.write() = ChannelHealth::Error;
                        return;
                    }
                    self.sleep_interruptible(self.config.delay_for_failure(failures));
                }
            }
        }
        *self.health.write() = ChannelHealth::Idle;
    }

    /// Sleeps in small slices so a stop request is observed promptly.
    fn sleep_interruptible(&self, duration: Duration) {
        let deadline = std::time::Instant::now() + duration;
        while std::time::Instant::now() < deadline {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = deadline - std::time::Instant::now();
            std::thread::sleep(remaining.min(Duration::from_millis(10)));
        }
    }

    /// Pushes one outbox batch to the remote. Runs on the transmit thread.
    fn transmit(&self, operation: &SyncOperation) {
        self.outbox
            .set_status(&operation.id, SyncOperationStatus::Transported);
        match self.transport.push(&self.meta, operation) {
            Ok(()) => {
                // Optimistic remove on transmit: at-least-once delivery,
                // the receiver deduplicates.
                self.outbox
                    .set_status(&operation.id, SyncOperationStatus::Acked);
                self.outbox.remove(&operation.id);
                self.stats.write().batches_pushed += 1;
            }
            Err(err) => {
                tracing::warn!(
                    remote = %self.meta.remote_name,
                    document = %operation.document_id,
                    error = %err,
                    "push failed, dead-lettering",
                );
                if let Some(removed) = self.outbox.remove(&operation.id) {
                    self.dead_letter
                        .add(removed.with_status(SyncOperationStatus::Failed));
                }
                self.stats.write().dead_lettered += 1;
            }
        }
    }
}

/// Drains queued outbox batches until the channel is dropped.
fn transmit_loop(queue: &TransmitQueue, channel: &Weak<Channel>) {
    loop {
        let next = {
            let mut pending = queue.pending.lock();
            loop {
                if queue.stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(operation) = pending.pop_front() {
                    break operation;
                }
                queue.wake.wait(&mut pending);
            }
        };
        match channel.upgrade() {
            Some(channel) => channel.transmit(&next),
            None => return,
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poller.lock().take() {
            let _ = handle.join();
        }
        self.transmits.stop.store(true, Ordering::SeqCst);
        self.transmits.wake.notify_all();
        if let Some(handle) = self.transmitter.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Mirrors one mailbox's traffic into the status tracker, per document.
fn wire_status(
    mailbox: &Mailbox,
    status: &Arc<SyncStatusTracker>,
    added: fn(&SyncStatusTracker, &str, usize),
    removed: fn(&SyncStatusTracker, &str, usize),
) -> Vec<ObserverHandle> {
    let status_added = Arc::clone(status);
    let on_added = mailbox.on_added(move |batch| {
        for (document, count) in tally(batch) {
            added(&status_added, document, count);
        }
    });
    let status_removed = Arc::clone(status);
    let on_removed = mailbox.on_removed(move |batch| {
        for (document, count) in tally(batch) {
            removed(&status_removed, document, count);
        }
    });
    vec![on_added, on_removed]
}

fn tally(batch: &[SyncOperation]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for operation in batch {
        *counts.entry(operation.document_id.as_str()).or_insert(0) += 1;
    }
    counts
}

fn now_utc_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DocumentSyncStatus;
    use crate::transport::MockTransport;
    use docsync_model::{Action, Operation};
    use serde_json::json;
    use std::time::Instant;

    fn make_op(index: u64) -> Operation {
        let action = Action::new("SET", json!({"i": index}), "global").with_timestamp(index);
        Operation::from_action("doc-1", "global", "main", action, index, 0).unwrap()
    }

    fn make_channel(transport: Arc<MockTransport>) -> (Arc<Channel>, Arc<SyncStatusTracker>) {
        let status = Arc::new(SyncStatusTracker::new());
        let channel = Channel::new(
            "peer",
            transport,
            Arc::new(CursorStore::new()),
            Arc::clone(&status),
            ChannelConfig::default()
                .with_poll_interval(Duration::from_millis(5))
                .with_retry_initial_delay(Duration::from_millis(1))
                .with_max_failures(2),
        );
        (channel, status)
    }

    fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn outbox_add_transmits_and_removes() {
        let transport = Arc::new(MockTransport::new());
        let (channel, status) = make_channel(Arc::clone(&transport));

        let removed_statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let removed_cb = Arc::clone(&removed_statuses);
        let _observer = channel.outbox().on_removed(move |batch| {
            removed_cb.lock().extend(batch.iter().map(|op| op.status));
        });

        channel.outbox().add(SyncOperation::new(
            "peer",
            "doc-1",
            vec!["global".into()],
            "main",
            vec![make_op(0)],
        ));

        assert!(wait_until(Duration::from_secs(2), || {
            channel.outbox().is_empty() && channel.stats().batches_pushed == 1
        }));
        assert_eq!(transport.pushes().len(), 1);
        assert_eq!(*removed_statuses.lock(), vec![SyncOperationStatus::Acked]);
        // In and back out: net status returns to synced.
        assert_eq!(status.status("doc-1"), DocumentSyncStatus::Synced);
    }

    #[test]
    fn failed_push_dead_letters() {
        let transport = Arc::new(MockTransport::new());
        let (channel, status) = make_channel(Arc::clone(&transport));
        transport.set_failing(true);

        channel.outbox().add(SyncOperation::new(
            "peer",
            "doc-1",
            vec!["global".into()],
            "main",
            vec![make_op(0)],
        ));

        assert!(wait_until(Duration::from_secs(2), || {
            channel.outbox().is_empty() && channel.dead_letter().len() == 1
        }));
        assert_eq!(
            channel.dead_letter().items()[0].status,
            SyncOperationStatus::Failed
        );
        assert_eq!(status.status("doc-1"), DocumentSyncStatus::Error);
    }

    #[test]
    fn slow_transport_does_not_block_the_outbox_add() {
        struct SlowTransport {
            delay: Duration,
            pushes: parking_lot::Mutex<Vec<SyncOperation>>,
        }

        impl ChannelTransport for SlowTransport {
            fn touch(&self, _meta: &ChannelMeta) -> ChannelResult<()> {
                Ok(())
            }

            fn poll(&self, _channel_id: &str, _cursor: u64) -> ChannelResult<Vec<Envelope>> {
                Ok(Vec::new())
            }

            fn push(&self, _meta: &ChannelMeta, batch: &SyncOperation) -> ChannelResult<()> {
                std::thread::sleep(self.delay);
                self.pushes.lock().push(batch.clone());
                Ok(())
            }
        }

        let transport = Arc::new(SlowTransport {
            delay: Duration::from_millis(300),
            pushes: parking_lot::Mutex::new(Vec::new()),
        });
        let channel = Channel::new(
            "peer",
            Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            Arc::new(CursorStore::new()),
            Arc::new(SyncStatusTracker::new()),
            ChannelConfig::default(),
        );

        // The committing thread only hands the batch off; the push itself
        // runs on the channel's transmit thread.
        let started = Instant::now();
        channel.outbox().add(SyncOperation::new(
            "peer",
            "doc-1",
            vec!["global".into()],
            "main",
            vec![make_op(0)],
        ));
        assert!(started.elapsed() < Duration::from_millis(100));

        assert!(wait_until(Duration::from_secs(2), || {
            transport.pushes.lock().len() == 1 && channel.outbox().is_empty()
        }));
    }

    #[test]
    fn poll_fills_inbox_and_advances_cursor() {
        let transport = Arc::new(MockTransport::new());
        let cursors = Arc::new(CursorStore::new());
        let channel = Channel::new(
            "peer",
            Arc::clone(&transport) as Arc<dyn ChannelTransport>,
            Arc::clone(&cursors),
            Arc::new(SyncStatusTracker::new()),
            ChannelConfig::default(),
        );

        transport.enqueue_poll(vec![Envelope::Operations {
            document_id: "doc-1".into(),
            scope: "global".into(),
            branch: "main".into(),
            operations: vec![make_op(0), make_op(1)],
            cursor: 7,
        }]);

        let received = channel.poll_now().unwrap();
        assert_eq!(received, 1);
        assert_eq!(channel.inbox().len(), 1);
        assert_eq!(channel.inbox().items()[0].operations.len(), 2);
        assert_eq!(cursors.cursor("peer").cursor_ordinal, 7);
    }

    #[test]
    fn consecutive_failures_halt_the_channel() {
        let transport = Arc::new(MockTransport::new());
        let (channel, _status) = make_channel(Arc::clone(&transport));

        channel.start().unwrap();
        assert_eq!(channel.health(), ChannelHealth::Running);

        transport.set_failing(true);
        assert!(wait_until(Duration::from_secs(2), || {
            channel.health() == ChannelHealth::Error
        }));
        assert!(channel.stats().consecutive_failures >= 2);
        assert!(matches!(
            channel.poll_now(),
            Err(ChannelError::Halted { .. })
        ));

        // Externally restartable: health returns to running and polls
        // succeed again.
        transport.set_failing(false);
        channel.start().unwrap();
        assert_eq!(channel.health(), ChannelHealth::Running);
        assert!(wait_until(Duration::from_secs(2), || {
            channel.stats().consecutive_failures == 0 && channel.stats().polls > 0
        }));
        channel.halt();
    }

    #[test]
    fn halt_returns_to_idle() {
        let transport = Arc::new(MockTransport::new());
        let (channel, _status) = make_channel(transport);

        channel.start().unwrap();
        channel.halt();
        assert_eq!(channel.health(), ChannelHealth::Idle);
    }

    #[test]
    fn backoff_is_exponential_and_bounded() {
        let config = ChannelConfig::default()
            .with_retry_initial_delay(Duration::from_millis(100))
            .with_retry_max_delay(Duration::from_millis(450));

        assert_eq!(config.delay_for_failure(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_failure(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_failure(3), Duration::from_millis(400));
        // Bounded by the max delay.
        assert_eq!(config.delay_for_failure(4), Duration::from_millis(450));
    }
}
