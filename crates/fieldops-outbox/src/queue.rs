//! Outbox queue: in-memory mirror of the ledger with a single-flight flush.

use crate::recovery::{recover_state, RecoveryReport};
use crate::{
    DeadLetterReason, EventSubmitter, NewWorkerEvent, OutboxError, OutboxLedger, OutboxResult,
    RetryDecision, RetryPolicy, SubmitError,
};
use chrono::{DateTime, Utc};
use fieldops_database::{
    DatabaseError, DatabaseResult, OutboxEvent, OutboxStatus, OutboxStatusUpdate, WorkerEventKind,
};
use std::collections::HashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Default high-water mark for pending events.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Retry count at which a pending event counts as high-retry in [`QueueStatus`].
pub const HIGH_RETRY_THRESHOLD: u32 = 3;

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Enqueue fails with `QueueFull` once this many events are pending.
    pub max_pending: usize,
    pub retry: RetryPolicy,
    /// Stop starting new submissions once a pass has run this long.
    pub pass_deadline: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            retry: RetryPolicy::default(),
            pass_deadline: None,
        }
    }
}

/// Summary for sync indicators and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    /// Pending events that have failed at least [`HIGH_RETRY_THRESHOLD`] times.
    pub high_retry: usize,
    pub dead_lettered: usize,
    pub in_progress: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// The backend rejected our credentials. Flushing is paused until
    /// [`OutboxQueue::credentials_refreshed`] is called.
    pub auth_required: bool,
}

/// Outcome of one call to [`OutboxQueue::attempt_flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// No pass ran: another flush held the claim, nothing was pending, or
    /// flushing is paused for re-authentication.
    pub skipped: bool,
    pub attempted: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Pending events left untouched (not yet due, deadline, or auth halt).
    pub deferred: usize,
}

impl FlushReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Raised when an event leaves the automatic delivery path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxAlert {
    pub event_id: String,
    pub kind: WorkerEventKind,
    pub reason: DeadLetterReason,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

struct QueueState {
    /// Creation order.
    pending: Vec<OutboxEvent>,
    dead_lettered: Vec<OutboxEvent>,
    last_sync_at: Option<DateTime<Utc>>,
    auth_required: bool,
}

impl QueueState {
    fn take_pending(&mut self, id: &str) -> Option<OutboxEvent> {
        let index = self.pending.iter().position(|event| event.id == id)?;
        Some(self.pending.remove(index))
    }
}

/// Releases the flush claim on drop, including unwinding and cancellation.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Durable worker-event outbox.
///
/// Every accepted event is in the ledger before `enqueue` returns. Delivery
/// runs one pass at a time; concurrent flush requests are no-ops.
pub struct OutboxQueue {
    ledger: Arc<dyn OutboxLedger>,
    submitter: Arc<dyn EventSubmitter>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    flushing: AtomicBool,
    pub(crate) wake: Arc<Notify>,
    alerts: broadcast::Sender<OutboxAlert>,
    recovery: RecoveryReport,
}

impl OutboxQueue {
    /// Build the queue from whatever the ledger holds.
    ///
    /// An unreadable ledger is logged and the queue starts empty; see
    /// [`recovery_report`](Self::recovery_report).
    pub async fn recover(
        ledger: Arc<dyn OutboxLedger>,
        submitter: Arc<dyn EventSubmitter>,
        config: QueueConfig,
    ) -> Self {
        let (recovered, recovery) = recover_state(ledger.as_ref()).await;
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        Self {
            ledger,
            submitter,
            config,
            state: Mutex::new(QueueState {
                pending: recovered.pending,
                dead_lettered: recovered.dead_lettered,
                last_sync_at: recovered.last_sync_at,
                auth_required: false,
            }),
            flushing: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            alerts,
            recovery,
        }
    }

    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Durably record an event and wake the flush worker.
    ///
    /// Returns once the event is in the ledger. Never touches the network.
    pub async fn enqueue(&self, event: NewWorkerEvent) -> OutboxResult<OutboxEvent> {
        event.validate()?;

        let record = {
            let mut state = self.state.lock().await;
            if state.pending.len() >= self.config.max_pending {
                warn!(
                    pending = state.pending.len(),
                    limit = self.config.max_pending,
                    "Outbox full, rejecting event"
                );
                return Err(OutboxError::QueueFull {
                    pending: state.pending.len(),
                    limit: self.config.max_pending,
                });
            }

            // Under the state lock so memory order matches ledger order.
            let record = self
                .ledger
                .insert(event.into_new_outbox_event(Utc::now()))
                .await
                .map_err(|e| {
                    error!(
                        error = %e,
                        ledger_unavailable = e.is_unavailable(),
                        "Failed to persist outbox event"
                    );
                    OutboxError::Storage(e)
                })?;
            state.pending.push(record.clone());
            record
        };

        debug!(
            event_id = %record.id,
            kind = record.kind.as_str(),
            worker_id = %record.worker_id,
            "Enqueued worker event"
        );
        self.request_flush();
        Ok(record)
    }

    /// Run one delivery pass over the due pending events, oldest first.
    ///
    /// Returns `FlushReport::skipped()` when another pass is running, nothing
    /// is pending, or an earlier auth rejection has not been cleared. An auth
    /// rejection stops the pass, commits what was settled, and returns
    /// `OutboxError::AuthRequired`. A failed retry write leaves that event
    /// untouched and the pass returns `OutboxError::Storage`.
    pub async fn attempt_flush(&self) -> OutboxResult<FlushReport> {
        let Some(_guard) = FlushGuard::acquire(&self.flushing) else {
            debug!("Flush already in progress, skipping");
            return Ok(FlushReport::skipped());
        };

        let policy = &self.config.retry;
        let now = Utc::now();
        let (due, not_due) = {
            let state = self.state.lock().await;
            if state.auth_required {
                debug!("Flush paused until credentials are refreshed");
                return Ok(FlushReport::skipped());
            }
            if state.pending.is_empty() {
                return Ok(FlushReport::skipped());
            }
            let due: Vec<OutboxEvent> = state
                .pending
                .iter()
                .filter(|event| policy.is_due(event.next_retry_at, now))
                .cloned()
                .collect();
            let not_due = state.pending.len() - due.len();
            (due, not_due)
        };

        let mut report = FlushReport {
            deferred: not_due,
            ..FlushReport::default()
        };
        let mut settled: Vec<OutboxStatusUpdate> = Vec::new();
        let mut last_sync_at = None;
        let mut auth_error = None;
        let mut storage_error: Option<DatabaseError> = None;
        let started = Instant::now();
        let total = due.len();

        debug!(due = total, not_due, "Starting outbox flush");

        for (index, event) in due.into_iter().enumerate() {
            if let Some(deadline) = self.config.pass_deadline {
                if started.elapsed() >= deadline {
                    info!(remaining = total - index, "Flush deadline reached");
                    report.deferred += total - index;
                    break;
                }
            }

            report.attempted += 1;
            match self.submitter.submit(&event).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    if let Some(mut delivered) = state.take_pending(&event.id) {
                        delivered.status = OutboxStatus::Completed;
                        delivered.next_retry_at = None;
                        settled.push(OutboxStatusUpdate::from_event(&delivered));
                    }
                    last_sync_at = Some(Utc::now());
                    report.delivered += 1;
                    debug!(event_id = %event.id, "Worker event delivered");
                }
                Err(SubmitError::Auth { message }) => {
                    warn!(
                        event_id = %event.id,
                        error = %message,
                        "Sync credentials rejected, halting flush"
                    );
                    report.attempted -= 1;
                    report.deferred += total - index;
                    auth_error = Some(message);
                    break;
                }
                Err(err) => match self.record_failure(&event, &err, &mut report).await {
                    Ok(Some(update)) => settled.push(update),
                    Ok(None) => {}
                    Err(e) => {
                        storage_error.get_or_insert(e);
                    }
                },
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Some(at) = last_sync_at {
                state.last_sync_at = Some(at);
            }
            if auth_error.is_some() {
                state.auth_required = true;
            }
        }

        if !settled.is_empty() || last_sync_at.is_some() {
            self.ledger
                .commit_settled(settled, last_sync_at)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to commit settled outbox events");
                    OutboxError::Storage(e)
                })?;
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            "Outbox flush finished"
        );

        if let Some(e) = storage_error {
            return Err(OutboxError::Storage(e));
        }
        match auth_error {
            Some(message) => Err(OutboxError::AuthRequired(message)),
            None => Ok(report),
        }
    }

    /// Apply the retry policy to a failed attempt.
    ///
    /// A retry reaches the ledger before memory changes, so a failed write
    /// leaves the event exactly as it was. A dead-letter transition is
    /// returned for the end-of-pass commit.
    async fn record_failure(
        &self,
        event: &OutboxEvent,
        err: &SubmitError,
        report: &mut FlushReport,
    ) -> DatabaseResult<Option<OutboxStatusUpdate>> {
        let mut state = self.state.lock().await;
        let Some(index) = state.pending.iter().position(|e| e.id == event.id) else {
            return Ok(None);
        };

        let mut failed = state.pending[index].clone();
        failed.last_error = Some(err.to_string());

        match self.config.retry.on_failure(failed.retry_count, err, Utc::now()) {
            RetryDecision::Retry {
                retry_count,
                next_retry_at,
            } => {
                failed.retry_count = retry_count;
                failed.next_retry_at = Some(next_retry_at);
                self.persist_retry(&failed).await?;

                warn!(
                    event_id = %failed.id,
                    retry_count,
                    next_retry_at = %next_retry_at,
                    error = %err,
                    "Worker event delivery failed, will retry"
                );
                state.pending[index] = failed;
                report.retried += 1;
                Ok(None)
            }
            RetryDecision::DeadLetter {
                retry_count,
                reason,
            } => {
                failed.status = OutboxStatus::DeadLettered;
                failed.retry_count = retry_count;
                failed.next_retry_at = None;
                let update = OutboxStatusUpdate::from_event(&failed);

                error!(
                    event_id = %failed.id,
                    kind = failed.kind.as_str(),
                    retry_count,
                    reason = ?reason,
                    error = %err,
                    "Worker event dead-lettered"
                );

                // No receivers is fine.
                let _ = self.alerts.send(OutboxAlert {
                    event_id: failed.id.clone(),
                    kind: failed.kind,
                    reason,
                    retry_count,
                    last_error: failed.last_error.clone(),
                });

                state.pending.remove(index);
                state.dead_lettered.push(failed);
                report.dead_lettered += 1;
                Ok(Some(update))
            }
        }
    }

    async fn persist_retry(&self, event: &OutboxEvent) -> DatabaseResult<()> {
        self.ledger
            .update_status(OutboxStatusUpdate::from_event(event))
            .await
            .map_err(|e| {
                error!(
                    event_id = %event.id,
                    retry_count = event.retry_count,
                    error = %e,
                    "Failed to persist retry state"
                );
                e
            })
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Time of the last acknowledged delivery, if any.
    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_sync_at
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            pending: state.pending.len(),
            high_retry: state
                .pending
                .iter()
                .filter(|event| event.retry_count >= HIGH_RETRY_THRESHOLD)
                .count(),
            dead_lettered: state.dead_lettered.len(),
            in_progress: self.is_flushing(),
            last_sync_at: state.last_sync_at,
            auth_required: state.auth_required,
        }
    }

    /// Snapshot of pending events in delivery order.
    pub async fn pending_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.pending.clone()
    }

    /// Snapshot of dead-lettered events awaiting manual attention.
    pub async fn dead_lettered_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.dead_lettered.clone()
    }

    /// Return every dead-lettered event to Pending with `retry_count = 0`.
    ///
    /// Events dead-lettered by a pass that is still running reach the ledger
    /// at the end of that pass; they stay dead-lettered and are picked up by
    /// the next call.
    pub async fn retry_all(&self) -> OutboxResult<usize> {
        let mut state = self.state.lock().await;
        let reset = self.ledger.reset_dead_lettered().await?;
        let count = reset.len();

        let reset_ids: HashSet<&str> = reset.iter().map(|event| event.id.as_str()).collect();
        state
            .dead_lettered
            .retain(|event| !reset_ids.contains(event.id.as_str()));
        state.pending.extend(reset);
        state
            .pending
            .sort_by(|a, b| a.created_at.cmp(&b.created_at));
        drop(state);

        if count > 0 {
            info!(count, "Reset dead-lettered worker events");
            self.request_flush();
        }
        Ok(count)
    }

    /// Delete every event and the sync bookkeeping. For operators and tests.
    pub async fn clear(&self) -> OutboxResult<usize> {
        let mut state = self.state.lock().await;
        let deleted = self.ledger.clear().await?;
        state.pending.clear();
        state.dead_lettered.clear();
        state.last_sync_at = None;
        state.auth_required = false;

        warn!(deleted, "Outbox cleared");
        Ok(deleted)
    }

    /// Subscribe to dead-letter alerts raised after this call.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<OutboxAlert> {
        self.alerts.subscribe()
    }

    /// Resume flushing after an auth halt, once the submitter holds new
    /// credentials.
    pub async fn credentials_refreshed(&self) {
        let was_halted = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.auth_required)
        };
        if was_halted {
            info!("Credentials refreshed, resuming outbox flushes");
        }
        self.request_flush();
    }

    /// Ask the flush worker to run a pass soon.
    pub fn request_flush(&self) {
        self.wake.notify_one();
    }
}

impl Drop for OutboxQueue {
    fn drop(&mut self) {
        // Lets a parked worker observe that the queue is gone.
        self.wake.notify_one();
    }
}
