//! End-to-end queue behavior against a real SQLite ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldops_database::{
    queries, AsyncDatabase, DatabaseError, DatabaseResult, NewOutboxEvent, OutboxStatusUpdate,
};
use fieldops_outbox::testing::ScriptedSubmitter;
use fieldops_outbox::{
    DeadLetterReason, NewWorkerEvent, OutboxError, OutboxEvent, OutboxLedger, OutboxQueue,
    OutboxStatus, QueueConfig, RetryPolicy, SubmitError, TaskCompletion, WorkerEventKind,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn immediate() -> QueueConfig {
    QueueConfig {
        retry: RetryPolicy::immediate(),
        ..QueueConfig::default()
    }
}

fn task_event(worker: &str) -> NewWorkerEvent {
    NewWorkerEvent::new(WorkerEventKind::TaskCompletion, worker, "B1", b"{}".to_vec())
}

async fn open_queue(
    path: &Path,
    submitter: Arc<ScriptedSubmitter>,
    config: QueueConfig,
) -> (AsyncDatabase, Arc<OutboxQueue>) {
    let db = AsyncDatabase::open(path).await.unwrap();
    let queue = OutboxQueue::recover(Arc::new(db.clone()), submitter, config).await;
    (db, Arc::new(queue))
}

async fn ledger_row(db: &AsyncDatabase, id: &str) -> OutboxEvent {
    let id = id.to_string();
    db.call(move |conn| queries::get_outbox_event(conn, &id))
        .await
        .unwrap()
        .expect("row exists")
}

#[tokio::test]
async fn test_enqueued_events_survive_a_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (_db, queue) = open_queue(&path, submitter.clone(), immediate()).await;

    let mut ids = Vec::new();
    for worker in ["W1", "W2", "W3", "W4"] {
        ids.push(queue.enqueue(task_event(worker)).await.unwrap().id);
    }
    submitter.fail_event(&ids[1], SubmitError::transient("HTTP 502"));
    queue.attempt_flush().await.unwrap();

    let mut expected: HashSet<String> = HashSet::from([ids[1].clone()]);
    for worker in ["W5", "W6"] {
        expected.insert(queue.enqueue(task_event(worker)).await.unwrap().id);
    }

    // Simulated crash: nothing is flushed or closed gracefully.
    drop(queue);
    drop(_db);

    let (_db, recovered) =
        open_queue(&path, Arc::new(ScriptedSubmitter::succeeding()), immediate()).await;
    let pending: Vec<String> = recovered
        .pending_events()
        .await
        .into_iter()
        .map(|event| event.id)
        .collect();

    assert_eq!(pending.len(), expected.len());
    assert_eq!(pending.iter().cloned().collect::<HashSet<_>>(), expected);
    assert_eq!(recovered.recovery_report().pending, 3);
    assert!(recovered.last_sync_time().await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_flushes_submit_each_event_once() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::succeeding().with_delay(Duration::from_millis(20)));
    let (_db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;

    for worker in ["W1", "W2", "W3"] {
        queue.enqueue(task_event(worker)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move { queue.attempt_flush().await }));
    }

    let mut skipped = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().skipped {
            skipped += 1;
        }
    }

    assert_eq!(submitter.submission_count(), 3);
    assert_eq!(submitter.submitted_ids().into_iter().collect::<HashSet<_>>().len(), 3);
    assert!(skipped >= 7);
    assert_eq!(queue.pending_count().await, 0);
    assert!(!queue.is_flushing());
}

#[tokio::test]
async fn test_flush_of_empty_queue_changes_nothing() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (_db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;

    let before = queue.status().await;
    let report = queue.attempt_flush().await.unwrap();

    assert!(report.skipped);
    assert_eq!(submitter.submission_count(), 0);
    assert_eq!(queue.status().await, before);
}

#[tokio::test]
async fn test_failing_event_is_dead_lettered_after_five_passes_and_reset_by_retry_all() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::failing(SubmitError::transient("HTTP 503")));
    let (db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;
    let mut alerts = queue.subscribe_alerts();

    let id = queue.enqueue(task_event("W1")).await.unwrap().id;

    for pass in 1..=4u32 {
        let report = queue.attempt_flush().await.unwrap();
        assert_eq!(report.retried, 1);
        let pending = queue.pending_events().await;
        assert_eq!(pending[0].retry_count, pass);
        assert_eq!(ledger_row(&db, &id).await.retry_count, pass);
    }

    let report = queue.attempt_flush().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(queue.pending_count().await, 0);

    let row = ledger_row(&db, &id).await;
    assert_eq!(row.status, OutboxStatus::DeadLettered);
    assert_eq!(row.retry_count, 5);
    assert_eq!(row.last_error.as_deref(), Some("Transient delivery failure: HTTP 503"));

    let alert = alerts.try_recv().unwrap();
    assert_eq!(alert.event_id, id);
    assert_eq!(alert.reason, DeadLetterReason::RetryExhausted);
    assert_eq!(alert.retry_count, 5);

    // Excluded from further automatic attempts
    assert!(queue.attempt_flush().await.unwrap().skipped);
    assert_eq!(submitter.submission_count(), 5);
    assert_eq!(queue.status().await.dead_lettered, 1);

    assert_eq!(queue.retry_all().await.unwrap(), 1);
    let pending = queue.pending_events().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);
    assert_eq!(queue.status().await.dead_lettered, 0);

    let row = ledger_row(&db, &id).await;
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn test_pass_submits_oldest_first() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let path = dir.path().join("outbox.db");

    // Enqueue, restart, then flush so ordering comes from the ledger.
    let (_db, queue) =
        open_queue(&path, Arc::new(ScriptedSubmitter::succeeding()), immediate()).await;
    let a = queue.enqueue(task_event("A")).await.unwrap().id;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = queue.enqueue(task_event("B")).await.unwrap().id;
    drop(queue);
    drop(_db);

    let (_db, queue) = open_queue(&path, submitter.clone(), immediate()).await;
    queue.attempt_flush().await.unwrap();

    assert_eq!(submitter.submitted_ids(), vec![a, b]);
}

#[tokio::test]
async fn test_offline_then_online() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::failing(SubmitError::transient(
        "network unreachable",
    )));
    let (db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;

    let mut ids = Vec::new();
    for task in ["T1", "T2", "T3"] {
        let completion = TaskCompletion {
            task_id: task.to_string(),
            completed_at: Utc::now(),
            notes: None,
            photo_ids: vec![],
        };
        ids.push(queue.record_task_completion("W1", "B1", &completion).await.unwrap().id);
    }

    queue.attempt_flush().await.unwrap();
    assert_eq!(queue.pending_count().await, 3);
    assert!(queue.last_sync_time().await.is_none());

    submitter.set_failure(None);
    let report = queue.attempt_flush().await.unwrap();

    assert_eq!(report.delivered, 3);
    assert_eq!(queue.pending_count().await, 0);
    assert!(queue.last_sync_time().await.is_some());

    // 3 failed attempts, then 3 deliveries of the same 3 events
    let delivered: Vec<String> = submitter.submitted_ids().split_off(3);
    assert_eq!(delivered.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(delivered, ids);

    for id in &ids {
        assert_eq!(ledger_row(&db, id).await.status, OutboxStatus::Completed);
    }
}

#[tokio::test]
async fn test_dead_lettered_event_recovers_after_retry_all() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    let db = AsyncDatabase::open(&path).await.unwrap();
    let event = db
        .call(|conn| {
            let event = queries::insert_outbox_event(
                conn,
                &NewOutboxEvent {
                    id: "evt-dead".to_string(),
                    kind: WorkerEventKind::EmergencyReport,
                    payload: b"{}".to_vec(),
                    worker_id: "W1".to_string(),
                    building_id: "B1".to_string(),
                    created_at: Utc::now(),
                },
            )?;
            let mut update = OutboxStatusUpdate::from_event(&event);
            update.status = OutboxStatus::DeadLettered;
            update.retry_count = 5;
            queries::update_outbox_event_status(conn, &update)?;
            Ok(event)
        })
        .await
        .unwrap();
    drop(db);

    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (db, queue) = open_queue(&path, submitter.clone(), immediate()).await;
    assert_eq!(queue.status().await.dead_lettered, 1);
    assert_eq!(queue.pending_count().await, 0);

    assert_eq!(queue.retry_all().await.unwrap(), 1);
    let report = queue.attempt_flush().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(submitter.submissions()[0].retry_count, 0);
    assert_eq!(ledger_row(&db, &event.id).await.status, OutboxStatus::Completed);
}

#[tokio::test]
async fn test_auth_rejection_halts_the_pass() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;

    let mut ids = Vec::new();
    for worker in ["W1", "W2", "W3"] {
        ids.push(queue.enqueue(task_event(worker)).await.unwrap().id);
    }
    submitter.push_outcome(Err(SubmitError::Auth {
        message: "HTTP 401: token expired".to_string(),
    }));

    let result = queue.attempt_flush().await;
    assert!(matches!(result, Err(OutboxError::AuthRequired(_))));
    assert_eq!(submitter.submission_count(), 1);

    let pending = queue.pending_events().await;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|event| event.retry_count == 0));
    for id in &ids {
        let row = ledger_row(&db, id).await;
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 0);
    }
    assert!(queue.status().await.auth_required);
    assert!(!queue.is_flushing());

    // Paused until the credentials change.
    assert!(queue.attempt_flush().await.unwrap().skipped);
    assert_eq!(submitter.submission_count(), 1);

    queue.credentials_refreshed().await;
    let report = queue.attempt_flush().await.unwrap();
    assert_eq!(report.delivered, 3);
    assert!(!queue.status().await.auth_required);
}

#[tokio::test]
async fn test_permanent_rejection_dead_letters_immediately() {
    let dir = tempdir().unwrap();
    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;
    let mut alerts = queue.subscribe_alerts();

    let bad = queue.enqueue(task_event("W1")).await.unwrap().id;
    let good = queue.enqueue(task_event("W2")).await.unwrap().id;
    submitter.fail_event(
        &bad,
        SubmitError::Permanent {
            status: 404,
            message: "HTTP 404: unknown building".to_string(),
        },
    );

    let report = queue.attempt_flush().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.delivered, 1);

    let row = ledger_row(&db, &bad).await;
    assert_eq!(row.status, OutboxStatus::DeadLettered);
    assert_eq!(row.retry_count, 1);
    assert_eq!(ledger_row(&db, &good).await.status, OutboxStatus::Completed);

    let alert = alerts.try_recv().unwrap();
    assert_eq!(alert.reason, DeadLetterReason::PermanentRejection);
    assert_eq!(alert.kind, WorkerEventKind::TaskCompletion);
}

#[tokio::test]
async fn test_backoff_window_holds_across_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outbox.db");
    let config = QueueConfig {
        retry: RetryPolicy {
            backoff_base: Duration::from_secs(600),
            backoff_max: Duration::from_secs(600),
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        },
        ..QueueConfig::default()
    };

    let submitter = Arc::new(ScriptedSubmitter::failing(SubmitError::transient("HTTP 500")));
    let (db, queue) = open_queue(&path, submitter.clone(), config.clone()).await;
    let id = queue.enqueue(task_event("W1")).await.unwrap().id;
    queue.attempt_flush().await.unwrap();
    assert!(ledger_row(&db, &id).await.next_retry_at.unwrap() > Utc::now());
    drop(queue);
    drop(db);

    let submitter = Arc::new(ScriptedSubmitter::succeeding());
    let (_db, queue) = open_queue(&path, submitter.clone(), config).await;
    let report = queue.attempt_flush().await.unwrap();

    assert_eq!(report.attempted, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(submitter.submission_count(), 0);
    assert_eq!(queue.pending_count().await, 1);
}

#[tokio::test]
async fn test_enqueue_fails_loudly_when_ledger_is_unavailable() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    let queue = OutboxQueue::recover(
        Arc::new(db.clone()),
        Arc::new(ScriptedSubmitter::succeeding()),
        immediate(),
    )
    .await;
    db.close().await.unwrap();

    let result = queue.enqueue(task_event("W1")).await;

    assert!(matches!(result, Err(OutboxError::Storage(ref e)) if e.is_unavailable()));
    assert_eq!(queue.pending_count().await, 0);
}

/// Ledger that can be told to fail reads or single-row status writes.
struct FaultyLedger {
    inner: AsyncDatabase,
    fail_reads: bool,
    fail_status_writes: bool,
}

impl FaultyLedger {
    fn wrapping(inner: AsyncDatabase) -> Self {
        Self {
            inner,
            fail_reads: false,
            fail_status_writes: false,
        }
    }
}

#[async_trait]
impl OutboxLedger for FaultyLedger {
    async fn insert(&self, event: NewOutboxEvent) -> DatabaseResult<OutboxEvent> {
        self.inner.insert(event).await
    }

    async fn update_status(&self, update: OutboxStatusUpdate) -> DatabaseResult<()> {
        if self.fail_status_writes {
            return Err(DatabaseError::Connection("disk detached".to_string()));
        }
        self.inner.update_status(update).await
    }

    async fn commit_settled(
        &self,
        updates: Vec<OutboxStatusUpdate>,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<usize> {
        self.inner.commit_settled(updates, last_sync_at).await
    }

    async fn load_active(&self) -> DatabaseResult<Vec<OutboxEvent>> {
        if self.fail_reads {
            return Err(DatabaseError::InvalidData("corrupt ledger".to_string()));
        }
        self.inner.load_active().await
    }

    async fn last_sync_at(&self) -> DatabaseResult<Option<DateTime<Utc>>> {
        self.inner.last_sync_at().await
    }

    async fn reset_dead_lettered(&self) -> DatabaseResult<Vec<OutboxEvent>> {
        self.inner.reset_dead_lettered().await
    }

    async fn clear(&self) -> DatabaseResult<usize> {
        self.inner.clear().await
    }
}

#[tokio::test]
async fn test_unreadable_ledger_starts_empty_and_still_accepts_events() {
    let ledger = FaultyLedger {
        fail_reads: true,
        ..FaultyLedger::wrapping(AsyncDatabase::open_in_memory().await.unwrap())
    };
    let queue = OutboxQueue::recover(
        Arc::new(ledger),
        Arc::new(ScriptedSubmitter::succeeding()),
        immediate(),
    )
    .await;

    assert!(queue.recovery_report().failed);
    assert_eq!(queue.pending_count().await, 0);

    queue.enqueue(task_event("W1")).await.unwrap();
    assert_eq!(queue.pending_count().await, 1);
    assert_eq!(queue.attempt_flush().await.unwrap().delivered, 1);
}

#[tokio::test]
async fn test_failed_retry_write_surfaces_and_leaves_event_unchanged() {
    let db = AsyncDatabase::open_in_memory().await.unwrap();
    let ledger = FaultyLedger {
        fail_status_writes: true,
        ..FaultyLedger::wrapping(db.clone())
    };
    let submitter = Arc::new(ScriptedSubmitter::failing(SubmitError::transient("HTTP 503")));
    let queue = OutboxQueue::recover(Arc::new(ledger), submitter.clone(), immediate()).await;
    let id = queue.enqueue(task_event("W1")).await.unwrap().id;

    let result = queue.attempt_flush().await;
    assert!(matches!(result, Err(OutboxError::Storage(ref e)) if e.is_unavailable()));
    assert_eq!(submitter.submission_count(), 1);

    let pending = queue.pending_events().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);
    assert!(pending[0].next_retry_at.is_none());

    let row = ledger_row(&db, &id).await;
    assert_eq!(row.status, OutboxStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(row.next_retry_at.is_none());
}

#[tokio::test]
async fn test_retry_all_during_a_pass_keeps_dead_letters_in_step_with_the_ledger() {
    let dir = tempdir().unwrap();
    let slow_submit = Duration::from_millis(300);
    let submitter = Arc::new(ScriptedSubmitter::succeeding().with_delay(slow_submit));
    let (db, queue) =
        open_queue(&dir.path().join("outbox.db"), submitter.clone(), immediate()).await;

    let rejected = queue.enqueue(task_event("W1")).await.unwrap().id;
    let slow = queue.enqueue(task_event("W2")).await.unwrap().id;
    submitter.fail_event(
        &rejected,
        SubmitError::Permanent {
            status: 404,
            message: "HTTP 404: unknown building".to_string(),
        },
    );

    let flushing = Arc::clone(&queue);
    let pass = tokio::spawn(async move { flushing.attempt_flush().await });

    // First event is settled in memory, second is still in flight.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(queue.is_flushing());
    assert_eq!(queue.retry_all().await.unwrap(), 0);
    assert_eq!(queue.status().await.dead_lettered, 1);

    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.delivered, 1);

    let ledger_dead = db
        .call(|conn| queries::count_outbox_events_by_status(conn, OutboxStatus::DeadLettered))
        .await
        .unwrap();
    assert_eq!(ledger_dead, 1);
    assert_eq!(queue.status().await.dead_lettered, ledger_dead);
    assert_eq!(ledger_row(&db, &slow).await.status, OutboxStatus::Completed);

    // Once committed, the next retry_all picks it up.
    assert_eq!(queue.retry_all().await.unwrap(), 1);
    assert_eq!(queue.status().await.dead_lettered, 0);
    let pending = queue.pending_events().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, rejected);
    assert_eq!(ledger_row(&db, &rejected).await.status, OutboxStatus::Pending);
}
