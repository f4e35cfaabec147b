//! Durable outbox for worker actions recorded while offline.
//!
//! This crate provides:
//! - OutboxQueue: in-memory mirror of the ledger with a single-flight flush
//! - RetryPolicy: exponential backoff with jitter and dead-lettering
//! - HttpSubmitter: delivery to the worker-events sync endpoint
//! - A background flush worker and typed `record_*` producer methods

mod error;
mod events;
mod ledger;
mod producer;
mod queue;
mod recovery;
mod retry;
mod sender;
pub mod testing;
mod worker;

pub use error::{OutboxError, OutboxResult};
pub use events::{
    BuildingStatusUpdate, ClockEntry, ClockOperation, CommentUpdate, EmergencyReport,
    EmergencySeverity, InspectionItem, NewWorkerEvent, PhotoUpload, RoutineInspection,
    TaskCompletion,
};
pub use ledger::OutboxLedger;
pub use queue::{
    FlushReport, OutboxAlert, OutboxQueue, QueueConfig, QueueStatus, DEFAULT_MAX_PENDING,
    HIGH_RETRY_THRESHOLD,
};
pub use recovery::RecoveryReport;
pub use retry::{DeadLetterReason, RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use sender::{
    classify_response, EventSubmitter, HttpSubmitter, SenderConfig, SubmitError,
    WORKER_EVENTS_PATH,
};

pub use fieldops_database::{OutboxEvent, OutboxStatus, WorkerEventKind};
