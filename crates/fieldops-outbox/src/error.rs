//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
///
/// Delivery failures never appear here for producers: they are recorded on
/// the event in the ledger and surfaced through `QueueStatus` and alerts.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Ledger unavailable. The event was not durably recorded.
    #[error("Storage error: {0}")]
    Storage(#[from] fieldops_database::DatabaseError),

    /// High-water mark reached; the event was not recorded.
    #[error("Outbox full: {pending} pending events (limit {limit})")]
    QueueFull { pending: usize, limit: usize },

    /// Event rejected before persistence (e.g. empty correlation key).
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The backend rejected our credentials; flushing halts until re-authentication.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
