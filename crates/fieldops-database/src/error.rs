//! Ledger error types.

use thiserror::Error;

/// Failure of a ledger operation.
///
/// Any of these on insert means the event was not durably recorded.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Ledger SQLite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The executor thread is gone or could not be started.
    #[error("Ledger unavailable: {0}")]
    Connection(String),

    #[error("Ledger migration failed: {0}")]
    Migration(String),

    #[error("Outbox event not found: {0}")]
    NotFound(String),

    /// The `data` column could not be encoded or decoded.
    #[error("Ledger record encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ledger filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ledger data: {0}")]
    InvalidData(String),
}

impl DatabaseError {
    /// Whether the ledger itself is unreachable, as opposed to a bad row.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
