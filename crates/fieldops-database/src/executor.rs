//! Ledger handle backed by one dedicated SQLite thread.
//!
//! Every statement runs on that thread in submission order, so callers on the
//! Tokio runtime never block and writes never race each other.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let pending = db
//!     .call(|conn| queries::count_outbox_events_by_status(conn, OutboxStatus::Pending))
//!     .await?;
//! ```

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Path reported for in-memory databases.
const IN_MEMORY_PATH: &str = ":memory:";

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            DatabaseError::Connection("executor thread has shut down".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Handle to the outbox ledger. Clones share the same executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open (or create) the ledger file, apply pragmas, and migrate.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening outbox ledger");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };

        // FULL synchronous: an acknowledged enqueue must survive power loss.
        db.call_sqlite(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                PRAGMA foreign_keys = ON;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )
        })
        .await?;

        db.call(|conn| migrations::run_migrations(conn)).await?;

        info!(path = %db.path, "Outbox ledger initialized with WAL mode");
        Ok(db)
    }

    /// Open an in-memory database (tests and ephemeral tooling).
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: IN_MEMORY_PATH.to_string(),
        };

        db.call_sqlite(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"))
            .await?;
        db.call(|conn| migrations::run_migrations(conn)).await?;

        Ok(db)
    }

    /// Run `f` on the ledger thread and await its result.
    ///
    /// Keep `f` to SQL and row mapping; it stalls every other ledger call.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Nest our result inside tokio_rusqlite's so DatabaseError crosses the thread intact.
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(from_tokio_rusqlite)?
    }

    /// [`call`](Self::call) for closures that only produce rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// File path, or `:memory:`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1"))
            .await?;
        debug!("Ledger health check passed");
        Ok(())
    }

    /// Drain queued calls and stop the executor thread. Other clones fail
    /// with [`DatabaseError::Connection`] afterwards.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("close failed: {}", e)))?;
        info!(path = %self.path, "Outbox ledger closed");
        Ok(())
    }
}
