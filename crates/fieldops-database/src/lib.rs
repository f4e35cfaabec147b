//! SQLite ledger for the field-ops worker event outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Database migrations for the outbox tables
//! - Model types for outbox rows
//! - Query helpers for every ledger operation
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let active = db.call(|conn| queries::load_active_outbox_events(conn)).await?;
//! ```
//!
//! **Important**: Only SQL operations should run inside `db.call()`.
//! Network calls and heavy computation must happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
