//! Standalone query functions for the outbox ledger.
//!
//! Each function takes a `&Connection` as its first parameter so it can run
//! inside `AsyncDatabase::call` or directly against a plain connection.

use crate::{
    DatabaseResult, NewOutboxEvent, OutboxEvent, OutboxStatus, OutboxStatusUpdate,
    OUTBOX_ENTITY_TYPE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

/// `outbox_sync_state` key holding the last successful delivery time.
const LAST_SYNC_KEY: &str = "last_successful_sync_at";

const SELECT_EVENT_COLUMNS: &str =
    "SELECT data, retry_count, status, next_retry_at, last_error FROM outbox_events";

/// Raw row before the `data` JSON is decoded.
struct OutboxRow {
    data: String,
    retry_count: u32,
    status: String,
    next_retry_at: Option<String>,
    last_error: Option<String>,
}

impl OutboxRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            data: row.get(0)?,
            retry_count: row.get(1)?,
            status: row.get(2)?,
            next_retry_at: row.get(3)?,
            last_error: row.get(4)?,
        })
    }

    /// Decode `data` and overlay the mutable columns, which are authoritative.
    fn into_event(self) -> DatabaseResult<OutboxEvent> {
        let mut event: OutboxEvent = serde_json::from_str(&self.data)?;
        event.retry_count = self.retry_count;
        event.status = OutboxStatus::from_str(&self.status);
        event.next_retry_at = self.next_retry_at.map(parse_datetime);
        event.last_error = self.last_error;
        Ok(event)
    }
}

// ==========================================
// Outbox events
// ==========================================

/// Persist a new event (write-ahead). A duplicate id is an error.
pub fn insert_outbox_event(
    conn: &Connection,
    event: &NewOutboxEvent,
) -> DatabaseResult<OutboxEvent> {
    let record = event.to_pending_event();
    let data = serde_json::to_string(&record)?;
    let created_at = format_timestamp(&record.created_at);
    let now = format_timestamp(&Utc::now());

    conn.execute(
        "INSERT INTO outbox_events (id, entity_type, entity_id, action, data, retry_count, status,
                                    created_at, next_retry_at, building_id, last_error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, NULL, ?8, NULL, ?9)",
        params![
            record.id,
            OUTBOX_ENTITY_TYPE,
            record.worker_id,
            record.kind.as_str(),
            data,
            record.status.as_str(),
            created_at,
            record.building_id,
            now,
        ],
    )?;

    debug!(event_id = %record.id, kind = record.kind.as_str(), "Inserted outbox event");
    Ok(record)
}

/// Persist a single state transition. Returns whether a row changed.
pub fn update_outbox_event_status(
    conn: &Connection,
    update: &OutboxStatusUpdate,
) -> DatabaseResult<bool> {
    let now = format_timestamp(&Utc::now());
    let count = conn.execute(
        "UPDATE outbox_events
         SET status = ?1, retry_count = ?2, next_retry_at = ?3, last_error = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            update.status.as_str(),
            update.retry_count,
            update.next_retry_at.as_ref().map(format_timestamp),
            update.last_error,
            now,
            update.id,
        ],
    )?;
    Ok(count > 0)
}

/// Commit a settled batch of transitions and the sync timestamp in one transaction.
///
/// Returns the number of rows changed.
pub fn commit_settled_events(
    conn: &Connection,
    updates: &[OutboxStatusUpdate],
    last_sync_at: Option<DateTime<Utc>>,
) -> DatabaseResult<usize> {
    if updates.is_empty() && last_sync_at.is_none() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    for update in updates {
        if update_outbox_event_status(&tx, update)? {
            changed += 1;
        }
    }
    if let Some(synced_at) = last_sync_at {
        set_last_sync_at(&tx, synced_at)?;
    }
    tx.commit()?;

    debug!(changed, "Committed settled outbox batch");
    Ok(changed)
}

/// Load every Pending or DeadLettered event in creation order.
///
/// Rows whose `data` cannot be decoded are skipped with a warning so one
/// corrupt row cannot block recovery of the rest.
pub fn load_active_outbox_events(conn: &Connection) -> DatabaseResult<Vec<OutboxEvent>> {
    let sql = format!(
        "{} WHERE status IN ('pending', 'dead_lettered') ORDER BY created_at ASC, rowid ASC",
        SELECT_EVENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([], OutboxRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        match row.into_event() {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "Skipping undecodable outbox row"),
        }
    }
    Ok(events)
}

/// List events with the given status in creation order.
pub fn list_outbox_events_by_status(
    conn: &Connection,
    status: OutboxStatus,
) -> DatabaseResult<Vec<OutboxEvent>> {
    let sql = format!(
        "{} WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
        SELECT_EVENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![status.as_str()], OutboxRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(OutboxRow::into_event).collect()
}

/// Get an event by id.
pub fn get_outbox_event(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxEvent>> {
    let sql = format!("{} WHERE id = ?1", SELECT_EVENT_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    let result = stmt.query_row(params![id], OutboxRow::from_row);

    match result {
        Ok(row) => row.into_event().map(Some),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Count events with the given status.
pub fn count_outbox_events_by_status(
    conn: &Connection,
    status: OutboxStatus,
) -> DatabaseResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox_events WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Return every DeadLettered event to Pending with a zero retry count.
///
/// Returns the reset events in creation order.
pub fn reset_dead_lettered_events(conn: &Connection) -> DatabaseResult<Vec<OutboxEvent>> {
    let tx = conn.unchecked_transaction()?;

    let mut events = list_outbox_events_by_status(&tx, OutboxStatus::DeadLettered)?;
    if events.is_empty() {
        return Ok(events);
    }

    let now = format_timestamp(&Utc::now());
    tx.execute(
        "UPDATE outbox_events
         SET status = 'pending', retry_count = 0, next_retry_at = NULL, last_error = NULL,
             updated_at = ?1
         WHERE status = 'dead_lettered'",
        params![now],
    )?;
    tx.commit()?;

    for event in &mut events {
        event.status = OutboxStatus::Pending;
        event.retry_count = 0;
        event.next_retry_at = None;
        event.last_error = None;
    }

    debug!(count = events.len(), "Reset dead-lettered outbox events");
    Ok(events)
}

/// Delete every outbox row and the sync bookkeeping. Returns deleted event count.
pub fn clear_outbox(conn: &Connection) -> DatabaseResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let deleted = tx.execute("DELETE FROM outbox_events", [])?;
    tx.execute("DELETE FROM outbox_sync_state", [])?;
    tx.commit()?;
    Ok(deleted)
}

// ==========================================
// Sync state
// ==========================================

/// Get the last successful sync time, if any delivery has ever succeeded.
pub fn get_last_sync_at(conn: &Connection) -> DatabaseResult<Option<DateTime<Utc>>> {
    let result = conn.query_row(
        "SELECT value FROM outbox_sync_state WHERE key = ?1",
        params![LAST_SYNC_KEY],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(value) => Ok(Some(parse_datetime(value))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Record the last successful sync time.
pub fn set_last_sync_at(conn: &Connection, synced_at: DateTime<Utc>) -> DatabaseResult<()> {
    let value = format_timestamp(&synced_at);
    conn.execute(
        "INSERT INTO outbox_sync_state (key, value, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![LAST_SYNC_KEY, value],
    )?;
    Ok(())
}

// ==========================================
// Helpers
// ==========================================

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
