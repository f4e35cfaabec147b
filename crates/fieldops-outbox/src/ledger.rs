//! Storage seam between the queue and the durable ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldops_database::{
    queries, AsyncDatabase, DatabaseError, DatabaseResult, NewOutboxEvent, OutboxEvent,
    OutboxStatusUpdate,
};

/// Durable store the queue writes through.
///
/// Implemented for [`AsyncDatabase`]; other implementations exist for tests.
#[async_trait]
pub trait OutboxLedger: Send + Sync {
    /// Persist a new Pending event. Must fail if the write is not durable.
    async fn insert(&self, event: NewOutboxEvent) -> DatabaseResult<OutboxEvent>;

    /// Persist a single state transition. Fails with `NotFound` if the row is gone.
    async fn update_status(&self, update: OutboxStatusUpdate) -> DatabaseResult<()>;

    /// Persist a settled batch and the sync timestamp in one transaction.
    async fn commit_settled(
        &self,
        updates: Vec<OutboxStatusUpdate>,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<usize>;

    /// Pending and DeadLettered events in creation order.
    async fn load_active(&self) -> DatabaseResult<Vec<OutboxEvent>>;

    async fn last_sync_at(&self) -> DatabaseResult<Option<DateTime<Utc>>>;

    /// Return every DeadLettered event to Pending with a fresh retry budget.
    async fn reset_dead_lettered(&self) -> DatabaseResult<Vec<OutboxEvent>>;

    async fn clear(&self) -> DatabaseResult<usize>;
}

#[async_trait]
impl OutboxLedger for AsyncDatabase {
    async fn insert(&self, event: NewOutboxEvent) -> DatabaseResult<OutboxEvent> {
        self.call(move |conn| queries::insert_outbox_event(conn, &event))
            .await
    }

    async fn update_status(&self, update: OutboxStatusUpdate) -> DatabaseResult<()> {
        self.call(move |conn| {
            if queries::update_outbox_event_status(conn, &update)? {
                Ok(())
            } else {
                Err(DatabaseError::NotFound(update.id))
            }
        })
        .await
    }

    async fn commit_settled(
        &self,
        updates: Vec<OutboxStatusUpdate>,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> DatabaseResult<usize> {
        self.call(move |conn| queries::commit_settled_events(conn, &updates, last_sync_at))
            .await
    }

    async fn load_active(&self) -> DatabaseResult<Vec<OutboxEvent>> {
        self.call(queries::load_active_outbox_events).await
    }

    async fn last_sync_at(&self) -> DatabaseResult<Option<DateTime<Utc>>> {
        self.call(queries::get_last_sync_at).await
    }

    async fn reset_dead_lettered(&self) -> DatabaseResult<Vec<OutboxEvent>> {
        self.call(queries::reset_dead_lettered_events).await
    }

    async fn clear(&self) -> DatabaseResult<usize> {
        self.call(queries::clear_outbox).await
    }
}
