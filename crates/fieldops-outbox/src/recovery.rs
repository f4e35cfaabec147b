//! Cold-start reconstruction of the in-memory queue from the ledger.

use crate::OutboxLedger;
use chrono::{DateTime, Utc};
use fieldops_database::{OutboxEvent, OutboxStatus};
use serde::Serialize;
use tracing::{info, warn};

/// What recovery found in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub pending: usize,
    pub dead_lettered: usize,
    /// The ledger could not be read; the queue started empty.
    pub failed: bool,
}

pub(crate) struct RecoveredState {
    pub pending: Vec<OutboxEvent>,
    pub dead_lettered: Vec<OutboxEvent>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl RecoveredState {
    fn empty() -> Self {
        Self {
            pending: Vec::new(),
            dead_lettered: Vec::new(),
            last_sync_at: None,
        }
    }
}

/// Load active events. Never fails: an unreadable ledger yields an empty
/// queue so new actions can still be recorded.
pub(crate) async fn recover_state(ledger: &dyn OutboxLedger) -> (RecoveredState, RecoveryReport) {
    let events = match ledger.load_active().await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "Outbox ledger unreadable, starting with an empty queue");
            return (
                RecoveredState::empty(),
                RecoveryReport {
                    failed: true,
                    ..RecoveryReport::default()
                },
            );
        }
    };

    let last_sync_at = ledger.last_sync_at().await.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to read last sync time");
        None
    });

    let (dead_lettered, pending): (Vec<_>, Vec<_>) = events
        .into_iter()
        .partition(|event| event.status == OutboxStatus::DeadLettered);

    let report = RecoveryReport {
        pending: pending.len(),
        dead_lettered: dead_lettered.len(),
        failed: false,
    };

    info!(
        pending = report.pending,
        dead_lettered = report.dead_lettered,
        last_sync_at = ?last_sync_at,
        "Recovered outbox from ledger"
    );

    (
        RecoveredState {
            pending,
            dead_lettered,
            last_sync_at,
        },
        report,
    )
}
