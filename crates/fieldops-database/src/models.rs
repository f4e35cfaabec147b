//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Constant `entity_type` written on every outbox row.
pub const OUTBOX_ENTITY_TYPE: &str = "worker_event";

/// Kind of worker action recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEventKind {
    TaskCompletion,
    ClockIn,
    ClockOut,
    PhotoUpload,
    BuildingStatusUpdate,
    RoutineInspection,
    EmergencyReport,
    CommentUpdate,
}

impl WorkerEventKind {
    /// Every kind, in declaration order.
    pub const ALL: [WorkerEventKind; 8] = [
        Self::TaskCompletion,
        Self::ClockIn,
        Self::ClockOut,
        Self::PhotoUpload,
        Self::BuildingStatusUpdate,
        Self::RoutineInspection,
        Self::EmergencyReport,
        Self::CommentUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompletion => "task_completion",
            Self::ClockIn => "clock_in",
            Self::ClockOut => "clock_out",
            Self::PhotoUpload => "photo_upload",
            Self::BuildingStatusUpdate => "building_status_update",
            Self::RoutineInspection => "routine_inspection",
            Self::EmergencyReport => "emergency_report",
            Self::CommentUpdate => "comment_update",
        }
    }

    /// Parse a stored kind. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

/// Outbox event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Completed,
    DeadLettered,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Unknown values fall back to `Pending`; redelivery is safe because the
    /// backend deduplicates by event id.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "completed" => Self::Completed,
            "dead_lettered" => Self::DeadLettered,
            _ => Self::Pending,
        }
    }
}

/// A worker action that has not been acknowledged by the backend yet
/// (or has been, and is retained for audit).
///
/// Serialized as the `data` column so a row can be fully reconstructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: String,
    pub kind: WorkerEventKind,
    /// Opaque bytes owned by `kind`; never interpreted by the outbox.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub worker_id: String,
    pub building_id: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: OutboxStatus,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// New outbox event for insertion.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub id: String,
    pub kind: WorkerEventKind,
    pub payload: Vec<u8>,
    pub worker_id: String,
    pub building_id: String,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// The record as it looks right after insertion.
    pub fn to_pending_event(&self) -> OutboxEvent {
        OutboxEvent {
            id: self.id.clone(),
            kind: self.kind,
            payload: self.payload.clone(),
            worker_id: self.worker_id.clone(),
            building_id: self.building_id.clone(),
            created_at: self.created_at,
            retry_count: 0,
            status: OutboxStatus::Pending,
            next_retry_at: None,
            last_error: None,
        }
    }
}

/// A single state transition for an outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxStatusUpdate {
    pub id: String,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxStatusUpdate {
    /// Snapshot the mutable columns of an event.
    pub fn from_event(event: &OutboxEvent) -> Self {
        Self {
            id: event.id.clone(),
            status: event.status,
            retry_count: event.retry_count,
            next_retry_at: event.next_retry_at,
            last_error: event.last_error.clone(),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
