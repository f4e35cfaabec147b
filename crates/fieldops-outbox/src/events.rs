//! Producer-side event construction and typed payloads.

use crate::{OutboxError, OutboxResult};
use chrono::{DateTime, Utc};
use fieldops_database::{NewOutboxEvent, WorkerEventKind};
use serde::{Deserialize, Serialize};

/// A worker action handed to [`OutboxQueue::enqueue`](crate::OutboxQueue::enqueue).
///
/// The id and creation time are assigned by the queue at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkerEvent {
    pub kind: WorkerEventKind,
    pub worker_id: String,
    pub building_id: String,
    pub payload: Vec<u8>,
}

impl NewWorkerEvent {
    pub fn new(
        kind: WorkerEventKind,
        worker_id: impl Into<String>,
        building_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            worker_id: worker_id.into(),
            building_id: building_id.into(),
            payload,
        }
    }

    /// Build an event whose payload is the JSON encoding of `payload`.
    pub fn with_json<T: Serialize>(
        kind: WorkerEventKind,
        worker_id: impl Into<String>,
        building_id: impl Into<String>,
        payload: &T,
    ) -> OutboxResult<Self> {
        Ok(Self::new(kind, worker_id, building_id, serde_json::to_vec(payload)?))
    }

    /// Reject events that could never be correlated by the backend.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.worker_id.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("worker_id is empty".to_string()));
        }
        if self.building_id.trim().is_empty() {
            return Err(OutboxError::InvalidEvent("building_id is empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn into_new_outbox_event(self, created_at: DateTime<Utc>) -> NewOutboxEvent {
        NewOutboxEvent {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            payload: self.payload,
            worker_id: self.worker_id,
            building_id: self.building_id,
            created_at,
        }
    }
}

/// A task marked done in the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub task_id: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo_ids: Vec<String>,
}

/// Direction of a clock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOperation {
    In,
    Out,
}

impl ClockOperation {
    pub fn kind(&self) -> WorkerEventKind {
        match self {
            Self::In => WorkerEventKind::ClockIn,
            Self::Out => WorkerEventKind::ClockOut,
        }
    }
}

/// Where and when a worker clocked in or out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockEntry {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Metadata for photo evidence. The image bytes travel separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpload {
    pub photo_id: String,
    pub content_type: String,
    pub byte_size: u64,
    pub taken_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingStatusUpdate {
    pub status: String,
    pub reported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Result of one checklist line in a routine inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionItem {
    pub item: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineInspection {
    pub routine_id: String,
    pub inspected_at: DateTime<Utc>,
    pub items: Vec<InspectionItem>,
}

impl RoutineInspection {
    pub fn passed(&self) -> bool {
        self.items.iter().all(|item| item.passed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    pub severity: EmergencySeverity,
    pub description: String,
    pub reported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentUpdate {
    pub task_id: String,
    pub comment: String,
    pub written_at: DateTime<Utc>,
}
