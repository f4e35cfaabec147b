//! Typed convenience constructors for each worker action.

use crate::events::{
    BuildingStatusUpdate, ClockEntry, ClockOperation, CommentUpdate, EmergencyReport, PhotoUpload,
    RoutineInspection, TaskCompletion,
};
use crate::{NewWorkerEvent, OutboxQueue, OutboxResult};
use fieldops_database::{OutboxEvent, WorkerEventKind};
use serde::Serialize;

impl OutboxQueue {
    async fn record<T: Serialize>(
        &self,
        kind: WorkerEventKind,
        worker_id: &str,
        building_id: &str,
        payload: &T,
    ) -> OutboxResult<OutboxEvent> {
        let event = NewWorkerEvent::with_json(kind, worker_id, building_id, payload)?;
        self.enqueue(event).await
    }

    pub async fn record_task_completion(
        &self,
        worker_id: &str,
        building_id: &str,
        completion: &TaskCompletion,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::TaskCompletion, worker_id, building_id, completion)
            .await
    }

    pub async fn record_clock_operation(
        &self,
        worker_id: &str,
        building_id: &str,
        operation: ClockOperation,
        entry: &ClockEntry,
    ) -> OutboxResult<OutboxEvent> {
        self.record(operation.kind(), worker_id, building_id, entry)
            .await
    }

    pub async fn record_clock_in(
        &self,
        worker_id: &str,
        building_id: &str,
        entry: &ClockEntry,
    ) -> OutboxResult<OutboxEvent> {
        self.record_clock_operation(worker_id, building_id, ClockOperation::In, entry)
            .await
    }

    pub async fn record_clock_out(
        &self,
        worker_id: &str,
        building_id: &str,
        entry: &ClockEntry,
    ) -> OutboxResult<OutboxEvent> {
        self.record_clock_operation(worker_id, building_id, ClockOperation::Out, entry)
            .await
    }

    pub async fn record_photo_upload(
        &self,
        worker_id: &str,
        building_id: &str,
        photo: &PhotoUpload,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::PhotoUpload, worker_id, building_id, photo)
            .await
    }

    pub async fn record_building_status_update(
        &self,
        worker_id: &str,
        building_id: &str,
        update: &BuildingStatusUpdate,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::BuildingStatusUpdate, worker_id, building_id, update)
            .await
    }

    pub async fn record_routine_inspection(
        &self,
        worker_id: &str,
        building_id: &str,
        inspection: &RoutineInspection,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::RoutineInspection, worker_id, building_id, inspection)
            .await
    }

    pub async fn record_emergency_report(
        &self,
        worker_id: &str,
        building_id: &str,
        report: &EmergencyReport,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::EmergencyReport, worker_id, building_id, report)
            .await
    }

    pub async fn record_comment_update(
        &self,
        worker_id: &str,
        building_id: &str,
        comment: &CommentUpdate,
    ) -> OutboxResult<OutboxEvent> {
        self.record(WorkerEventKind::CommentUpdate, worker_id, building_id, comment)
            .await
    }
}
