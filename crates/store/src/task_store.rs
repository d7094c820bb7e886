//! Task store abstraction: the single source of truth for job status.
//!
//! ## Read discipline
//!
//! Reads must be **fresh**: every `get` reflects the most recently committed
//! write, with no caller-side caching across repeated reads of the same task.
//! This is a hard contract, not an optimization — the progress bridge polls
//! the same record once a second, and a read path backed by a long-lived
//! handle (or any request-scoped memoization) would return a snapshot from
//! the time the handle was acquired, missing terminal transitions entirely.
//! Implementations therefore acquire and release their read resources inside
//! each call.
//!
//! ## Write discipline
//!
//! All writes are single-record and guarded on the current status, so the
//! ownership rule (submitter at creation, one worker while claimed, control
//! operations gated on status) is enforced at the storage layer even if a
//! caller misbehaves. No multi-record transactions are needed.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use loreforge_core::{EntityId, TaskError, TaskId, TaskRecord, TaskStatus, WorkerId};

/// Task store error.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    /// The current status does not admit the requested mutation.
    #[error("conflict: task {task_id} is {status}")]
    Conflict { task_id: TaskId, status: TaskStatus },

    /// The store is temporarily unreachable; callers may retry.
    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),

    /// Non-transient storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Domain-level rejection (bad progress value etc).
    #[error(transparent)]
    Domain(#[from] TaskError),
}

impl TaskStoreError {
    /// Whether a bounded retry is worthwhile (bridge reads, worker writes).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn conflict(task_id: TaskId, status: TaskStatus) -> Self {
        Self::Conflict { task_id, status }
    }
}

/// Outcome of a worker's claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// `Pending -> Processing` succeeded; this worker now owns the record.
    Claimed(TaskRecord),
    /// The record was not claimable: already terminal (stop landed between
    /// enqueue and dequeue, or an at-least-once redelivery of a finished
    /// task) or already owned by another worker. Execution must be skipped.
    Skipped(TaskStatus),
}

/// Counts by status, for operational visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl TaskStats {
    pub fn bump(&mut self, status: TaskStatus, count: usize) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Processing => self.processing += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Stopped => self.stopped += count,
        }
    }
}

/// Persisted task records with guarded, single-record mutations.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly submitted record.
    async fn insert(&self, record: &TaskRecord) -> Result<(), TaskStoreError>;

    /// Fresh read of one record.
    async fn get(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError>;

    /// Atomic worker claim: `Pending -> Processing`, recording ownership.
    ///
    /// Never errors on an unclaimable-but-existing record; that is the
    /// `Skipped` outcome, because at-least-once delivery makes it a routine
    /// event rather than a fault.
    async fn claim(&self, task_id: TaskId, worker_id: &WorkerId)
    -> Result<ClaimOutcome, TaskStoreError>;

    /// Progress checkpoint write from the owning worker.
    ///
    /// Monotonic by construction (a lower value clamps to the current one)
    /// and applied only while the record is `Processing` and owned by
    /// `worker_id`. Returns the record's status after the call — a terminal
    /// status tells the worker a control operation finished the task out from
    /// under it (the cooperative-stop checkpoint).
    async fn record_progress(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        progress: u8,
        message: &str,
    ) -> Result<TaskStatus, TaskStoreError>;

    /// `Processing -> Completed` with the result payload.
    async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), TaskStoreError>;

    /// `Pending|Processing -> Failed` with the error detail.
    ///
    /// `Pending -> Failed` is the submitter's enqueue-failure path.
    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError>;

    /// `Pending|Processing -> Stopped` (cooperative cancellation marker).
    async fn stop(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError>;

    /// `Failed|Stopped -> Pending` for a fresh attempt: resets
    /// progress/result/error/ownership, increments `retry_count`.
    ///
    /// Whether `Stopped` is actually retryable is control-operation policy;
    /// the store only enforces the state machine.
    async fn reset_for_retry(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError>;

    /// List records, optionally filtered by status, newest first.
    async fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError>;

    /// List records acting on a given entity, newest first.
    async fn list_by_entity(
        &self,
        entity_id: EntityId,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError>;

    /// Counts by status.
    async fn stats(&self) -> Result<TaskStats, TaskStoreError>;
}

#[async_trait]
impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    async fn insert(&self, record: &TaskRecord) -> Result<(), TaskStoreError> {
        (**self).insert(record).await
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        (**self).get(task_id).await
    }

    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
    ) -> Result<ClaimOutcome, TaskStoreError> {
        (**self).claim(task_id, worker_id).await
    }

    async fn record_progress(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        progress: u8,
        message: &str,
    ) -> Result<TaskStatus, TaskStoreError> {
        (**self)
            .record_progress(task_id, worker_id, progress, message)
            .await
    }

    async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), TaskStoreError> {
        (**self).complete(task_id, result).await
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError> {
        (**self).fail(task_id, error).await
    }

    async fn stop(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        (**self).stop(task_id).await
    }

    async fn reset_for_retry(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        (**self).reset_for_retry(task_id).await
    }

    async fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        (**self).list_by_status(status, limit).await
    }

    async fn list_by_entity(
        &self,
        entity_id: EntityId,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        (**self).list_by_entity(entity_id, entity_type, limit).await
    }

    async fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        (**self).stats().await
    }
}
