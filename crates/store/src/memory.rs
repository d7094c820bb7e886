//! In-memory task store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use loreforge_core::{EntityId, TaskError, TaskId, TaskRecord, TaskResult, TaskStatus, WorkerId};

use crate::task_store::{ClaimOutcome, TaskStats, TaskStore, TaskStoreError};

/// In-memory task store.
///
/// Every read clones the record under a short-lived lock, so reads are fresh
/// by construction (nothing survives between calls that could serve a stale
/// snapshot). Transitions go through the `TaskRecord` guard methods, keeping
/// the state machine identical to the persistent implementation.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a guarded mutation to one record, mapping state-machine
    /// rejections to `Conflict` (the storage-level vocabulary for "the
    /// current status does not admit this").
    fn apply<F>(&self, task_id: TaskId, mutate: F) -> Result<TaskRecord, TaskStoreError>
    where
        F: FnOnce(&mut TaskRecord) -> TaskResult<()>,
    {
        let mut tasks = self.tasks.write().expect("task store lock poisoned");
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        match mutate(record) {
            Ok(()) => Ok(record.clone()),
            Err(TaskError::InvalidTransition { .. }) | Err(TaskError::NotRetryable(_)) => {
                Err(TaskStoreError::conflict(task_id, record.status))
            }
            Err(other) => Err(TaskStoreError::Domain(other)),
        }
    }

    fn list_filtered<F>(&self, filter: F, limit: usize) -> Vec<TaskRecord>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let tasks = self.tasks.read().expect("task store lock poisoned");
        let mut result: Vec<_> = tasks.values().filter(|t| filter(t)).cloned().collect();
        // Newest first.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        result
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().expect("task store lock poisoned");
        if tasks.contains_key(&record.id) {
            return Err(TaskStoreError::AlreadyExists(record.id));
        }
        tasks.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        let tasks = self.tasks.read().expect("task store lock poisoned");
        tasks
            .get(&task_id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(task_id))
    }

    async fn claim(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
    ) -> Result<ClaimOutcome, TaskStoreError> {
        let mut tasks = self.tasks.write().expect("task store lock poisoned");
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        if record.status != TaskStatus::Pending {
            return Ok(ClaimOutcome::Skipped(record.status));
        }

        record
            .mark_claimed(worker_id.clone())
            .map_err(TaskStoreError::Domain)?;
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn record_progress(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        progress: u8,
        message: &str,
    ) -> Result<TaskStatus, TaskStoreError> {
        if progress > 100 {
            return Err(TaskStoreError::Domain(TaskError::ProgressOutOfRange(
                progress,
            )));
        }

        let mut tasks = self.tasks.write().expect("task store lock poisoned");
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        if record.status.is_terminal() {
            // Control operation finished the task out from under the worker;
            // the worker observes this at its next checkpoint.
            return Ok(record.status);
        }

        if record.status != TaskStatus::Processing
            || record.worker_id.as_ref() != Some(worker_id)
        {
            return Err(TaskStoreError::conflict(task_id, record.status));
        }

        record
            .record_progress(progress, message)
            .map_err(TaskStoreError::Domain)?;
        Ok(record.status)
    }

    async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> Result<(), TaskStoreError> {
        self.apply(task_id, |record| record.mark_completed(result))?;
        Ok(())
    }

    async fn fail(&self, task_id: TaskId, error: &str) -> Result<(), TaskStoreError> {
        self.apply(task_id, |record| record.mark_failed(error))?;
        Ok(())
    }

    async fn stop(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        self.apply(task_id, |record| record.mark_stopped())
    }

    async fn reset_for_retry(&self, task_id: TaskId) -> Result<TaskRecord, TaskStoreError> {
        self.apply(task_id, |record| record.reset_for_retry())
    }

    async fn list_by_status(
        &self,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        Ok(self.list_filtered(|t| status.is_none_or(|s| t.status == s), limit))
    }

    async fn list_by_entity(
        &self,
        entity_id: EntityId,
        entity_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        Ok(self.list_filtered(
            |t| {
                t.related_entity.as_ref().is_some_and(|e| {
                    e.entity_id == entity_id
                        && entity_type.is_none_or(|ty| e.entity_type == ty)
                })
            },
            limit,
        ))
    }

    async fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let tasks = self.tasks.read().expect("task store lock poisoned");
        let mut stats = TaskStats::default();
        for record in tasks.values() {
            stats.bump(record.status, 1);
        }
        Ok(stats)
    }
}
