//! Control operations: explicit `retry` and cooperative `stop`.

use thiserror::Error;
use tracing::{error, info};

use loreforge_core::{TaskId, TaskRecord, TaskStatus};
use loreforge_queue::{JobMessage, JobQueue};
use loreforge_store::{TaskStore, TaskStoreError};

/// Control-operation policy.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Whether `retry` is permitted from `Stopped` in addition to `Failed`.
    pub retry_from_stopped: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            retry_from_stopped: false,
        }
    }
}

/// Control-operation error.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {task_id} cannot be retried from status {status}")]
    NotRetryable { task_id: TaskId, status: TaskStatus },

    #[error("task {task_id} cannot be stopped from status {status}")]
    NotStoppable { task_id: TaskId, status: TaskStatus },

    #[error("task store error: {0}")]
    Store(TaskStoreError),

    /// Re-enqueue failed after the record was reset; the record has been
    /// transitioned to `Failed` rather than left orphaned in `Pending`.
    #[error("re-enqueue failed: {0}")]
    Enqueue(String),
}

/// Retry/stop operations over the task store and queue.
///
/// Control operations never talk to workers: they mutate the record (gated on
/// its current status) and let the claim/checkpoint guards do the rest.
#[derive(Debug, Clone)]
pub struct TaskControl<S, Q> {
    store: S,
    queue: Q,
    config: ControlConfig,
}

impl<S, Q> TaskControl<S, Q>
where
    S: TaskStore,
    Q: JobQueue,
{
    pub fn new(store: S, queue: Q) -> Self {
        Self::with_config(store, queue, ControlConfig::default())
    }

    pub fn with_config(store: S, queue: Q, config: ControlConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Re-run a failed task: reset the record to a fresh `Pending` attempt
    /// and enqueue a new job message built from the persisted parameters.
    ///
    /// A bridge still polling the old terminal state simply observes the new
    /// `Pending`/`Processing` on its next fresh read.
    pub async fn retry(&self, task_id: TaskId) -> Result<TaskRecord, ControlError> {
        let current = self.store.get(task_id).await.map_err(map_store_error)?;

        match current.status {
            TaskStatus::Failed => {}
            TaskStatus::Stopped if self.config.retry_from_stopped => {}
            status => {
                return Err(ControlError::NotRetryable { task_id, status });
            }
        }

        let reset = self
            .store
            .reset_for_retry(task_id)
            .await
            .map_err(|err| match err {
                // Lost a race with another control operation; report what the
                // record is now.
                TaskStoreError::Conflict { status, .. } => {
                    ControlError::NotRetryable { task_id, status }
                }
                other => map_store_error(other),
            })?;

        let message = JobMessage::new(task_id, reset.job_type.clone(), reset.parameters.clone());
        if let Err(err) = self.queue.publish(&message).await {
            let detail = format!("re-enqueue failed: {err}");
            if let Err(store_err) = self.store.fail(task_id, &detail).await {
                error!(
                    task_id = %task_id,
                    error = %store_err,
                    "could not mark task failed after re-enqueue failure"
                );
            }
            return Err(ControlError::Enqueue(detail));
        }

        info!(
            task_id = %task_id,
            retry_count = reset.retry_count,
            "task reset and re-enqueued"
        );
        Ok(reset)
    }

    /// Best-effort cooperative cancellation.
    ///
    /// Marks the record `Stopped`. A worker that already claimed the task
    /// observes the marker at its next progress checkpoint and aborts without
    /// overwriting the terminal state; a task still `Pending` is skipped at
    /// claim time.
    pub async fn stop(&self, task_id: TaskId) -> Result<TaskRecord, ControlError> {
        let stopped = self.store.stop(task_id).await.map_err(|err| match err {
            TaskStoreError::Conflict { status, .. } => {
                ControlError::NotStoppable { task_id, status }
            }
            other => map_store_error(other),
        })?;

        info!(task_id = %task_id, "task stopped");
        Ok(stopped)
    }
}

fn map_store_error(err: TaskStoreError) -> ControlError {
    match err {
        TaskStoreError::NotFound(id) => ControlError::NotFound(id),
        other => ControlError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use loreforge_core::{JobType, WorkerId};
    use loreforge_queue::InMemoryJobQueue;
    use loreforge_store::InMemoryTaskStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        queue: Arc<InMemoryJobQueue>,
        control: TaskControl<Arc<InMemoryTaskStore>, Arc<InMemoryJobQueue>>,
    }

    fn fixture(config: ControlConfig) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let control = TaskControl::with_config(store.clone(), queue.clone(), config);
        Fixture {
            store,
            queue,
            control,
        }
    }

    async fn failed_task(store: &Arc<InMemoryTaskStore>) -> TaskRecord {
        let record = TaskRecord::new(
            JobType::EpisodeIngest,
            json!({"episode": "e-1"}),
            None,
        );
        store.insert(&record).await.unwrap();
        store.claim(record.id, &WorkerId::new("w-1")).await.unwrap();
        store.fail(record.id, "boom").await.unwrap();
        record
    }

    #[tokio::test]
    async fn retry_resets_record_and_reenqueues() {
        let fx = fixture(ControlConfig::default());
        let record = failed_task(&fx.store).await;

        let reset = fx.control.retry(record.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert_eq!(reset.progress, 0);
        assert_eq!(reset.error, None);
        assert_eq!(reset.result, None);
        assert_eq!(reset.retry_count, 1);

        // A fresh message with the persisted parameters is on the queue.
        let delivery = fx
            .queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.task_id, record.id);
        assert_eq!(delivery.message.parameters, json!({"episode": "e-1"}));
    }

    #[tokio::test]
    async fn retry_from_stopped_is_policy_gated() {
        let fx = fixture(ControlConfig::default());
        let record = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&record).await.unwrap();
        fx.store.stop(record.id).await.unwrap();

        // Default policy: stopped tasks are not retryable.
        let err = fx.control.retry(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::NotRetryable {
                status: TaskStatus::Stopped,
                ..
            }
        ));

        // Opt-in policy allows it.
        let fx = fixture(ControlConfig {
            retry_from_stopped: true,
        });
        let record = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&record).await.unwrap();
        fx.store.stop(record.id).await.unwrap();

        let reset = fx.control.retry(record.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert_eq!(reset.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_rejects_non_terminal_and_completed_tasks() {
        let fx = fixture(ControlConfig::default());

        let pending = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&pending).await.unwrap();
        assert!(matches!(
            fx.control.retry(pending.id).await,
            Err(ControlError::NotRetryable {
                status: TaskStatus::Pending,
                ..
            })
        ));

        let done = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&done).await.unwrap();
        fx.store.claim(done.id, &WorkerId::new("w-1")).await.unwrap();
        fx.store.complete(done.id, json!({})).await.unwrap();
        assert!(matches!(
            fx.control.retry(done.id).await,
            Err(ControlError::NotRetryable {
                status: TaskStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn retry_unknown_task_is_not_found() {
        let fx = fixture(ControlConfig::default());
        assert!(matches!(
            fx.control.retry(TaskId::new()).await,
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_pending_and_processing_tasks() {
        let fx = fixture(ControlConfig::default());

        let pending = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&pending).await.unwrap();
        let stopped = fx.control.stop(pending.id).await.unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);

        let processing = TaskRecord::new(JobType::EpisodeIngest, json!({}), None);
        fx.store.insert(&processing).await.unwrap();
        fx.store
            .claim(processing.id, &WorkerId::new("w-1"))
            .await
            .unwrap();
        let stopped = fx.control.stop(processing.id).await.unwrap();
        assert_eq!(stopped.status, TaskStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_terminal_task_is_rejected() {
        let fx = fixture(ControlConfig::default());
        let record = failed_task(&fx.store).await;

        assert!(matches!(
            fx.control.stop(record.id).await,
            Err(ControlError::NotStoppable {
                status: TaskStatus::Failed,
                ..
            })
        ));
    }
}
