//! Job submission: insert the record, then publish the message.

use thiserror::Error;
use tracing::{debug, error};

use loreforge_core::{JobType, RelatedEntity, TaskId, TaskRecord};
use loreforge_queue::{JobMessage, JobQueue};
use loreforge_store::{TaskStore, TaskStoreError};

/// Submission error.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("task store error: {0}")]
    Store(#[from] TaskStoreError),

    /// Publish failed after the record was inserted; the record has been
    /// transitioned to `Failed` rather than left orphaned in `Pending`.
    #[error("enqueue failed: {0}")]
    Enqueue(String),
}

/// Fire-and-forget job submission.
///
/// The caller gets the `task_id` back immediately and follows progress via a
/// bridge stream; no worker is awaited here.
#[derive(Debug, Clone)]
pub struct JobSubmitter<S, Q> {
    store: S,
    queue: Q,
}

impl<S, Q> JobSubmitter<S, Q>
where
    S: TaskStore,
    Q: JobQueue,
{
    pub fn new(store: S, queue: Q) -> Self {
        Self { store, queue }
    }

    /// Create a `Pending` task record and enqueue the matching job message.
    ///
    /// Ordering guarantee: the store insert commits before the message is
    /// published, so a worker can never dequeue a job with no backing record.
    pub async fn submit(
        &self,
        job_type: JobType,
        parameters: serde_json::Value,
        related_entity: Option<RelatedEntity>,
    ) -> Result<TaskId, SubmitError> {
        let record = TaskRecord::new(job_type.clone(), parameters.clone(), related_entity);
        let task_id = record.id;

        self.store.insert(&record).await?;

        let message = JobMessage::new(task_id, job_type, parameters);
        if let Err(err) = self.queue.publish(&message).await {
            let detail = format!("enqueue failed: {err}");
            if let Err(store_err) = self.store.fail(task_id, &detail).await {
                error!(
                    task_id = %task_id,
                    error = %store_err,
                    "could not mark task failed after enqueue failure"
                );
            }
            return Err(SubmitError::Enqueue(detail));
        }

        debug!(task_id = %task_id, job_type = %message.job_type, "job submitted");
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use loreforge_core::{EntityId, TaskStatus};
    use loreforge_queue::{Delivery, InMemoryJobQueue, QueueError};
    use loreforge_store::InMemoryTaskStore;
    use serde_json::json;

    #[tokio::test]
    async fn submit_inserts_pending_record_then_publishes() {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let submitter = JobSubmitter::new(store.clone(), queue.clone());

        let entity = RelatedEntity::new(EntityId::new(), "project");
        let task_id = submitter
            .submit(
                JobType::EpisodeIngest,
                json!({"episode": "e-1"}),
                Some(entity.clone()),
            )
            .await
            .unwrap();

        let record = store.get(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(record.related_entity, Some(entity));

        let delivery = queue
            .dequeue(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.task_id, task_id);
        assert_eq!(delivery.message.job_type, JobType::EpisodeIngest);
        assert_eq!(delivery.message.parameters, json!({"episode": "e-1"}));
    }

    struct BrokenQueue;

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn publish(&self, _message: &JobMessage) -> Result<(), QueueError> {
            Err(QueueError::Connection("broker down".into()))
        }

        async fn dequeue(&self, _timeout: Duration) -> Result<Option<Delivery>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_failure_marks_record_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let submitter = JobSubmitter::new(store.clone(), BrokenQueue);

        let err = submitter
            .submit(JobType::EpisodeIngest, json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Enqueue(_)));

        // The record exists and is Failed, not orphaned Pending.
        let records = store.list_by_status(Some(TaskStatus::Failed), 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].error.as_deref().unwrap().contains("broker down"));
    }
}
