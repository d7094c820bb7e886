//! The persisted task record: the single source of truth for job status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};
use crate::id::{EntityId, TaskId, WorkerId};
use crate::job_type::JobType;
use crate::status::TaskStatus;

/// The resource a task acts on, for filtering tasks by entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_id: EntityId,
    pub entity_type: String,
}

impl RelatedEntity {
    pub fn new(entity_id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
        }
    }
}

/// One submitted job and everything ever observed about it.
///
/// Ownership discipline: the submitter writes the record once at creation,
/// exactly one worker writes it while claimed, and control operations write it
/// gated on the current status. Progress bridges only read. All transition
/// methods here enforce the state machine; storage backends call them (or
/// replicate their guards in SQL) so an illegal write can never reach the
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_type: JobType,
    /// Opaque job parameters, persisted so `retry` can re-enqueue a complete
    /// message from the record alone.
    pub parameters: serde_json::Value,
    pub status: TaskStatus,
    /// 0-100, monotonically non-decreasing while `Processing`.
    pub progress: u8,
    /// Latest stage description from the worker.
    pub message: Option<String>,
    /// Set only on `Completed`.
    pub result: Option<serde_json::Value>,
    /// Set only on `Failed`.
    pub error: Option<String>,
    /// The worker that claimed this task, while claimed.
    pub worker_id: Option<WorkerId>,
    /// Number of explicit `retry` control operations applied.
    pub retry_count: u32,
    pub related_entity: Option<RelatedEntity>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a fresh `Pending` record at progress 0.
    pub fn new(
        job_type: JobType,
        parameters: serde_json::Value,
        related_entity: Option<RelatedEntity>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            job_type,
            parameters,
            status: TaskStatus::Pending,
            progress: 0,
            message: None,
            result: None,
            error: None,
            worker_id: None,
            retry_count: 0,
            related_entity,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn guard(&self, next: TaskStatus) -> TaskResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::invalid_transition(self.status, next))
        }
    }

    /// Worker claim: `Pending -> Processing`, recording the owner.
    pub fn mark_claimed(&mut self, worker_id: WorkerId) -> TaskResult<()> {
        self.guard(TaskStatus::Processing)?;
        self.status = TaskStatus::Processing;
        self.worker_id = Some(worker_id);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Progress checkpoint write from the owning worker.
    ///
    /// Only legal while `Processing`. Writes are monotonic by construction:
    /// a value below the current progress is clamped to the current value
    /// rather than rewinding the record. Returns the effective progress.
    pub fn record_progress(&mut self, progress: u8, message: &str) -> TaskResult<u8> {
        if progress > 100 {
            return Err(TaskError::ProgressOutOfRange(progress));
        }
        if self.status != TaskStatus::Processing {
            return Err(TaskError::NotProcessing(self.status));
        }
        self.progress = self.progress.max(progress);
        self.message = Some(message.to_string());
        Ok(self.progress)
    }

    /// Successful completion: `Processing -> Completed` with the result payload.
    pub fn mark_completed(&mut self, result: serde_json::Value) -> TaskResult<()> {
        self.guard(TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Domain (or enqueue) failure: `Pending|Processing -> Failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> TaskResult<()> {
        self.guard(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Cooperative cancellation: `Pending|Processing -> Stopped`.
    pub fn mark_stopped(&mut self) -> TaskResult<()> {
        self.guard(TaskStatus::Stopped)?;
        self.status = TaskStatus::Stopped;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Explicit retry: back to a fresh `Pending` attempt.
    ///
    /// Resets progress/result/error/ownership and increments `retry_count`.
    /// Allowed from `Failed` and `Stopped` at the state-machine level; whether
    /// `Stopped` tasks may actually be retried is control-operation policy.
    pub fn reset_for_retry(&mut self) -> TaskResult<()> {
        if !matches!(self.status, TaskStatus::Failed | TaskStatus::Stopped) {
            return Err(TaskError::NotRetryable(self.status));
        }
        self.guard(TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.progress = 0;
        self.message = None;
        self.result = None;
        self.error = None;
        self.worker_id = None;
        self.started_at = None;
        self.completed_at = None;
        self.retry_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::new(JobType::EpisodeIngest, json!({"episode": "e-1"}), None)
    }

    #[test]
    fn new_record_is_pending_at_zero() {
        let task = record();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.retry_count, 0);
        assert!(task.worker_id.is_none());
        assert!(task.started_at.is_none());
    }

    #[test]
    fn claim_records_owner_and_start() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.worker_id.as_ref().unwrap().as_str(), "w-1");
        assert!(task.started_at.is_some());
    }

    #[test]
    fn progress_is_monotonic() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();

        assert_eq!(task.record_progress(30, "extracting").unwrap(), 30);
        // A lower write clamps instead of rewinding.
        assert_eq!(task.record_progress(10, "late write").unwrap(), 30);
        assert_eq!(task.progress, 30);
        assert_eq!(task.record_progress(75, "persisting").unwrap(), 75);
    }

    #[test]
    fn progress_rejected_outside_processing() {
        let mut task = record();
        assert!(task.record_progress(10, "too early").is_err());

        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        task.mark_completed(json!({"count": 4})).unwrap();
        assert!(task.record_progress(99, "too late").is_err());
    }

    #[test]
    fn progress_over_100_is_rejected() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        assert_eq!(
            task.record_progress(101, "overflow"),
            Err(TaskError::ProgressOutOfRange(101))
        );
    }

    #[test]
    fn completion_pins_progress_and_result() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        task.record_progress(50, "extracting").unwrap();
        task.mark_completed(json!({"count": 4})).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.result, Some(json!({"count": 4})));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        task.mark_completed(json!({})).unwrap();

        assert!(task.mark_failed("late failure").is_err());
        assert!(task.mark_stopped().is_err());
        assert!(task.mark_claimed(WorkerId::new("w-2")).is_err());
        assert_eq!(task.reset_for_retry(), Err(TaskError::NotRetryable(TaskStatus::Completed)));
    }

    #[test]
    fn stop_from_pending_and_processing() {
        let mut pending = record();
        pending.mark_stopped().unwrap();
        assert_eq!(pending.status, TaskStatus::Stopped);

        let mut processing = record();
        processing.mark_claimed(WorkerId::new("w-1")).unwrap();
        processing.mark_stopped().unwrap();
        assert_eq!(processing.status, TaskStatus::Stopped);
    }

    #[test]
    fn retry_resets_state() {
        let mut task = record();
        task.mark_claimed(WorkerId::new("w-1")).unwrap();
        task.record_progress(40, "extracting").unwrap();
        task.mark_failed("boom").unwrap();

        task.reset_for_retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.error, None);
        assert_eq!(task.result, None);
        assert_eq!(task.retry_count, 1);
        assert!(task.worker_id.is_none());
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        // Parameters survive so the job can be re-enqueued.
        assert_eq!(task.parameters, json!({"episode": "e-1"}));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// For any sequence of checkpoint writes, observed progress never
            /// decreases while the task is processing.
            #[test]
            fn progress_never_decreases(writes in proptest::collection::vec(0u8..=100, 1..32)) {
                let mut task = record();
                task.mark_claimed(WorkerId::new("w-prop")).unwrap();

                let mut last = 0u8;
                for value in writes {
                    let effective = task.record_progress(value, "checkpoint").unwrap();
                    prop_assert!(effective >= last);
                    last = effective;
                }
            }
        }
    }
}
