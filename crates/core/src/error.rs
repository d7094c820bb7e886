//! Task domain error model.

use thiserror::Error;

use crate::status::TaskStatus;

/// Result type used across the task domain layer.
pub type TaskResult<T> = Result<T, TaskError>;

/// Domain-level task error.
///
/// Keep this focused on deterministic state-machine failures (illegal
/// transitions, bad input). Infrastructure concerns belong to the store and
/// queue layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The requested status transition is not allowed by the state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// Progress must stay within 0-100.
    #[error("progress out of range: {0} (expected 0-100)")]
    ProgressOutOfRange(u8),

    /// Progress/message writes are only legal while the task is processing.
    #[error("progress writes require processing status, task is {0}")]
    NotProcessing(TaskStatus),

    /// `retry` is only allowed from a retryable terminal status.
    #[error("task is not retryable from status {0}")]
    NotRetryable(TaskStatus),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status string did not name a known status.
    #[error("unknown task status: {0}")]
    UnknownStatus(String),
}

impl TaskError {
    pub fn invalid_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
