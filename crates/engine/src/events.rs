//! Events emitted by a progress bridge to its client stream.

use serde_json::{Value as JsonValue, json};

use loreforge_core::{TaskId, TaskRecord, TaskStatus};

/// One named event on the task stream.
///
/// The wire shape is `(name, JSON body)` — exactly what SSE wants. `progress`
/// carries live snapshots; `completed`/`failed` are terminal and emitted at
/// most once per stream, always last; `error` is a stream-level failure
/// (unknown task, store unreachable) and also closes the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStreamEvent {
    Progress {
        id: TaskId,
        status: TaskStatus,
        progress: u8,
        message: Option<String>,
    },
    Completed {
        id: TaskId,
        progress: u8,
        result: Option<JsonValue>,
    },
    Failed {
        id: TaskId,
        status: TaskStatus,
        error: String,
    },
    Error {
        error: String,
    },
}

impl TaskStreamEvent {
    /// Snapshot event for a live (or just-opened) record.
    pub fn progress(record: &TaskRecord) -> Self {
        Self::Progress {
            id: record.id,
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
        }
    }

    /// Terminal event for a record that finished successfully.
    pub fn completed(record: &TaskRecord) -> Self {
        Self::Completed {
            id: record.id,
            progress: record.progress,
            result: record.result.clone(),
        }
    }

    /// Terminal event for a `Failed` or `Stopped` record.
    pub fn failed(record: &TaskRecord) -> Self {
        let error = record.error.clone().unwrap_or_else(|| match record.status {
            TaskStatus::Stopped => "task stopped".to_string(),
            _ => "task failed".to_string(),
        });
        Self::Failed {
            id: record.id,
            status: record.status,
            error,
        }
    }

    /// Terminal event matching the record's terminal status.
    pub fn terminal(record: &TaskRecord) -> Self {
        match record.status {
            TaskStatus::Completed => Self::completed(record),
            _ => Self::failed(record),
        }
    }

    /// Stream-level failure (task not found, store gave up).
    pub fn stream_error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Error { .. } => "error",
        }
    }

    /// JSON body for the wire.
    pub fn body(&self) -> JsonValue {
        match self {
            Self::Progress {
                id,
                status,
                progress,
                message,
            } => json!({
                "id": id,
                "status": status,
                "progress": progress,
                "message": message,
            }),
            Self::Completed {
                id,
                progress,
                result,
            } => json!({
                "id": id,
                "status": TaskStatus::Completed,
                "progress": progress,
                "result": result,
            }),
            Self::Failed { id, status, error } => json!({
                "id": id,
                "status": status,
                "error": error,
            }),
            Self::Error { error } => json!({ "error": error }),
        }
    }

    /// Whether this event closes the stream.
    pub fn closes_stream(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}
