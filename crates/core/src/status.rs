//! Task lifecycle status and the transitions the state machine admits.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Lifecycle status of a task record.
///
/// `Completed`, `Failed` and `Stopped` are terminal: no further writes occur
/// without an explicit `retry`, which is the only edge out of a terminal
/// status (back to `Pending`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record created, waiting for a worker to claim it.
    Pending,
    /// Claimed by exactly one worker; progress writes happen here.
    Processing,
    /// Domain operation finished; `result` is set.
    Completed,
    /// Domain operation (or enqueue) failed; `error` is set.
    Failed,
    /// Cooperatively cancelled via the `stop` control operation.
    Stopped,
}

impl TaskStatus {
    /// Terminal statuses admit no further writes except `retry`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// `progress`/`message` carry live meaning only in these statuses.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether the state machine admits `self -> next`.
    ///
    /// `Pending -> Failed` covers the submitter's enqueue-failure path;
    /// `Failed/Stopped -> Pending` is the retry edge (whether `Stopped` is
    /// actually retryable is a control-level policy, not a state-machine rule).
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Stopped)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Stopped)
                | (Failed, Pending)
                | (Stopped, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(TaskError::UnknownStatus(other.to_string())),
        }
    }
}
