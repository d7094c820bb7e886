//! The wire message carried by the work queue.

use serde::{Deserialize, Serialize};

use loreforge_core::{JobType, TaskId};

/// One unit of work, as published by the submitter and consumed by workers.
///
/// The task record is always inserted before this message becomes visible
/// (store-write happens-before queue-publish), so a worker can rely on the
/// backing record existing when it dequeues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub task_id: TaskId,
    pub job_type: JobType,
    /// Opaque parameters, passed through to the job handler verbatim.
    pub parameters: serde_json::Value,
}

impl JobMessage {
    pub fn new(task_id: TaskId, job_type: JobType, parameters: serde_json::Value) -> Self {
        Self {
            task_id,
            job_type,
            parameters,
        }
    }
}

/// A dequeued message plus the transport receipt needed to acknowledge it.
///
/// In-memory delivery has no receipt; Redis Streams deliveries carry the
/// stream entry id for XACK.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: JobMessage,
    pub receipt: Option<String>,
}

impl Delivery {
    pub fn unreceipted(message: JobMessage) -> Self {
        Self {
            message,
            receipt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_core::JobType;
    use serde_json::json;

    #[test]
    fn message_json_shape() {
        let msg = JobMessage::new(
            TaskId::new(),
            JobType::EpisodeIngest,
            json!({"episode": "e-1"}),
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["job_type"], "episode_ingest");
        assert_eq!(value["parameters"]["episode"], "e-1");
        assert!(value["task_id"].is_string());

        let back: JobMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
