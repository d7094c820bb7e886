//! In-memory work queue for tests/dev.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::message::{Delivery, JobMessage};
use crate::queue::{JobQueue, QueueError};

/// In-memory FIFO queue backed by a tokio channel.
///
/// - No IO / no broker
/// - Competing consumers (each message dequeued once)
/// - No redelivery: acks are no-ops, so this is effectively at-most-once.
///   Fine for dev/test; production uses the Redis Streams queue.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    tx: mpsc::UnboundedSender<JobMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<JobMessage>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.tx
            .send(message.clone())
            .map_err(|_| QueueError::Closed)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        // One consumer holds the receiver at a time; FIFO order is preserved
        // because the channel itself is the only buffer.
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(message)) => Ok(Some(Delivery::unreceipted(message))),
            Ok(None) => Err(QueueError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_core::{JobType, TaskId};
    use serde_json::json;

    fn msg(n: u32) -> JobMessage {
        JobMessage::new(TaskId::new(), JobType::EpisodeIngest, json!({ "n": n }))
    }

    #[tokio::test]
    async fn publish_then_dequeue_is_fifo() {
        let queue = InMemoryJobQueue::new();
        let first = msg(1);
        let second = msg(2);
        queue.publish(&first).await.unwrap();
        queue.publish(&second).await.unwrap();

        let a = queue.dequeue(Duration::from_millis(100)).await.unwrap().unwrap();
        let b = queue.dequeue(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(a.message, first);
        assert_eq!(b.message, second);
        assert!(a.receipt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = InMemoryJobQueue::new();
        let got = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn each_message_goes_to_one_consumer() {
        let queue = std::sync::Arc::new(InMemoryJobQueue::new());
        queue.publish(&msg(1)).await.unwrap();

        let a = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        let b = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(a.is_some() != b.is_some());
    }
}
