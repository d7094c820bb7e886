//! Work-queue abstraction (transport mechanics only).
//!
//! The queue is the delivery channel between the submitter and the worker
//! pool. It makes minimal assumptions:
//!
//! - **At-least-once delivery**: a message may be delivered more than once
//!   (broker redelivery, consumer crash before ack). Workers gate execution on
//!   the task record's status, so redelivery of a finished task is a no-op.
//! - **FIFO per partition**: messages come out in publish order within one
//!   stream/channel.
//! - **No storage semantics**: the task store is the source of truth for job
//!   state; the queue only moves `{task_id, job_type, parameters}` around.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Delivery, JobMessage};

/// Queue transport error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("message serialization error: {0}")]
    Serialization(String),

    #[error("message deserialization error: {0}")]
    Deserialization(String),

    /// The queue was shut down; consumers should exit their loop.
    #[error("queue closed")]
    Closed,
}

/// Durable, ordered, at-least-once work queue.
///
/// Implementations must be safe to share across worker tasks (`Send + Sync`);
/// concurrent `dequeue` calls are competing consumers, each message going to
/// exactly one of them (modulo redelivery).
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a message to the queue.
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` on timeout so consumer loops can interleave
    /// shutdown checks, and `Err(QueueError::Closed)` once the queue is gone.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a processed delivery so it is not redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError> {
        (**self).publish(message).await
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        (**self).dequeue(timeout).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }
}
