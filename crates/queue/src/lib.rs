//! `loreforge-queue` — durable work-queue transport.
//!
//! Carries `{task_id, job_type, parameters}` messages from the submitter to
//! the worker pool. In-memory channel transport for dev/test; Redis Streams
//! (feature `redis`) for production.

pub mod in_memory;
pub mod message;
pub mod queue;

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryJobQueue;
pub use message::{Delivery, JobMessage};
pub use queue::{JobQueue, QueueError};

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsJobQueue;
