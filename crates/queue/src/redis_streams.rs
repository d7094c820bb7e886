//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: Messages persist until acknowledged
//! - **At-least-once**: Unacknowledged messages are reclaimed and redelivered
//! - **Consumer groups**: All workers share one group; each message is
//!   delivered to exactly one live consumer (load balancing)
//! - **FIFO**: Stream entries keep publish order
//!
//! ## Architecture
//!
//! - **Stream Key**: `loreforge:jobs` (single stream for all job types)
//! - **Consumer Group**: `loreforge-workers`
//! - **Consumers**: Named consumers within the group (e.g. `ingest-worker-2`)
//! - **Redelivery**: Entries pending longer than the idle timeout are claimed
//!   away from their (presumed dead) consumer on the next dequeue

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::message::{Delivery, JobMessage};
use crate::queue::{JobQueue, QueueError};

/// Default stream key for job messages.
const DEFAULT_STREAM_KEY: &str = "loreforge:jobs";

/// Default consumer group shared by the worker pool.
const DEFAULT_GROUP: &str = "loreforge-workers";

/// Entries pending longer than this are considered abandoned and reclaimed.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

/// How many stale entries to inspect per reclaim pass.
const RECLAIM_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct RedisStreamsJobQueue {
    client: Arc<redis::Client>,
    stream_key: String,
    group: String,
    consumer: String,
    pending_timeout_ms: u64,
}

impl RedisStreamsJobQueue {
    /// Create a new Redis Streams job queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g. "redis://localhost:6379")
    /// * `stream_key` - Stream key (default: "loreforge:jobs")
    /// * `group` - Consumer group name (default: "loreforge-workers")
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        group: Option<String>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            group: group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            consumer: format!("consumer-{}", Uuid::now_v7()),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    /// Use a stable consumer name (e.g. the worker pool name) instead of the
    /// generated one, so pending entries survive a process restart under the
    /// same identity.
    pub fn with_consumer_name(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists (idempotent).
    ///
    /// XGROUP CREATE with MKSTREAM creates the stream if it doesn't exist.
    /// If the group already exists the command errors, which we ignore.
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;

        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        Ok(())
    }

    /// Reclaim one entry whose consumer went quiet past the idle timeout.
    ///
    /// XPENDING (with IDLE) lists stale entries across all consumers in the
    /// group; XCLAIM JUSTID moves them to this consumer, after which the
    /// payload is re-read with XRANGE. Returns the first reclaimed delivery.
    async fn claim_stale(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<Delivery>, QueueError> {
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.pending_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(conn)
            .await
            .unwrap_or_default();

        if pending.is_empty() {
            return Ok(None);
        }

        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();

        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.pending_timeout_ms)
            .arg(&ids[..])
            .arg("JUSTID")
            .query_async(conn)
            .await
            .unwrap_or_default();

        for id in claimed {
            let range: StreamRangeReply = conn
                .xrange(&self.stream_key, &id, &id)
                .await
                .map_err(|e| QueueError::Command(format!("XRANGE failed: {}", e)))?;

            if let Some(entry) = range.ids.into_iter().next() {
                match self.parse_entry(&entry.id, entry.get::<String>("payload")) {
                    Ok(delivery) => return Ok(Some(delivery)),
                    Err(err) => {
                        // Poison entry: ack it away rather than reclaiming it forever.
                        warn!(entry_id = %entry.id, error = %err, "dropping undecodable stream entry");
                        let _: Result<u64, _> = conn.xack(&self.stream_key, &self.group, &[&entry.id]).await;
                    }
                }
            }
        }

        Ok(None)
    }

    fn parse_entry(
        &self,
        entry_id: &str,
        payload: Option<String>,
    ) -> Result<Delivery, QueueError> {
        let payload = payload.ok_or_else(|| {
            QueueError::Deserialization(format!("entry {} has no payload field", entry_id))
        })?;

        let message: JobMessage = serde_json::from_str(&payload)
            .map_err(|e| QueueError::Deserialization(e.to_string()))?;

        Ok(Delivery {
            message,
            receipt: Some(entry_id.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl JobQueue for RedisStreamsJobQueue {
    /// Publish a job message (non-blocking).
    ///
    /// Uses XADD with an auto-generated ID; `task_id`/`job_type` are stored as
    /// separate fields for inspection with redis-cli, `payload` carries the
    /// full message JSON.
    #[instrument(
        skip(self, message),
        fields(
            stream_key = %self.stream_key,
            task_id = %message.task_id,
            job_type = %message.job_type
        ),
        err
    )]
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;

        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("task_id", message.task_id.to_string()),
                    ("job_type", message.job_type.to_string()),
                    ("payload", payload),
                ],
            )
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {}", e)))?;

        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;

        // Stale deliveries from dead consumers first, then new entries.
        if let Some(delivery) = self.claim_stale(&mut conn).await? {
            return Ok(Some(delivery));
        }

        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(timeout.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {}", e)))?;

        for key in reply.keys {
            for entry in key.ids {
                match self.parse_entry(&entry.id, entry.get::<String>("payload")) {
                    Ok(delivery) => return Ok(Some(delivery)),
                    Err(err) => {
                        warn!(entry_id = %entry.id, error = %err, "dropping undecodable stream entry");
                        let _: Result<u64, _> = conn.xack(&self.stream_key, &self.group, &[&entry.id]).await;
                    }
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let Some(receipt) = delivery.receipt.as_deref() else {
            return Ok(());
        };

        let mut conn = self.connection().await?;

        let _: u64 = conn
            .xack(&self.stream_key, &self.group, &[receipt])
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {}", e)))?;

        Ok(())
    }
}
