//! Progress bridge: polled task state turned into a push-style event stream.
//!
//! One bridge loop runs per open client stream. The loop re-reads the task
//! record at a fixed interval with a **fresh** store read per tick and emits
//! an event only when `(status, progress)` moved forward, terminating exactly
//! once with `completed`, `failed` or `error`. Bridges never write; any
//! number of them can watch the same task independently.
//!
//! ## Freshness
//!
//! Each tick calls `TaskStore::get`, which acquires and releases its read
//! path inside the call. Nothing — connection, session, memoized row — is
//! held across the sleep between ticks. Reusing a long-lived read handle here
//! is exactly the defect class that makes a stream report `processing, 30%`
//! forever while the row has long been `completed`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use loreforge_core::{TaskId, TaskRecord};
use loreforge_store::{TaskStore, TaskStoreError};

use crate::events::TaskStreamEvent;
use crate::retry::with_store_retries;

/// Bridge tuning knobs.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interval between fresh reads while the task is live.
    pub poll_interval: Duration,
    /// Transient read failures tolerated per tick before giving up with an
    /// `error` event.
    pub max_read_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_read_attempts: 3,
        }
    }
}

/// Polling-to-push adapter over the task store.
#[derive(Debug, Clone)]
pub struct ProgressBridge<S> {
    store: S,
    config: BridgeConfig,
}

impl<S> ProgressBridge<S>
where
    S: TaskStore + Clone + 'static,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, BridgeConfig::default())
    }

    pub fn with_config(store: S, config: BridgeConfig) -> Self {
        Self { store, config }
    }

    /// Open a stream of events for one task.
    ///
    /// The backing loop runs until it emits a terminal event or the returned
    /// stream is dropped (client disconnect); dropping cancels only this
    /// bridge's polling, never the task or other bridges.
    pub fn stream(&self, task_id: TaskId) -> UnboundedReceiverStream<TaskStreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.store.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            poll_loop(store, config, task_id, tx).await;
        });

        UnboundedReceiverStream::new(rx)
    }
}

async fn poll_loop<S: TaskStore>(
    store: S,
    config: BridgeConfig,
    task_id: TaskId,
    tx: mpsc::UnboundedSender<TaskStreamEvent>,
) {
    // Open: one fetch, then always at least one event.
    let record = match fetch_fresh(&store, task_id, config.max_read_attempts).await {
        Ok(record) => record,
        Err(event) => {
            let _ = tx.send(event);
            return;
        }
    };

    if tx.send(TaskStreamEvent::progress(&record)).is_err() {
        return;
    }

    if record.status.is_terminal() {
        // Already finished at open: still close with a terminal event so the
        // client never has to guess from a bare progress snapshot.
        let _ = tx.send(TaskStreamEvent::terminal(&record));
        return;
    }

    let mut last = (record.status, record.progress);

    loop {
        tokio::time::sleep(config.poll_interval).await;

        if tx.is_closed() {
            debug!(task_id = %task_id, "stream client disconnected, closing bridge");
            return;
        }

        let record = match fetch_fresh(&store, task_id, config.max_read_attempts).await {
            Ok(record) => record,
            Err(event) => {
                let _ = tx.send(event);
                return;
            }
        };

        if record.status.is_terminal() {
            let _ = tx.send(TaskStreamEvent::terminal(&record));
            return;
        }

        let current = (record.status, record.progress);
        if current != last {
            if tx.send(TaskStreamEvent::progress(&record)).is_err() {
                return;
            }
            last = current;
        }
        // Unchanged tick: no event, no-op.
    }
}

/// One fresh read with bounded transient retries; failures become the
/// stream-closing `error` event.
async fn fetch_fresh<S: TaskStore>(
    store: &S,
    task_id: TaskId,
    attempts: u32,
) -> Result<TaskRecord, TaskStreamEvent> {
    match with_store_retries(attempts, || store.get(task_id)).await {
        Ok(record) => Ok(record),
        Err(TaskStoreError::NotFound(_)) => {
            Err(TaskStreamEvent::stream_error(format!("task not found: {task_id}")))
        }
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "bridge read failed, closing stream");
            Err(TaskStreamEvent::stream_error(format!(
                "task state unavailable: {err}"
            )))
        }
    }
}
