//! The progress-callback contract between workers and domain operations.
//!
//! The engine treats the domain operation (entity extraction, embedding,
//! graph writes, ...) as an opaque, resumable unit of work behind the
//! [`JobHandler`] trait. Handlers report coarse, semantically meaningful
//! checkpoints through [`JobContext::report`] — not a tight loop — and every
//! checkpoint doubles as the cooperative cancellation point.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use loreforge_core::{JobType, TaskId, WorkerId};
use loreforge_queue::JobMessage;
use loreforge_store::{TaskStore, TaskStoreError};

use crate::retry::with_store_retries;

/// Why a handler run ended without a result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Domain operation failure; the task becomes `Failed` with this detail.
    #[error("{0}")]
    Failed(String),

    /// The task was finished out from under the handler (stop control
    /// operation, lost ownership). Abort cleanly, write nothing further.
    #[error("task stopped")]
    Stopped,
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// Per-run context handed to a handler: identity plus the progress callback.
pub struct JobContext {
    task_id: TaskId,
    worker_id: WorkerId,
    store: Arc<dyn TaskStore>,
    write_attempts: u32,
}

impl JobContext {
    pub fn new(
        task_id: TaskId,
        worker_id: WorkerId,
        store: Arc<dyn TaskStore>,
        write_attempts: u32,
    ) -> Self {
        Self {
            task_id,
            worker_id,
            store,
            write_attempts,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Report a progress checkpoint.
    ///
    /// Writes `(progress, message)` to the task record (monotonic: the store
    /// clamps against the current value). Returns `Err(HandlerError::Stopped)`
    /// when the record has reached a terminal state — the handler must abort
    /// and not overwrite it. Transient write failures are retried up to the
    /// configured bound and then logged; the run continues with the record in
    /// its last known state rather than failing the whole job over an
    /// infrastructure blip.
    pub async fn report(&self, progress: u8, message: &str) -> Result<(), HandlerError> {
        let write = with_store_retries(self.write_attempts, || {
            self.store
                .record_progress(self.task_id, &self.worker_id, progress, message)
        })
        .await;

        match write {
            Ok(status) if status.is_terminal() => Err(HandlerError::Stopped),
            Ok(_) => Ok(()),
            Err(err) if err.is_transient() => {
                warn!(
                    task_id = %self.task_id,
                    progress,
                    error = %err,
                    "progress write failed after retries; continuing"
                );
                Ok(())
            }
            Err(TaskStoreError::Domain(err)) => {
                // Handler bug (e.g. progress out of range); fail the run with
                // a diagnosable error instead of aborting silently.
                Err(HandlerError::failed(err.to_string()))
            }
            Err(err) => {
                // Conflict or not-found: this worker no longer owns the
                // record. Abort without finalizing.
                warn!(
                    task_id = %self.task_id,
                    error = %err,
                    "lost task ownership at progress checkpoint"
                );
                Err(HandlerError::Stopped)
            }
        }
    }
}

/// An opaque, resumable domain operation.
///
/// The returned value becomes the task's `result` payload on completion.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(
        &self,
        job: &JobMessage,
        ctx: &JobContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Routes job types to handlers.
///
/// Lookup is exact job-type name first, then the `"*"` wildcard if one was
/// registered. A message with no matching handler fails the task with a
/// descriptive error at execution time.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type name (or `"*"` as a catch-all).
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .get(job_type.as_str())
            .or_else(|| self.handlers.get("*"))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
