//! Worker pool: dequeue, claim, execute, finalize.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use loreforge_core::WorkerId;
use loreforge_queue::{Delivery, JobQueue, QueueError};
use loreforge_store::{ClaimOutcome, TaskStore, TaskStoreError};

use crate::handler::{HandlerError, HandlerRegistry, JobContext, JobHandler};
use crate::retry::with_store_retries;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of independent worker tasks.
    pub workers: usize,
    /// How long each dequeue blocks before re-checking for shutdown.
    pub dequeue_timeout: Duration,
    /// Pool name; workers are named `{name}-{index}`.
    pub name: String,
    /// Bounded retries for transient store failures on worker writes.
    pub write_attempts: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dequeue_timeout: Duration::from_millis(1000),
            name: "worker".to_string(),
            write_attempts: 3,
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown and wait for all workers to stop.
    ///
    /// Workers finish the job they are executing; only the dequeue loop is
    /// interrupted.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for join in self.joins.drain(..) {
            let _ = join.await;
        }
    }

    /// Current pool statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    /// Runs aborted at a checkpoint because the task was stopped (or
    /// ownership was lost to a control operation).
    pub jobs_stopped: u64,
    /// Deliveries skipped at claim time (stop-before-claim, redelivery of a
    /// finished task).
    pub jobs_skipped: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// How one delivery ended, for stats and acking.
enum JobOutcome {
    Succeeded,
    Failed,
    Stopped,
    Skipped,
    /// Leave the delivery unacknowledged so the broker redelivers it
    /// (store unreachable before the claim could even be read).
    Abandoned,
}

/// Pool of independent workers over a shared queue and task store.
///
/// Each worker loops `dequeue -> claim -> execute -> finalize -> ack`. Workers
/// never coordinate with each other; the claim transition in the task store is
/// the only arbiter of ownership.
pub struct WorkerPool<S, Q> {
    store: S,
    queue: Q,
    registry: HandlerRegistry,
}

impl<S, Q> WorkerPool<S, Q>
where
    S: TaskStore + Clone + 'static,
    Q: JobQueue + Clone + 'static,
{
    pub fn new(store: S, queue: Q) -> Self {
        Self {
            store,
            queue,
            registry: HandlerRegistry::new(),
        }
    }

    /// Register a handler for a job type name (or `"*"` as a catch-all).
    pub fn register_handler(
        &mut self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) {
        self.registry.register(job_type, handler);
    }

    /// Spawn the configured number of worker tasks.
    pub fn spawn(self, config: WorkerPoolConfig) -> WorkerPoolHandle {
        if self.registry.is_empty() {
            warn!(pool = %config.name, "worker pool spawned with no registered handlers");
        }

        let registry = Arc::new(self.registry);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let joins = (0..config.workers)
            .map(|index| {
                let worker_id = WorkerId::new(format!("{}-{}", config.name, index));
                tokio::spawn(worker_loop(
                    self.store.clone(),
                    self.queue.clone(),
                    registry.clone(),
                    worker_id,
                    config.clone(),
                    shutdown_rx.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        WorkerPoolHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
        }
    }
}

async fn worker_loop<S, Q>(
    store: S,
    queue: Q,
    registry: Arc<HandlerRegistry>,
    worker_id: WorkerId,
    config: WorkerPoolConfig,
    shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) where
    S: TaskStore + Clone + 'static,
    Q: JobQueue,
{
    info!(worker = %worker_id, "worker started");
    let start_time = Instant::now();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        {
            let mut s = stats.lock().expect("stats lock poisoned");
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match queue.dequeue(config.dequeue_timeout).await {
            Ok(Some(delivery)) => {
                {
                    let mut s = stats.lock().expect("stats lock poisoned");
                    s.current_running += 1;
                }

                let outcome =
                    process_delivery(&store, &registry, &worker_id, &config, &delivery).await;

                if !matches!(outcome, JobOutcome::Abandoned) {
                    if let Err(err) = queue.ack(&delivery).await {
                        warn!(worker = %worker_id, error = %err, "failed to ack delivery");
                    }
                }

                let mut s = stats.lock().expect("stats lock poisoned");
                s.current_running = s.current_running.saturating_sub(1);
                s.jobs_processed += 1;
                match outcome {
                    JobOutcome::Succeeded => s.jobs_succeeded += 1,
                    JobOutcome::Failed => s.jobs_failed += 1,
                    JobOutcome::Stopped => s.jobs_stopped += 1,
                    JobOutcome::Skipped | JobOutcome::Abandoned => s.jobs_skipped += 1,
                }
            }
            Ok(None) => continue,
            Err(QueueError::Closed) => break,
            Err(err) => {
                error!(worker = %worker_id, error = %err, "dequeue failed");
                tokio::time::sleep(config.dequeue_timeout).await;
            }
        }
    }

    info!(worker = %worker_id, "worker stopped");
}

async fn process_delivery<S>(
    store: &S,
    registry: &HandlerRegistry,
    worker_id: &WorkerId,
    config: &WorkerPoolConfig,
    delivery: &Delivery,
) -> JobOutcome
where
    S: TaskStore + Clone + 'static,
{
    let message = &delivery.message;
    let task_id = message.task_id;

    let claim = with_store_retries(config.write_attempts, || {
        store.claim(task_id, worker_id)
    })
    .await;

    let record = match claim {
        Ok(ClaimOutcome::Claimed(record)) => record,
        Ok(ClaimOutcome::Skipped(status)) => {
            // Stop landed between enqueue and dequeue, or this is an
            // at-least-once redelivery of a finished task. Idempotent no-op.
            debug!(worker = %worker_id, task_id = %task_id, status = %status, "skipping unclaimable task");
            return JobOutcome::Skipped;
        }
        Err(TaskStoreError::NotFound(_)) => {
            // Store-before-publish ordering makes this unexpected; drop the
            // message rather than redelivering it forever.
            warn!(worker = %worker_id, task_id = %task_id, "dequeued job has no backing record");
            return JobOutcome::Skipped;
        }
        Err(err) => {
            error!(worker = %worker_id, task_id = %task_id, error = %err, "claim failed");
            return JobOutcome::Abandoned;
        }
    };

    debug!(
        worker = %worker_id,
        task_id = %task_id,
        job_type = %message.job_type,
        retry_count = record.retry_count,
        "claimed job"
    );

    let ctx = JobContext::new(
        task_id,
        worker_id.clone(),
        Arc::new(store.clone()),
        config.write_attempts,
    );

    let run = match registry.get(&message.job_type) {
        Some(handler) => handler.run(message, &ctx).await,
        None => Err(HandlerError::failed(format!(
            "no handler registered for job type: {}",
            message.job_type
        ))),
    };

    match run {
        Ok(result) => finalize_success(store, config, task_id, result).await,
        Err(HandlerError::Stopped) => {
            debug!(worker = %worker_id, task_id = %task_id, "job aborted at stop checkpoint");
            JobOutcome::Stopped
        }
        Err(HandlerError::Failed(detail)) => {
            finalize_failure(store, config, task_id, &detail).await
        }
    }
}

async fn finalize_success<S: TaskStore>(
    store: &S,
    config: &WorkerPoolConfig,
    task_id: loreforge_core::TaskId,
    result: serde_json::Value,
) -> JobOutcome {
    let write = with_store_retries(config.write_attempts, || {
        store.complete(task_id, result.clone())
    })
    .await;

    match write {
        Ok(()) => {
            debug!(task_id = %task_id, "job completed");
            JobOutcome::Succeeded
        }
        Err(TaskStoreError::Conflict { status, .. }) => {
            // A stop won the race against completion; the terminal state stands.
            info!(task_id = %task_id, status = %status, "completion superseded by terminal state");
            JobOutcome::Stopped
        }
        Err(err) => {
            // Infrastructure failure, not a domain failure: the record stays
            // in its last known state rather than being marked failed.
            error!(task_id = %task_id, error = %err, "could not record completion");
            JobOutcome::Failed
        }
    }
}

async fn finalize_failure<S: TaskStore>(
    store: &S,
    config: &WorkerPoolConfig,
    task_id: loreforge_core::TaskId,
    detail: &str,
) -> JobOutcome {
    let write = with_store_retries(config.write_attempts, || store.fail(task_id, detail)).await;

    match write {
        Ok(()) => {
            warn!(task_id = %task_id, error = %detail, "job failed");
            JobOutcome::Failed
        }
        Err(TaskStoreError::Conflict { status, .. }) => {
            info!(task_id = %task_id, status = %status, "failure superseded by terminal state");
            JobOutcome::Stopped
        }
        Err(err) => {
            error!(task_id = %task_id, error = %err, "could not record failure");
            JobOutcome::Failed
        }
    }
}
