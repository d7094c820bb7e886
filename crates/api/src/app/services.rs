//! Service wiring: store + queue + worker pool + engine components.
//!
//! In-memory infrastructure by default (dev/test); Postgres + Redis Streams
//! when `USE_PERSISTENT_STORES=true` and the `redis` feature is enabled.

use std::sync::Arc;

use loreforge_engine::{
    ControlConfig, JobSubmitter, ProgressBridge, TaskControl, WorkerPool, WorkerPoolConfig,
    WorkerPoolHandle,
};
use loreforge_queue::{InMemoryJobQueue, JobQueue};
use loreforge_store::{InMemoryTaskStore, TaskStore};

#[cfg(feature = "redis")]
use loreforge_queue::RedisStreamsJobQueue;
#[cfg(feature = "redis")]
use loreforge_store::PostgresTaskStore;

use crate::app::jobs;

pub type SharedStore = Arc<dyn TaskStore>;
pub type SharedQueue = Arc<dyn JobQueue>;

/// Everything the route handlers need.
pub struct AppServices {
    pub store: SharedStore,
    pub submitter: JobSubmitter<SharedStore, SharedQueue>,
    pub control: TaskControl<SharedStore, SharedQueue>,
    pub bridge: ProgressBridge<SharedStore>,
}

pub async fn build_services() -> (AppServices, WorkerPoolHandle) {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services().await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
            return build_in_memory_services();
        }
    }

    build_in_memory_services()
}

fn build_in_memory_services() -> (AppServices, WorkerPoolHandle) {
    let store: SharedStore = Arc::new(InMemoryTaskStore::new());
    let queue: SharedQueue = Arc::new(InMemoryJobQueue::new());
    assemble(store, queue)
}

#[cfg(feature = "redis")]
async fn build_persistent_services() -> (AppServices, WorkerPoolHandle) {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres");

    let store = PostgresTaskStore::new(pool);
    store
        .ensure_schema()
        .await
        .expect("failed to ensure tasks schema");

    let queue = RedisStreamsJobQueue::new(&redis_url, None, None)
        .expect("failed to open redis job queue");
    queue
        .ensure_group()
        .await
        .expect("failed to ensure consumer group");

    assemble(Arc::new(store) as SharedStore, Arc::new(queue) as SharedQueue)
}

/// Wire engine components over the chosen infrastructure and spawn the
/// worker pool with the default job handlers registered.
pub fn assemble(store: SharedStore, queue: SharedQueue) -> (AppServices, WorkerPoolHandle) {
    let worker_count = std::env::var("WORKER_COUNT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(4);

    let retry_from_stopped = std::env::var("RETRY_FROM_STOPPED")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    let mut pool = WorkerPool::new(store.clone(), queue.clone());
    jobs::register_default_handlers(&mut pool);
    let pool_handle = pool.spawn(
        WorkerPoolConfig::default()
            .with_name("ingest-worker")
            .with_workers(worker_count),
    );

    let services = AppServices {
        submitter: JobSubmitter::new(store.clone(), queue.clone()),
        control: TaskControl::with_config(
            store.clone(),
            queue.clone(),
            ControlConfig { retry_from_stopped },
        ),
        bridge: ProgressBridge::new(store.clone()),
        store,
    };

    (services, pool_handle)
}
