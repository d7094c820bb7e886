//! Application wiring: services, routes, and the axum router.

pub mod dto;
pub mod errors;
pub mod jobs;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Extension;
use axum::Router;
use tower::ServiceBuilder;

use loreforge_engine::WorkerPoolHandle;

pub use services::AppServices;

/// Build the full application: services (store, queue, worker pool, bridge)
/// plus the router. The returned pool handle must be kept alive and drained
/// at shutdown.
pub async fn build_app() -> (Router, WorkerPoolHandle) {
    let (services, pool_handle) = services::build_services().await;
    (router(Arc::new(services)), pool_handle)
}

/// Assemble the router over already-built services (used by tests to inject
/// custom wiring).
pub fn router(services: Arc<AppServices>) -> Router {
    Router::new()
        .nest("/tasks", routes::tasks::router())
        .nest("/system", routes::system::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
