//! Liveness and operational counters.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::IntoResponse,
    routing::get,
};

use loreforge_store::TaskStore;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
}

pub async fn health() -> axum::response::Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// GET /system/stats
///
/// Task counts by status. A growing `processing` count with idle workers is
/// the operator's signal for orphaned records (no automatic reaper exists).
pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.stats().await {
        Ok(stats) => Json(serde_json::json!({ "tasks": stats })).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
