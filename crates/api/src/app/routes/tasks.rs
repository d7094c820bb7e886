//! Task endpoints: submit, status, list, SSE stream, retry/stop controls.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use tokio_stream::StreamExt;

use loreforge_core::{EntityId, JobType, TaskId, TaskStatus};
use loreforge_store::TaskStore;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_task).get(list_tasks))
        .route("/:id", get(get_task))
        .route("/:id/stream", get(stream_task))
        .route("/:id/retry", post(retry_task))
        .route("/:id/stop", post(stop_task))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /tasks
///
/// Fire-and-forget submission: returns 202 with the task id immediately;
/// progress is followed via `GET /tasks/{id}/stream`.
pub async fn submit_task(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitTaskRequest>,
) -> axum::response::Response {
    let job_type = JobType::from(body.job_type.as_str());
    let related_entity = body.related_entity.map(Into::into);

    match services
        .submitter
        .submit(job_type, body.parameters, related_entity)
        .await
    {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "task_id": task_id })),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// GET /tasks/{id}
pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id = match parse_task_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.store.get(task_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /tasks?status=&entity_id=&entity_type=&limit=
pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListTasksQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(100).min(1000);

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<TaskStatus>() {
            Ok(s) => Some(s),
            Err(e) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string());
            }
        },
    };

    let result = match query.entity_id {
        Some(entity_id) => {
            services
                .store
                .list_by_entity(
                    EntityId::from_uuid(entity_id),
                    query.entity_type.as_deref(),
                    limit,
                )
                .await
        }
        None => services.store.list_by_status(status, limit).await,
    };

    match result {
        Ok(records) => Json(serde_json::json!({ "tasks": records })).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /tasks/{id}/stream
///
/// SSE stream of `progress`/`completed`/`failed`/`error` events. The bridge
/// guarantees at least one event and exactly one terminal event; the
/// connection closes after the terminal event.
pub async fn stream_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id = match parse_task_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let stream = services.bridge.stream(task_id).map(|event| {
        Ok::<SseEvent, Infallible>(
            SseEvent::default()
                .event(event.name())
                .data(event.body().to_string()),
        )
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// POST /tasks/{id}/retry
pub async fn retry_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id = match parse_task_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.control.retry(task_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

/// POST /tasks/{id}/stop
pub async fn stop_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let task_id = match parse_task_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.control.stop(task_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => errors::control_error_to_response(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_task_id(raw: &str) -> Result<TaskId, axum::response::Response> {
    raw.parse::<TaskId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid task id")
    })
}
