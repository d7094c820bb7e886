//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use loreforge_engine::{ControlError, SubmitError};
use loreforge_store::TaskStoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: TaskStoreError) -> axum::response::Response {
    match err {
        TaskStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("task not found: {id}"))
        }
        TaskStoreError::AlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "already_exists",
            format!("task already exists: {id}"),
        ),
        TaskStoreError::Conflict { .. } => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        TaskStoreError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        TaskStoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
        TaskStoreError::Domain(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_task_state", e.to_string())
        }
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Store(e) => store_error_to_response(e),
        SubmitError::Enqueue(msg) => json_error(StatusCode::BAD_GATEWAY, "enqueue_error", msg),
    }
}

pub fn control_error_to_response(err: ControlError) -> axum::response::Response {
    match err {
        ControlError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("task not found: {id}"))
        }
        ControlError::NotRetryable { .. } => {
            json_error(StatusCode::CONFLICT, "not_retryable", err.to_string())
        }
        ControlError::NotStoppable { .. } => {
            json_error(StatusCode::CONFLICT, "not_stoppable", err.to_string())
        }
        ControlError::Store(e) => store_error_to_response(e),
        ControlError::Enqueue(msg) => json_error(StatusCode::BAD_GATEWAY, "enqueue_error", msg),
    }
}
