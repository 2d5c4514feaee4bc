//! HTTP surface: route table and the error-kind → status mapping.

pub mod chat;
pub mod datasets;
pub mod event_logs;
pub mod health;
pub mod projects;
pub mod rag;
pub mod tasks;
pub mod voice;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use lf_domain::{Error, ErrorKind};

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route(
            "/v1/projects/:namespace",
            get(projects::list).post(projects::create),
        )
        .route(
            "/v1/projects/:namespace/:project",
            get(projects::get_one)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route(
            "/v1/projects/:namespace/:project/chat/completions",
            post(chat::completions),
        )
        .route(
            "/v1/projects/:namespace/:project/rag/query",
            post(rag::query),
        )
        .route(
            "/v1/projects/:namespace/:project/rag/databases",
            get(rag::list_databases).post(rag::create_database),
        )
        .route(
            "/v1/projects/:namespace/:project/rag/stats",
            get(rag::stats),
        )
        .route(
            "/v1/projects/:namespace/:project/datasets/:dataset/files",
            post(datasets::upload).delete(datasets::delete_file),
        )
        .route(
            "/v1/projects/:namespace/:project/datasets/:dataset/process",
            post(datasets::process),
        )
        .route(
            "/v1/projects/:namespace/:project/tasks/:task_id",
            get(tasks::status).delete(tasks::revoke),
        )
        .route(
            "/v1/projects/:namespace/:project/event_logs",
            get(event_logs::list),
        )
        .route(
            "/v1/projects/:namespace/:project/event_logs/:event_id",
            get(event_logs::get_one),
        )
        .route("/v1/:namespace/:project/voice/chat", get(voice::ws_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_upload_bytes + 1024 * 1024,
        ))
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrapper turning the shared error type into an HTTP response.
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidPath => StatusCode::BAD_REQUEST,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        // Internal details are logged, never sent to clients.
        let message = if kind == ErrorKind::Internal {
            tracing::error!(error = %self.0, detail = ?self.0, "internal error");
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
