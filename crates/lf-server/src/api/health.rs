//! `GET /healthz` — component readiness.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "models_cached": state.models.len(),
        "task_queue_depth": state.broker.queue_depth(),
        "streaming_sessions": state.stream_sessions.len(),
        "sessions": state.sessions.len(),
    }))
}
