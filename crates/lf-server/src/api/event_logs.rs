//! Event log queries.
//!
//! - `GET /v1/projects/{ns}/{id}/event_logs`            — list (filters, pagination)
//! - `GET /v1/projects/{ns}/{id}/event_logs/{event_id}` — detail

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};

use super::ApiResult;
use crate::events::EventQuery;
use crate::state::AppState;
use lf_domain::Error;

pub async fn list(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    Query(query): Query<EventQuery>,
) -> ApiResult<impl IntoResponse> {
    // Listing events for a missing project is a 404, not an empty page.
    if !state.projects.exists(&namespace, &project) {
        return Err(Error::NotFound(format!("project {namespace}/{project}")).into());
    }

    let (events, total) = state.events.list(&namespace, &project, &query)?;
    let summaries: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            serde_json::json!({
                "event_id": e.event_id,
                "event_type": e.event_type,
                "request_id": e.request_id,
                "timestamp": e.timestamp,
                "namespace": e.namespace,
                "project": e.project,
                "status": e.status,
                "duration_ms": e.total_elapsed_ms,
                "config_hash": e.config_hash,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "total": total,
        "events": summaries,
        "limit": query.limit,
        "offset": query.offset,
    })))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((namespace, project, event_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let event = state
        .events
        .get(&namespace, &project, &event_id)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "event \"{event_id}\" in project {namespace}/{project}"
            ))
        })?;
    Ok(Json(event))
}
