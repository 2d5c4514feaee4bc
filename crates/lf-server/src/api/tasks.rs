//! Task polling and revocation.
//!
//! - `GET    /v1/projects/{ns}/{id}/tasks/{task_id}` — status + result
//! - `DELETE /v1/projects/{ns}/{id}/tasks/{task_id}` — revoke + cleanup

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use super::ApiResult;
use crate::state::AppState;
use lf_broker::TaskRecord;
use lf_domain::Error;
use lf_rag::cleanup_cancelled;

fn parse_task_id(raw: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidArgument(format!("invalid task id {raw:?}")))
}

/// Client-facing task view: the traceback stays in the logs.
fn task_view(record: &TaskRecord) -> serde_json::Value {
    serde_json::json!({
        "task_id": record.task_id,
        "name": record.name,
        "state": record.state,
        "meta": record.meta,
        "result": record.result,
        "error": record.error,
        "submitted_at": record.submitted_at,
        "completed_at": record.completed_at,
        "children": record.children,
    })
}

pub async fn status(
    State(state): State<AppState>,
    Path((_namespace, _project, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(&task_id)?;
    let record = state
        .broker
        .get(&task_id)
        .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

    if let Some(traceback) = &record.traceback {
        tracing::debug!(%task_id, traceback, "task traceback");
    }
    Ok(Json(task_view(&record)))
}

/// Revoke a task.  For a dataset-processing group the chunks written by
/// already-finished children are cleaned up afterwards; per-file cleanup
/// failures are reported, not fatal.
pub async fn revoke(
    State(state): State<AppState>,
    Path((namespace, project, task_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(&task_id)?;
    let record = state
        .broker
        .get(&task_id)
        .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

    let revoked = state.broker.revoke(&task_id);

    // Cleanup applies to dataset-processing groups whose meta names the
    // database the chunks went into.
    let cleanup = match record.meta.get("database").and_then(|d| d.as_str()) {
        Some(database) if record.is_group() => {
            let config = state.projects.get(&namespace, &project)?;
            let db = config
                .rag
                .database(database)
                .ok_or_else(|| Error::NotFound(format!("database \"{database}\"")))?;
            let store = state.rag.store_for(&state, &namespace, &project, db)?;
            Some(cleanup_cancelled(&state.broker, &task_id, store.as_ref()).await)
        }
        _ => None,
    };

    Ok(Json(serde_json::json!({
        "task_id": task_id,
        "revoked": revoked,
        "cleanup": cleanup,
    })))
}
