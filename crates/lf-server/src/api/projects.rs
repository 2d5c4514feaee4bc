//! Project CRUD endpoints.
//!
//! - `GET    /v1/projects/{ns}`      — list
//! - `POST   /v1/projects/{ns}`      — create
//! - `GET    /v1/projects/{ns}/{id}` — read
//! - `PUT    /v1/projects/{ns}/{id}` — update
//! - `DELETE /v1/projects/{ns}/{id}` — delete (evicts sessions too)

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use super::ApiResult;
use crate::state::AppState;
use lf_domain::config::ProjectConfig;

pub async fn list(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let projects = state.projects.list(&namespace)?;
    Ok(Json(serde_json::json!({
        "namespace": namespace,
        "projects": projects,
    })))
}

pub async fn create(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Json(mut config): Json<ProjectConfig>,
) -> ApiResult<impl IntoResponse> {
    config.namespace = namespace.clone();
    state.projects.create(&namespace, &config)?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!({
            "namespace": namespace,
            "project": config.name,
            "config_hash": config.config_hash(),
        })),
    ))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let config = state.projects.get(&namespace, &project)?;
    Ok(Json(config))
}

pub async fn update(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    Json(mut config): Json<ProjectConfig>,
) -> ApiResult<impl IntoResponse> {
    config.namespace = namespace.clone();
    state.projects.update(&namespace, &project, &config)?;
    Ok(Json(serde_json::json!({
        "namespace": namespace,
        "project": project,
        "config_hash": config.config_hash(),
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    // Sessions first (their directories live under the project dir), then
    // cached RAG resources, then the files.
    if let Ok(history) = state.history_store(&namespace, &project) {
        state.sessions.evict_project(&history, &namespace, &project);
    }
    state.rag.evict_project(&namespace, &project);
    state.projects.delete(&namespace, &project)?;
    Ok(Json(serde_json::json!({
        "deleted": format!("{namespace}/{project}"),
    })))
}
