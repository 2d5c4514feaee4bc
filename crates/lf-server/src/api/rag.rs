//! RAG endpoints: query (single and batch), database CRUD, store stats.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use super::{ApiError, ApiResult};
use crate::state::AppState;
use lf_domain::config::StrategyRef;
use lf_domain::Error;
use lf_rag::resolver::{resolve_database_spec, resolve_database_strategies, DatabaseSpec};
use lf_rag::RetrievalRequest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/projects/{ns}/{id}/rag/query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub database: Option<String>,
    /// One query...
    #[serde(default)]
    pub query: Option<String>,
    /// ...or a batch.  Exactly one of the two must be present.
    #[serde(default)]
    pub queries: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Named retrieval strategy overriding the database's own.
    #[serde(default)]
    pub retrieval_strategy: Option<String>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default)]
    pub filters: Option<serde_json::Map<String, serde_json::Value>>,
}

pub async fn query(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<impl IntoResponse> {
    let config = state.projects.get(&namespace, &project)?;

    let db = match request.database.as_deref() {
        Some(name) => config
            .rag
            .database(name)
            .ok_or_else(|| Error::NotFound(format!("database \"{name}\"")))?,
        None => config
            .rag
            .databases
            .first()
            .ok_or_else(|| Error::InvalidArgument("project has no databases".into()))?,
    };

    // Strategy: explicit name, or the database's resolved one.
    let strategy = match request.retrieval_strategy.as_deref() {
        Some(name) => config
            .components
            .retrieval_strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("retrieval strategy \"{name}\"")))?,
        None => resolve_database_strategies(db, &config.components)?.1,
    };

    let engine = state
        .retrieval_engine(&namespace, &project, &config, db)
        .await?;

    match (&request.query, &request.queries) {
        (Some(_), Some(_)) => Err(ApiError(Error::InvalidArgument(
            "supply either query or queries, not both".into(),
        ))),
        (Some(query), None) => {
            let hits = engine
                .retrieve(
                    &strategy,
                    &RetrievalRequest {
                        query: query.clone(),
                        top_k: request.top_k,
                        score_threshold: request.score_threshold,
                        filters: request.filters.clone(),
                    },
                )
                .await?;
            let total = hits.len();
            Ok(Json(serde_json::json!({
                "database": db.name,
                "results": hits,
                "total_results": total,
            }))
            .into_response())
        }
        (None, Some(queries)) => {
            let results = engine.batch(&strategy, queries).await;
            Ok(Json(serde_json::json!({
                "database": db.name,
                "batches": results,
            }))
            .into_response())
        }
        (None, None) => Err(ApiError(Error::InvalidArgument(
            "query or queries is required".into(),
        ))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET/POST /v1/projects/{ns}/{id}/rag/databases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_databases(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let config = state.projects.get(&namespace, &project)?;
    Ok(Json(serde_json::json!({
        "databases": config.rag.databases,
    })))
}

pub async fn create_database(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    Json(spec): Json<DatabaseSpec>,
) -> ApiResult<impl IntoResponse> {
    let mut config = state.projects.get(&namespace, &project)?;

    if config.rag.database(&spec.name).is_some() {
        return Err(ApiError(Error::Conflict(format!(
            "database \"{}\" already exists",
            spec.name
        ))));
    }

    let db = resolve_database_spec(&spec, &config.components)?;
    config.rag.databases.push(db.clone());
    state.projects.update(&namespace, &project, &config)?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!({ "database": db })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/projects/{ns}/{id}/rag/stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stats(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let config = state.projects.get(&namespace, &project)?;

    let mut per_database = serde_json::Map::new();
    for db in &config.rag.databases {
        let store = state.rag.store_for(&state, &namespace, &project, db)?;
        let stats = store.stats().await?;
        let breaker = state.rag.breaker_for(&namespace, &project, &db.name);
        let breaker_info = breaker.lock().state_info();
        per_database.insert(
            db.name.clone(),
            serde_json::json!({
                "chunks": stats.chunks,
                "files": stats.files,
                "dimension": stats.dimension,
                "distance_metric": db.distance_metric,
                "embedder_circuit": breaker_info,
                "embedding_strategy": describe_ref(&db.embedding_strategy),
            }),
        );
    }

    Ok(Json(serde_json::json!({ "databases": per_database })))
}

fn describe_ref<T>(slot: &Option<StrategyRef<T>>) -> &'static str {
    match slot {
        Some(StrategyRef::Name(_)) => "named",
        Some(StrategyRef::Inline(_)) => "inline",
        None => "default",
    }
}
