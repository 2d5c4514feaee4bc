//! Dataset endpoints: file upload/delete and ingestion dispatch.
//!
//! - `POST   /v1/projects/{ns}/{id}/datasets/{ds}/files`   — multipart upload
//! - `DELETE /v1/projects/{ns}/{id}/datasets/{ds}/files`   — delete by hash
//! - `POST   /v1/projects/{ns}/{id}/datasets/{ds}/process` — enqueue ingestion

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use super::{ApiError, ApiResult};
use crate::state::AppState;
use lf_datasets::{DatasetStore, Upload};
use lf_domain::Error;
use lf_rag::ingest::{identify_source, IngestEngine};
use lf_rag::StrategyResolver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn upload(
    State(state): State<AppState>,
    Path((namespace, project, dataset)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    // The project must exist before any filesystem path is touched.
    let mut config = state.projects.get(&namespace, &project)?;
    let store = DatasetStore::new(state.projects.project_dir(&namespace, &project)?);

    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidArgument(format!("malformed multipart body: {e}")))?
    {
        let filename = field
            .file_name()
            .map(str::to_owned)
            .unwrap_or_else(|| "unknown".to_owned());
        let content_type = field.content_type().map(str::to_owned);
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidArgument(format!("reading upload: {e}")))?
            .to_vec();

        if data.len() > state.config.max_upload_bytes {
            return Err(ApiError(Error::PayloadTooLarge(format!(
                "{filename}: {} bytes exceeds the {} byte limit",
                data.len(),
                state.config.max_upload_bytes
            ))));
        }

        let metadata = store.put(
            &dataset,
            &Upload {
                filename,
                content_type,
                data,
            },
        )?;
        uploaded.push(metadata);
    }

    if uploaded.is_empty() {
        return Err(ApiError(Error::InvalidArgument(
            "no files in multipart body".into(),
        )));
    }

    // Register the hashes on the dataset config so `process` picks them up.
    if let Some(ds) = config.datasets.iter_mut().find(|d| d.name == dataset) {
        for meta in &uploaded {
            if !ds.files.contains(&meta.hash) {
                ds.files.push(meta.hash.clone());
            }
        }
        state.projects.update(&namespace, &project, &config)?;
    }

    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!({ "files": uploaded })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub hash: String,
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((namespace, project, dataset)): Path<(String, String, String)>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut config = state.projects.get(&namespace, &project)?;
    let store = DatasetStore::new(state.projects.project_dir(&namespace, &project)?);

    let metadata = store.delete(&dataset, &query.hash)?;

    if let Some(ds) = config.datasets.iter_mut().find(|d| d.name == dataset) {
        ds.files.retain(|h| h != &query.hash);
        state.projects.update(&namespace, &project, &config)?;
    }

    Ok(Json(serde_json::json!({ "deleted": metadata })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process (ingestion)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Per-parser-type config overrides (the request layer of the cascade).
    #[serde(default)]
    pub parser_overrides: Option<serde_json::Map<String, serde_json::Value>>,
    /// Zero-vector tolerance: with `fail_fast` off, invalid embeddings are
    /// substituted instead of failing the file.
    #[serde(default = "d_fail_fast")]
    pub fail_fast: bool,
}

fn d_fail_fast() -> bool {
    true
}

impl Default for ProcessRequest {
    fn default() -> Self {
        Self {
            parser_overrides: None,
            fail_fast: d_fail_fast(),
        }
    }
}

/// Enqueue one ingestion job per dataset file; returns a group task id the
/// client polls via the tasks endpoint.
pub async fn process(
    State(state): State<AppState>,
    Path((namespace, project, dataset)): Path<(String, String, String)>,
    body: Option<Json<ProcessRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let config = state.projects.get(&namespace, &project)?;

    let ds = config
        .dataset(&dataset)
        .ok_or_else(|| Error::NotFound(format!("dataset \"{dataset}\"")))?
        .clone();
    let db = config
        .rag
        .database(&ds.database)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "dataset \"{dataset}\" references unknown database \"{}\"",
                ds.database
            ))
        })?
        .clone();

    // Resolve the strategy cascade once, up front.
    let resolver = StrategyResolver::new(&config);
    let strategy = Arc::new(resolver.resolve_processing_strategy(
        &ds.data_processing_strategy,
        request.parser_overrides.as_ref(),
    )?);

    if ds.files.is_empty() {
        return Err(ApiError(Error::InvalidArgument(format!(
            "dataset \"{dataset}\" has no files"
        ))));
    }

    let engine = Arc::new(
        state
            .ingest_engine(&namespace, &project, &config, &db)
            .await?
            .fail_fast(request.fail_fast),
    );
    let datasets = Arc::new(DatasetStore::new(
        state.projects.project_dir(&namespace, &project)?,
    ));

    let jobs: Vec<(serde_json::Value, _)> = ds
        .files
        .iter()
        .map(|file_hash| {
            let file_hash = file_hash.clone();
            let engine: Arc<IngestEngine> = engine.clone();
            let datasets = datasets.clone();
            let strategy = strategy.clone();
            let dataset = dataset.clone();
            let meta = serde_json::json!({"file_hash": file_hash});

            let job = move |ctx: lf_broker::JobContext| async move {
                if ctx.cancel.is_cancelled() {
                    return Err(Error::InvalidArgument("task revoked".into()));
                }
                let raw_path = datasets.raw_path(&dataset, &file_hash)?;
                let source = identify_source(&datasets, &dataset, &raw_path)?;
                let report = engine.ingest_file(&source, &strategy).await?;
                Ok(serde_json::to_value(report)?)
            };
            (meta, job)
        })
        .collect();

    let group_id = state.broker.submit_group(
        "dataset.process",
        serde_json::json!({
            "namespace": namespace,
            "project": project,
            "dataset": dataset,
            "database": ds.database,
            "files": ds.files.len(),
        }),
        jobs,
    );

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "task_id": group_id,
            "files": ds.files.len(),
        })),
    ))
}
