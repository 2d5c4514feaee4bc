//! The ingestion pipeline: parser → extractors → chunker → embedder →
//! vector store, with per-file isolation.  A single file's failure never
//! aborts the dataset; each file's outcome is recorded independently.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunker::ChunkSettings;
use crate::document::Document;
use crate::embedder::Embedder;
use crate::extractor::run_extractors;
use crate::parser::{build_parser, select_parser, ParseInput};
use crate::safety::{validate_embeddings_batch, CircuitBreaker};
use crate::store::{ChunkRecord, VectorStore};
use lf_broker::TaskBroker;
use lf_datasets::DatasetStore;
use lf_domain::config::DataProcessingStrategyConfig;
use lf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source identification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A file about to be ingested, with its display name and MIME type
/// resolved.
#[derive(Debug, Clone)]
pub struct IngestSource {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    /// Content hash when the source is hash-addressed.
    pub file_hash: Option<String>,
}

/// Identify an ingestion source.  A path inside the dataset's `raw/` tree
/// (canonical containment, not substring match) is treated as
/// hash-addressed: its display name and MIME type come from the sidecar.
/// Any other path is read as an ordinary file.
pub fn identify_source(
    datasets: &DatasetStore,
    dataset: &str,
    path: &Path,
) -> Result<IngestSource> {
    if datasets.is_hash_addressed(dataset, path) {
        let hash = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath(format!("{path:?} has no filename")))?
            .to_owned();
        let meta = datasets
            .get_metadata(dataset, &hash)?
            .ok_or_else(|| Error::NotFound(format!("sidecar for {hash}")))?;
        let data = datasets.read(dataset, &hash)?;
        return Ok(IngestSource {
            data,
            filename: meta.original_filename,
            mime_type: meta.mime_type,
            file_hash: Some(hash),
        });
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath(format!("{path:?} has no filename")))?
        .to_owned();
    let data = std::fs::read(path)?;
    let mime_type = lf_datasets::guess_mime_type(&filename).to_owned();
    Ok(IngestSource {
        data,
        filename,
        mime_type,
        file_hash: None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-file report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    pub documents: usize,
    pub chunks: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One ingestion engine per database: embedder, store, and the circuit
/// breaker guarding the embedder.
pub struct IngestEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    /// With `fail_fast` (the default) an invalid embedding fails the file;
    /// without it a zero vector is substituted.
    fail_fast: bool,
}

impl IngestEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        breaker: Arc<Mutex<CircuitBreaker>>,
    ) -> Self {
        Self {
            store,
            embedder,
            breaker,
            fail_fast: true,
        }
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Ingest one file under the given (already resolved) strategy.
    pub async fn ingest_file(
        &self,
        source: &IngestSource,
        strategy: &DataProcessingStrategyConfig,
    ) -> Result<FileReport> {
        // 1. Select the parser; no match fails only this file.
        let entry = select_parser(&strategy.parsers, &source.filename, &source.mime_type)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "no-parser: no configured parser matches \"{}\" ({})",
                    source.filename, source.mime_type
                ))
            })?;
        let kind = entry.kind.as_deref().unwrap_or_default();
        let parser = build_parser(
            kind,
            entry.config.as_ref().unwrap_or(&serde_json::Value::Null),
        )?;

        // 2. Parse.
        let input = ParseInput {
            data: source.data.clone(),
            filename: source.filename.clone(),
            mime_type: source.mime_type.clone(),
        };
        let documents = parser.parse(&input)?;
        let document_count = documents.len();

        // 3. Extractors; failures are logged inside and skipped.
        let documents = run_extractors(&strategy.extractors, documents);

        // 4. Chunk with the parser's merged settings.
        let chunk_settings = parser.chunk_settings();
        let chunks = self.chunk_documents(&documents, chunk_settings, source)?;

        if chunks.is_empty() {
            return Ok(FileReport {
                filename: source.filename.clone(),
                file_hash: source.file_hash.clone(),
                parser: Some(parser.name().to_owned()),
                documents: document_count,
                chunks: 0,
            });
        }

        // 5. Embed behind the circuit breaker and validate.
        let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self.embed_guarded(&texts).await?;

        // 6. Store.
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|((metadata, content), vector)| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                content,
                metadata,
                vector,
                file_hash: source.file_hash.clone(),
            })
            .collect();
        let stored = self.store.upsert(records).await?;

        tracing::info!(
            file = %source.filename,
            documents = document_count,
            chunks = stored,
            "file ingested"
        );

        Ok(FileReport {
            filename: source.filename.clone(),
            file_hash: source.file_hash.clone(),
            parser: Some(parser.name().to_owned()),
            documents: document_count,
            chunks: stored,
        })
    }

    fn chunk_documents(
        &self,
        documents: &[Document],
        settings: &ChunkSettings,
        source: &IngestSource,
    ) -> Result<Vec<(serde_json::Map<String, serde_json::Value>, String)>> {
        let mut out = Vec::new();
        for doc in documents {
            for (i, chunk) in settings.split(&doc.content)?.into_iter().enumerate() {
                let mut metadata = doc.metadata.clone();
                metadata.insert("source".into(), doc.source.clone().into());
                metadata.insert("document_id".into(), doc.id.clone().into());
                metadata.insert("chunk_index".into(), serde_json::json!(i));
                if let Some(hash) = &source.file_hash {
                    metadata.insert("file_hash".into(), hash.clone().into());
                }
                out.push((metadata, chunk));
            }
        }
        Ok(out)
    }

    async fn embed_guarded(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.breaker.lock().can_execute() {
            return Err(Error::Unavailable(
                "embedder circuit breaker is open".into(),
            ));
        }

        let vectors = match self.embedder.embed(texts).await {
            Ok(v) => {
                self.breaker.lock().record_success();
                v
            }
            Err(e) => {
                self.breaker.lock().record_failure();
                return Err(e);
            }
        };

        if vectors.len() != texts.len() {
            self.breaker.lock().record_failure();
            return Err(Error::Internal(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let (all_valid, invalid, messages) =
            validate_embeddings_batch(&vectors, self.embedder.dimension(), false);
        if all_valid {
            return Ok(vectors);
        }

        if self.fail_fast {
            return Err(Error::InvalidArgument(format!(
                "invalid embeddings: {}",
                messages.join("; ")
            )));
        }

        // Tolerant mode: substitute zero vectors for the invalid entries so
        // the rest of the file survives.
        tracing::warn!(invalid = invalid.len(), "substituting zero vectors for invalid embeddings");
        let dimension = self
            .embedder
            .dimension()
            .or_else(|| vectors.iter().map(Vec::len).find(|l| *l > 0))
            .unwrap_or(1);
        let mut vectors = vectors;
        for i in invalid {
            vectors[i] = vec![0.0; dimension];
        }
        Ok(vectors)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of cleaning up after a cancelled ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleanupReport {
    pub files_reverted: usize,
    pub files_failed_to_revert: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

/// Remove the chunks written by the successfully-completed children of a
/// cancelled group task.  Per-file failures are logged and do not abort the
/// rest of the cleanup.
pub async fn cleanup_cancelled(
    broker: &TaskBroker,
    group_id: &Uuid,
    store: &dyn VectorStore,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for child in broker.successful_children(group_id) {
        let file_hash = child
            .result
            .as_ref()
            .and_then(|r| r.get("file_hash"))
            .and_then(|h| h.as_str())
            .map(str::to_owned);
        let Some(file_hash) = file_hash else {
            continue;
        };

        match store.delete_by_file_hash(&file_hash).await {
            Ok(deleted) => {
                tracing::info!(file_hash = %file_hash, deleted, "reverted cancelled ingestion");
                report.files_reverted += 1;
            }
            Err(e) => {
                tracing::error!(file_hash = %file_hash, error = %e, "failed to revert file");
                report.files_failed_to_revert += 1;
                report.errors.push(format!("{file_hash}: {e}"));
            }
        }
    }

    report
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
