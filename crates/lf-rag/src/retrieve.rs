//! The retrieval pipeline: embed the query, fetch candidates, apply the
//! score threshold, optionally rerank, and return formatted results.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::store::{SearchHit, VectorStore};
use lf_domain::config::{RetrievalMode, RetrievalStrategyConfig};
use lf_domain::{Error, Result};
use lf_models::adapter::EncoderBackend;

/// A retrieval request against one database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    /// Metadata equality filters.
    #[serde(default)]
    pub filters: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Per-query outcome for batch search: queries fail independently.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub query: String,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One retrieval engine per database.
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    /// Reranker encoder, present when the strategy calls for reranking.
    reranker: Option<Arc<dyn EncoderBackend>>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn EncoderBackend>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Run one query through the resolved strategy.
    pub async fn retrieve(
        &self,
        strategy: &RetrievalStrategyConfig,
        request: &RetrievalRequest,
    ) -> Result<Vec<SearchHit>> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidArgument("query must not be empty".into()));
        }

        let top_k = request.top_k.unwrap_or(strategy.top_k).max(1);

        // Embed the query.
        let vectors = self.embedder.embed(&[request.query.clone()]).await?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("embedder returned no vector for query".into()))?;

        // Fetch candidates.  Hybrid and rerank modes over-fetch so the
        // rescoring step has room to reorder.
        let fetch_k = match strategy.mode {
            RetrievalMode::Similarity => top_k,
            RetrievalMode::Hybrid | RetrievalMode::Rerank => top_k * 4,
        };
        let mut hits = self
            .store
            .search(&query_vector, fetch_k, request.filters.as_ref())
            .await?;

        if strategy.mode == RetrievalMode::Hybrid {
            rescore_hybrid(&request.query, &mut hits);
        }

        // Score threshold from the request or the strategy.
        if let Some(threshold) = request.score_threshold.or(strategy.score_threshold) {
            hits.retain(|h| h.score >= threshold);
        }

        // Rerank and re-sort.
        if strategy.mode == RetrievalMode::Rerank {
            hits = self.rerank(&request.query, hits).await?;
        }

        hits.truncate(top_k);
        Ok(hits)
    }

    /// Batch search: one result list per query, in input order.  A failing
    /// query is recorded in its own slot and never affects the others.
    pub async fn batch(
        &self,
        strategy: &RetrievalStrategyConfig,
        queries: &[String],
    ) -> Vec<BatchResult> {
        let mut out = Vec::with_capacity(queries.len());
        for query in queries {
            let request = RetrievalRequest {
                query: query.clone(),
                ..Default::default()
            };
            match self.retrieve(strategy, &request).await {
                Ok(results) => out.push(BatchResult {
                    query: query.clone(),
                    results,
                    error: None,
                }),
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "batch query failed");
                    out.push(BatchResult {
                        query: query.clone(),
                        results: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        out
    }

    async fn rerank(&self, query: &str, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        let Some(reranker) = &self.reranker else {
            return Err(Error::Unavailable(
                "strategy requires a reranker but none is loaded".into(),
            ));
        };
        if hits.is_empty() {
            return Ok(hits);
        }

        let docs: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
        let ranked = reranker.rerank(query, &docs).await?;

        let mut out = Vec::with_capacity(ranked.len());
        for entry in ranked {
            let Some(hit) = hits.get(entry.index) else {
                return Err(Error::Internal(format!(
                    "reranker returned out-of-range index {}",
                    entry.index
                )));
            };
            let mut hit = hit.clone();
            hit.score = entry.score;
            out.push(hit);
        }
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(out)
    }
}

/// Blend vector similarity with plain term overlap.  Keeps retrieval useful
/// when the embedding misses exact keywords.
fn rescore_hybrid(query: &str, hits: &mut [SearchHit]) {
    let query_terms: HashSet<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .collect();
    if query_terms.is_empty() {
        return;
    }

    for hit in hits.iter_mut() {
        let content = hit.content.to_lowercase();
        let matched = query_terms
            .iter()
            .filter(|t| content.contains(t.as_str()))
            .count();
        let overlap = matched as f32 / query_terms.len() as f32;
        hit.score = 0.7 * hit.score + 0.3 * overlap;
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
