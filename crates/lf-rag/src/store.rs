//! Vector store contract and the in-memory implementation with JSON
//! persistence under the dataset `stores/` directory.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use lf_domain::config::DistanceMetric;
use lf_domain::{Error, Result};

/// One stored chunk: text, metadata, vector, and the content hash of the
/// file it came from (used by cancellation cleanup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

/// A search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub score: f32,
}

/// Store-level statistics for the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub chunks: usize,
    pub files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

/// Vector store contract.  Concrete vendor stores are external
/// collaborators; they plug in behind this trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<usize>;

    /// Top-`top_k` nearest chunks, best first.  `filter` restricts results
    /// to chunks whose metadata contains every given key/value pair.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<SearchHit>>;

    /// Delete every chunk originating from a file hash.  Returns the count
    /// removed.
    async fn delete_by_file_hash(&self, file_hash: &str) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize, Deserialize, Default)]
struct PersistedStore {
    metric: DistanceMetric,
    records: Vec<ChunkRecord>,
}

/// Exhaustive-scan vector store held in memory, optionally persisted as a
/// JSON sidecar.  Suitable for the dataset sizes a single project serves;
/// larger deployments swap in a vendor store behind [`VectorStore`].
pub struct MemoryVectorStore {
    metric: DistanceMetric,
    records: RwLock<HashMap<String, ChunkRecord>>,
    persist_path: Option<PathBuf>,
}

impl MemoryVectorStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            records: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    /// Open a persistent store: loads existing state from
    /// `<dir>/<database>.json` and saves after every mutation.
    pub fn open(dir: &std::path::Path, database: &str, metric: DistanceMetric) -> Result<Self> {
        let path = dir.join(format!("{database}.json"));
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let persisted: PersistedStore = serde_json::from_str(&raw)?;
            persisted
                .records
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect()
        } else {
            HashMap::new()
        };

        tracing::info!(
            database,
            chunks = records.len(),
            path = %path.display(),
            "vector store opened"
        );

        Ok(Self {
            metric,
            records: RwLock::new(records),
            persist_path: Some(path),
        })
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let persisted = PersistedStore {
            metric: self.metric,
            records: self.records.read().values().cloned().collect(),
        };
        std::fs::write(path, serde_json::to_vec(&persisted)?)?;
        Ok(())
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot(a, b),
            // Negated distance so that "higher is better" holds for every
            // metric.
            DistanceMetric::L2 => -l2_distance(a, b),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let na = dot(a, a).sqrt();
    let nb = dot(b, b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot(a, b) / (na * nb)
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn matches_filter(
    metadata: &serde_json::Map<String, serde_json::Value>,
    filter: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<usize> {
        let count = records.len();
        {
            let mut map = self.records.write();
            for record in records {
                if record.vector.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "chunk {} has an empty vector",
                        record.id
                    )));
                }
                map.insert(record.id.clone(), record);
            }
        }
        self.flush()?;
        Ok(count)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<SearchHit>> {
        let records = self.records.read();
        let mut hits: Vec<SearchHit> = records
            .values()
            .filter(|r| filter.map_or(true, |f| matches_filter(&r.metadata, f)))
            .map(|r| SearchHit {
                id: r.id.clone(),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                score: self.score(vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_file_hash(&self, file_hash: &str) -> Result<usize> {
        let removed = {
            let mut map = self.records.write();
            let before = map.len();
            map.retain(|_, r| r.file_hash.as_deref() != Some(file_hash));
            before - map.len()
        };
        self.flush()?;
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let records = self.records.read();
        let files: std::collections::HashSet<&str> = records
            .values()
            .filter_map(|r| r.file_hash.as_deref())
            .collect();
        let dimension = records.values().next().map(|r| r.vector.len());
        Ok(StoreStats {
            chunks: records.len(),
            files: files.len(),
            dimension,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>, file_hash: Option<&str>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_owned(),
            content: format!("content of {id}"),
            metadata: serde_json::Map::new(),
            vector,
            file_hash: file_hash.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn search_orders_by_cosine_similarity() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        store
            .upsert(vec![
                record("aligned", vec![1.0, 0.0], None),
                record("orthogonal", vec![0.0, 1.0], None),
                record("opposite", vec![-1.0, 0.0], None),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits[0].id, "aligned");
        assert!(hits[0].score > 0.99);
        assert_eq!(hits[2].id, "opposite");
    }

    #[tokio::test]
    async fn l2_metric_prefers_nearest() {
        let store = MemoryVectorStore::new(DistanceMetric::L2);
        store
            .upsert(vec![
                record("near", vec![1.0, 1.0], None),
                record("far", vec![10.0, 10.0], None),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.1, 1.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        let records = (0..10)
            .map(|i| record(&format!("r{i}"), vec![1.0, i as f32], None))
            .collect();
        store.upsert(records).await.unwrap();
        let hits = store.search(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn metadata_filter_restricts_results() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        let mut tagged = record("tagged", vec![1.0, 0.0], None);
        tagged
            .metadata
            .insert("lang".into(), serde_json::json!("en"));
        store
            .upsert(vec![tagged, record("untagged", vec![1.0, 0.0], None)])
            .await
            .unwrap();

        let mut filter = serde_json::Map::new();
        filter.insert("lang".into(), serde_json::json!("en"));
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "tagged");
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        store
            .upsert(vec![record("a", vec![1.0, 0.0], None)])
            .await
            .unwrap();
        store
            .upsert(vec![record("a", vec![0.0, 1.0], None)])
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
    }

    #[tokio::test]
    async fn empty_vector_rejected() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        let err = store
            .upsert(vec![record("bad", vec![], None)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn delete_by_file_hash_removes_only_that_file() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        store
            .upsert(vec![
                record("a1", vec![1.0], Some("hash_a")),
                record("a2", vec![1.0], Some("hash_a")),
                record("b1", vec![1.0], Some("hash_b")),
            ])
            .await
            .unwrap();

        let removed = store.delete_by_file_hash("hash_a").await.unwrap();
        assert_eq!(removed, 2);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.files, 1);
    }

    #[tokio::test]
    async fn stats_report_counts_and_dimension() {
        let store = MemoryVectorStore::new(DistanceMetric::Cosine);
        store
            .upsert(vec![
                record("a", vec![1.0, 2.0, 3.0], Some("h1")),
                record("b", vec![4.0, 5.0, 6.0], Some("h2")),
            ])
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dimension, Some(3));
    }

    #[tokio::test]
    async fn persistence_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store =
                MemoryVectorStore::open(tmp.path(), "main", DistanceMetric::Cosine).unwrap();
            store
                .upsert(vec![record("a", vec![1.0, 0.0], Some("h"))])
                .await
                .unwrap();
        }

        let reopened = MemoryVectorStore::open(tmp.path(), "main", DistanceMetric::Cosine).unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        let hits = reopened.search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].id, "a");
    }
}
