use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Known parser kinds.  Parser selection matches files against these; an
/// unrecognized kind in config is a validation warning and yields an empty
/// defaults layer at resolve time.
pub const KNOWN_PARSER_KINDS: &[&str] = &[
    "text",
    "markdown",
    "csv",
    "pdf_llamaindex",
    "docx",
];

/// Embedding strategy: which encoder produces vectors, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingStrategyConfig {
    /// Encoder model wire id (may carry a quantization suffix).
    pub model: String,
    /// Expected vector dimension; used to validate embedder output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(default = "d_true")]
    pub normalize: bool,
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
}

fn d_true() -> bool {
    true
}

fn d_batch_size() -> usize {
    32
}

/// Retrieval mode selected by a retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    #[default]
    Similarity,
    Hybrid,
    Rerank,
}

/// Retrieval strategy: how candidates are fetched and optionally reranked.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RetrievalStrategyConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default = "d_top_k")]
    pub top_k: usize,
    /// Reranker model wire id; required when `mode` is `rerank`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f32>,
}

fn d_top_k() -> usize {
    5
}

/// One parser entry in a data-processing strategy.  `config` holds
/// kind-specific settings merged against built-in defaults by the strategy
/// resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Parser kind (see [`KNOWN_PARSER_KINDS`]).  Entries without a type are
    /// skipped with a warning at resolve time.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Filename patterns / extensions this parser claims (e.g. `*.md`).
    #[serde(default)]
    pub patterns: Vec<String>,
    /// MIME types this parser claims.
    #[serde(default)]
    pub mime_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// One extractor entry in a data-processing strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Data-processing strategy: ordered parsers plus optional extractors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataProcessingStrategyConfig {
    #[serde(default)]
    pub parsers: Vec<ParserConfig>,
    #[serde(default)]
    pub extractors: Vec<ExtractorConfig>,
}

/// Distance metric for a vector database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Dot,
}

/// Reference-or-inline slot for a strategy inside a database definition.
/// Supplying both forms for the same slot is a config error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrategyRef<T> {
    Name(String),
    Inline(T),
}

/// A RAG database: a vector store bound to an embedding strategy and a
/// retrieval strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default = "d_store_kind")]
    pub store: String,
    #[serde(default)]
    pub distance_metric: DistanceMetric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_strategy: Option<StrategyRef<EmbeddingStrategyConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_strategy: Option<StrategyRef<RetrievalStrategyConfig>>,
}

fn d_store_kind() -> String {
    "memory".into()
}

/// Default strategy names used when a database supplies neither a reference
/// nor an inline definition for a slot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComponentDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_strategy: Option<String>,
}

/// Reusable named strategies.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComponentsConfig {
    #[serde(default)]
    pub embedding_strategies: BTreeMap<String, EmbeddingStrategyConfig>,
    #[serde(default)]
    pub retrieval_strategies: BTreeMap<String, RetrievalStrategyConfig>,
    #[serde(default)]
    pub data_processing_strategies: BTreeMap<String, DataProcessingStrategyConfig>,
    #[serde(default)]
    pub defaults: ComponentDefaults,
}

/// RAG section: the project's databases.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl RagConfig {
    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }
}
