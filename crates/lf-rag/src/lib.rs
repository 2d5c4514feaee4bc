//! RAG pipelines: configurable ingestion (parser → extractors → chunker →
//! embedder → store) and retrieval (embed → search → threshold → rerank),
//! plus the strategy-resolution cascade and embedding safety rails.

pub mod chunker;
pub mod document;
pub mod embedder;
pub mod extractor;
pub mod ingest;
pub mod parser;
pub mod resolver;
pub mod retrieve;
pub mod safety;
pub mod store;

pub use document::Document;
pub use embedder::{Embedder, EncoderEmbedder};
pub use ingest::{cleanup_cancelled, identify_source, FileReport, IngestEngine, IngestSource};
pub use resolver::{resolve_database_spec, DatabaseSpec, StrategyResolver};
pub use retrieve::{BatchResult, RetrievalEngine, RetrievalRequest};
pub use safety::{CircuitBreaker, CircuitState};
pub use store::{ChunkRecord, MemoryVectorStore, SearchHit, StoreStats, VectorStore};
