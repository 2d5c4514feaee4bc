//! Backend factories shipped with the server binary.
//!
//! Concrete model runtimes (GGUF engines, ONNX encoders, detector
//! libraries) are external collaborators wired in by the host integration.
//! This module provides the two factories the binary itself knows:
//!
//! - [`NullBackendFactory`] — the default; every load fails with
//!   `unavailable` until a real runtime is linked, so model endpoints
//!   surface clean 503s instead of panics.
//! - [`StubBackendFactory`] — deterministic in-process stubs behind
//!   `serve --stub-backends`, used for development and by the test suite.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use lf_domain::identity::ModelFamily;
use lf_domain::stream::{BoxStream, ChatMessage, TokenChunk};
use lf_domain::{Error, Result};
use lf_models::adapter::{
    BackendFactory, Classification, DetectorBackend, EncoderBackend, Entity, FitReport,
    GenerateOptions, LanguageBackend, LoadSpec, ModelHandle, RankedDoc, SpeechBackend,
    VisionBackend,
};

/// Dimension of every stub embedding.
pub const STUB_DIMENSION: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Null factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NullBackendFactory;

#[async_trait]
impl BackendFactory for NullBackendFactory {
    async fn load(&self, spec: &LoadSpec) -> Result<ModelHandle> {
        spec.validate()?;
        Err(Error::Unavailable(format!(
            "no model runtime linked for {} \"{}\"",
            spec.identity.family, spec.identity.id
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Language stub: echoes the last user message.
pub struct EchoLanguage;

#[async_trait]
impl LanguageBackend for EchoLanguage {
    async fn load(&self) -> Result<()> {
        Ok(())
    }
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
    async fn generate(&self, messages: &[ChatMessage], _opts: &GenerateOptions) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("echo: {last_user}"))
    }
    fn generate_stream(
        &self,
        messages: &[ChatMessage],
        _opts: &GenerateOptions,
    ) -> BoxStream<'static, Result<TokenChunk>> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let tokens: Vec<Result<TokenChunk>> = format!("echo: {last_user}")
            .split_inclusive(' ')
            .map(|t| Ok(TokenChunk::text(t)))
            .collect();
        Box::pin(futures_util::stream::iter(tokens))
    }
}

/// Encoder stub: deterministic byte-histogram embeddings.
pub struct HashEncoder;

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; STUB_DIMENSION];
    for (i, b) in text.bytes().enumerate() {
        v[(b as usize + i) % STUB_DIMENSION] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EncoderBackend for HashEncoder {
    async fn load(&self) -> Result<()> {
        Ok(())
    }
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
    async fn embed(&self, texts: &[String], _normalize: bool) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<RankedDoc>> {
        let query_words: Vec<&str> = query.split_whitespace().collect();
        Ok(docs
            .iter()
            .enumerate()
            .map(|(index, doc)| RankedDoc {
                index,
                score: query_words.iter().filter(|w| doc.contains(**w)).count() as f32,
            })
            .collect())
    }
    async fn classify(&self, texts: &[String]) -> Result<Vec<Classification>> {
        Ok(texts
            .iter()
            .map(|t| Classification {
                label: if t.len() % 2 == 0 { "even" } else { "odd" }.into(),
                score: 1.0,
            })
            .collect())
    }
    async fn extract_entities(&self, texts: &[String]) -> Result<Vec<Vec<Entity>>> {
        Ok(texts.iter().map(|_| Vec::new()).collect())
    }
}

/// Speech stub: byte-count transcripts and non-silent synthetic PCM.
pub struct StubSpeech;

#[async_trait]
impl SpeechBackend for StubSpeech {
    async fn load(&self) -> Result<()> {
        Ok(())
    }
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
    async fn transcribe(&self, pcm: &[u8], _sample_rate: u32) -> Result<String> {
        Ok(format!("transcript of {} bytes", pcm.len()))
    }
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.bytes().flat_map(|b| [b.max(1), 1]).collect())
    }
}

pub struct StubVision;

#[async_trait]
impl VisionBackend for StubVision {
    async fn load(&self) -> Result<()> {
        Ok(())
    }
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
    async fn infer_frame(
        &self,
        frame: &[u8],
        _config: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"bytes": frame.len(), "detections": []}))
    }
}

/// Detector stub: mean-of-row scoring, honouring the autosave contract.
pub struct StubDetector;

#[async_trait]
impl DetectorBackend for StubDetector {
    async fn load(&self) -> Result<()> {
        Ok(())
    }
    async fn unload(&self) -> Result<()> {
        Ok(())
    }
    async fn fit(
        &self,
        data: &[Vec<f64>],
        _params: &serde_json::Value,
        autosave: Option<&Path>,
    ) -> Result<FitReport> {
        let saved_to = match autosave {
            Some(path) => {
                self.save(path).await?;
                Some(path.to_path_buf())
            }
            None => None,
        };
        Ok(FitReport {
            samples: data.len(),
            saved_to,
        })
    }
    async fn score(&self, data: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(data
            .iter()
            .map(|row| row.iter().copied().sum::<f64>() / row.len().max(1) as f64)
            .collect())
    }
    async fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"detector-state")?;
        Ok(())
    }
    async fn load_from(&self, path: &Path) -> Result<()> {
        std::fs::read(path)?;
        Ok(())
    }
    async fn status(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"ready": true}))
    }
}

/// Deterministic factory used by tests and `serve --stub-backends`.
pub struct StubBackendFactory;

#[async_trait]
impl BackendFactory for StubBackendFactory {
    async fn load(&self, spec: &LoadSpec) -> Result<ModelHandle> {
        spec.validate()?;
        Ok(match spec.identity.family {
            ModelFamily::Language => ModelHandle::Language(Arc::new(EchoLanguage)),
            ModelFamily::Encoder => ModelHandle::Encoder(Arc::new(HashEncoder)),
            ModelFamily::Speech => ModelHandle::Speech(Arc::new(StubSpeech)),
            ModelFamily::Vision => ModelHandle::Vision(Arc::new(StubVision)),
            ModelFamily::Anomaly
            | ModelFamily::Drift
            | ModelFamily::Timeseries
            | ModelFamily::Adtk => ModelHandle::Detector(Arc::new(StubDetector)),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
