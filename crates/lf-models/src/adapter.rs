//! Uniform backend contract per model family.
//!
//! Every backend implements `load`/`unload` plus its family-specific
//! operations.  Family selection is the [`ModelHandle`] tagged enum — there
//! is no adapter inheritance tree.  Concrete backends (GGUF runtimes, ONNX
//! encoders, detector libraries) live outside this crate and are injected
//! through a [`BackendFactory`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lf_domain::identity::{ModelFamily, ModelIdentity};
use lf_domain::stream::{BoxStream, ChatMessage, TokenChunk};
use lf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests & results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for a single generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    /// Token budget for `<think>…</think>` content.  `None` disables the
    /// budget enforcement entirely.
    pub thinking_budget: Option<usize>,
}

/// A reranked document reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedDoc {
    /// Index into the input document list.
    pub index: usize,
    pub score: f32,
}

/// A classification label for one input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

/// A named entity extracted from one input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub kind: String,
    pub score: f32,
}

/// Result of fitting a detector model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub samples: usize,
    /// Where the model was persisted, when autosave was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Family traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text-generation backend (transformer or quantized format).
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    /// Idempotent; sets the internal ready flag.
    async fn load(&self) -> Result<()>;
    /// Idempotent; releases device/host memory and closes files.  Safe to
    /// call after a failed `load`.
    async fn unload(&self) -> Result<()>;
    async fn generate(&self, messages: &[ChatMessage], opts: &GenerateOptions)
        -> Result<String>;
    fn generate_stream(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> BoxStream<'static, Result<TokenChunk>>;
}

/// Embedding / reranking / classification backend.
#[async_trait]
pub trait EncoderBackend: Send + Sync {
    async fn load(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    async fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>>;
    async fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<RankedDoc>>;
    async fn classify(&self, texts: &[String]) -> Result<Vec<Classification>>;
    async fn extract_entities(&self, texts: &[String]) -> Result<Vec<Vec<Entity>>>;
}

/// Speech backend: transcription and synthesis over raw PCM.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn load(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    /// Transcribe 16-bit mono PCM at the given sample rate.
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<String>;
    /// Synthesize speech; returns 16-bit mono PCM.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Vision backend: per-frame inference for streaming sessions.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn load(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    async fn infer_frame(
        &self,
        frame: &[u8],
        config: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Detector backend shared by the anomaly / drift / timeseries / adtk
/// families.
#[async_trait]
pub trait DetectorBackend: Send + Sync {
    async fn load(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    /// Fit on rows of feature vectors.  When `autosave` names a path, the
    /// model and all side files must be durably persisted before this
    /// returns success — partial persistence is a failure.
    async fn fit(
        &self,
        data: &[Vec<f64>],
        params: &serde_json::Value,
        autosave: Option<&Path>,
    ) -> Result<FitReport>;
    async fn score(&self, data: &[Vec<f64>]) -> Result<Vec<f64>>;
    async fn save(&self, path: &Path) -> Result<()>;
    async fn load_from(&self, path: &Path) -> Result<()>;
    async fn status(&self) -> Result<serde_json::Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A loaded model, tagged by family.
#[derive(Clone)]
pub enum ModelHandle {
    Language(Arc<dyn LanguageBackend>),
    Encoder(Arc<dyn EncoderBackend>),
    Speech(Arc<dyn SpeechBackend>),
    Vision(Arc<dyn VisionBackend>),
    Detector(Arc<dyn DetectorBackend>),
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelHandle::Language(_) => write!(f, "ModelHandle::Language(..)"),
            ModelHandle::Encoder(_) => write!(f, "ModelHandle::Encoder(..)"),
            ModelHandle::Speech(_) => write!(f, "ModelHandle::Speech(..)"),
            ModelHandle::Vision(_) => write!(f, "ModelHandle::Vision(..)"),
            ModelHandle::Detector(_) => write!(f, "ModelHandle::Detector(..)"),
        }
    }
}

impl ModelHandle {
    /// Release the backend's resources.
    pub async fn unload(&self) -> Result<()> {
        match self {
            ModelHandle::Language(b) => b.unload().await,
            ModelHandle::Encoder(b) => b.unload().await,
            ModelHandle::Speech(b) => b.unload().await,
            ModelHandle::Vision(b) => b.unload().await,
            ModelHandle::Detector(b) => b.unload().await,
        }
    }

    pub fn as_language(&self) -> Result<&Arc<dyn LanguageBackend>> {
        match self {
            ModelHandle::Language(b) => Ok(b),
            _ => Err(Error::InvalidArgument(
                "model is not a language model".into(),
            )),
        }
    }

    pub fn as_encoder(&self) -> Result<&Arc<dyn EncoderBackend>> {
        match self {
            ModelHandle::Encoder(b) => Ok(b),
            _ => Err(Error::InvalidArgument("model is not an encoder".into())),
        }
    }

    pub fn as_speech(&self) -> Result<&Arc<dyn SpeechBackend>> {
        match self {
            ModelHandle::Speech(b) => Ok(b),
            _ => Err(Error::InvalidArgument("model is not a speech model".into())),
        }
    }

    pub fn as_detector(&self) -> Result<&Arc<dyn DetectorBackend>> {
        match self {
            ModelHandle::Detector(b) => Ok(b),
            _ => Err(Error::InvalidArgument("model is not a detector".into())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a factory needs to construct and load one backend instance.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub identity: ModelIdentity,
    pub context_window: Option<i64>,
    /// Normalization mode for encoders, when applicable.
    pub normalize: Option<String>,
    pub settings: Option<serde_json::Value>,
}

impl LoadSpec {
    pub fn new(identity: ModelIdentity) -> Self {
        Self {
            identity,
            context_window: None,
            normalize: None,
            settings: None,
        }
    }

    /// Validate load-time constraints shared by all factories.
    pub fn validate(&self) -> Result<()> {
        if let Some(ctx) = self.context_window {
            if ctx <= 0 {
                return Err(Error::InvalidArgument(format!(
                    "context window must be positive (got {ctx})"
                )));
            }
        }
        Ok(())
    }
}

/// Constructs and loads backends.  Implementations are injected into the
/// server state; this crate ships none.
///
/// Factories must never call back into the model cache for the key being
/// loaded — the cache holds the per-key load lock across this call.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn load(&self, spec: &LoadSpec) -> Result<ModelHandle>;
}

/// Family helper: which handle variant a family maps to, for diagnostics.
pub fn family_label(family: ModelFamily) -> &'static str {
    match family {
        ModelFamily::Language => "language",
        ModelFamily::Encoder => "encoder",
        ModelFamily::Speech => "speech",
        ModelFamily::Vision => "vision",
        ModelFamily::Anomaly | ModelFamily::Drift | ModelFamily::Timeseries | ModelFamily::Adtk => {
            "detector"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_spec_rejects_non_positive_context() {
        let ident = ModelIdentity::parse(ModelFamily::Language, "m");
        let mut spec = LoadSpec::new(ident);
        spec.context_window = Some(0);
        assert!(spec.validate().is_err());
        spec.context_window = Some(-5);
        assert!(spec.validate().is_err());
        spec.context_window = Some(2048);
        assert!(spec.validate().is_ok());
        spec.context_window = None;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn detector_families_share_label() {
        assert_eq!(family_label(ModelFamily::Anomaly), "detector");
        assert_eq!(family_label(ModelFamily::Adtk), "detector");
        assert_eq!(family_label(ModelFamily::Language), "language");
    }
}
