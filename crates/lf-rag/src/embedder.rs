//! Embedder contract and the encoder-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;

use lf_domain::Result;
use lf_models::adapter::EncoderBackend;

/// Produces vectors for texts.  Implementations batch internally.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving order.  An empty input returns an
    /// empty output without touching the backend.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Expected vector dimension, when known.
    fn dimension(&self) -> Option<usize>;
}

/// Embedder backed by a shared encoder model from the model cache.
pub struct EncoderEmbedder {
    backend: Arc<dyn EncoderBackend>,
    normalize: bool,
    batch_size: usize,
    dimension: Option<usize>,
}

impl EncoderEmbedder {
    pub fn new(
        backend: Arc<dyn EncoderBackend>,
        normalize: bool,
        batch_size: usize,
        dimension: Option<usize>,
    ) -> Self {
        Self {
            backend,
            normalize,
            batch_size: batch_size.max(1),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for EncoderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.backend.embed(batch, self.normalize).await?;
            out.extend(vectors);
        }
        Ok(out)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
