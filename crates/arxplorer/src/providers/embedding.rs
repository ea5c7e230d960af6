//! Embedding provider trait

use async_trait::async_trait;

use crate::error::Result;

/// One embedding from a batch response, tagged with the index of the input
/// it belongs to. Providers are not required to preserve request order.
#[derive(Debug, Clone)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Trait for batch text embedding
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts in one call.
    ///
    /// Callers must re-sort the response by `index` before assuming
    /// alignment with the input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
