//! Provider abstractions for every external collaborator
//!
//! Trait seams keep the core independent of concrete services: the paper
//! source, the embedding provider, the three durable store tiers, and the
//! image conversion collaborator all arrive as injected trait objects.

pub mod blob_store;
pub mod embedding;
pub mod images;
pub mod index_store;
pub mod local;
pub mod openai;
pub mod record_store;
pub mod source;

pub use blob_store::BlobStore;
pub use embedding::{EmbeddingProvider, IndexedEmbedding};
pub use images::ImageConverter;
pub use index_store::IndexStore;
pub use openai::OpenAiEmbedder;
pub use record_store::RecordStore;
pub use source::{ArxivSource, PaperDetails, SourceProvider};

/// Path-safe form of a paper id: forward slashes and dots become underscores
pub fn sanitize_id(id: &str) -> String {
    id.replace(['/', '.'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("1706.03762"), "1706_03762");
        assert_eq!(sanitize_id("hep-th/9901001"), "hep-th_9901001");
    }
}
