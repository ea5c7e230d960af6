//! Configuration for the ingestion, indexing, and cache layers

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XplorerConfig {
    /// Paper source configuration
    #[serde(default)]
    pub source: SourceConfig,
    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Cache tier configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

impl XplorerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Paper source (arXiv) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the export endpoint
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://export.arxiv.org".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding API
    pub base_url: String,
    /// Model name sent with every batch
    pub model: String,
    /// Target dimension for SVD compression; `None` keeps full vectors
    #[serde(default = "default_compress_dim")]
    pub compress_dim: Option<usize>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

fn default_compress_dim() -> Option<usize> {
    Some(384)
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-ada-002".to_string(),
            compress_dim: Some(384),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in words
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in words
    pub overlap: usize,
    /// Minimum words in a trailing chunk before it is merged into the previous one
    pub min_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250,
            overlap: 15,
            min_len: 50,
        }
    }
}

/// Cache tier configuration
///
/// Capacities vary widely between deployments, so every limit is
/// configuration rather than a fixed contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries in the in-process record tier
    pub memory_limit: usize,
    /// Maximum entries in the persistent document tier
    pub persistent_limit: usize,
    /// Probability that a persistent-tier read refreshes the entry timestamp
    pub refresh_probability: f64,
    /// Path of the persistent document store database
    pub db_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit: 15,
            persistent_limit: 10_000,
            refresh_probability: 0.1,
            db_path: PathBuf::from("papers.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = XplorerConfig::default();
        assert_eq!(config.chunking.chunk_size, 250);
        assert_eq!(config.chunking.overlap, 15);
        assert_eq!(config.cache.memory_limit, 15);
        assert_eq!(config.embedding.compress_dim, Some(384));
    }

    #[test]
    fn test_partial_toml() {
        let config: XplorerConfig = toml::from_str(
            r#"
            [chunking]
            chunk_size = 100
            overlap = 10
            min_len = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 100);
        assert_eq!(config.cache.persistent_limit, 10_000);
    }
}
