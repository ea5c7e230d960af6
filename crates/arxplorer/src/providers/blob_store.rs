//! Blob store trait for packed image archives and resolved figures

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the durable blob tier.
///
/// One packed image archive per paper lives at a deterministic path, and
/// individually resolved PNGs under `images/<sanitized-id>/`. Prefix listing
/// and deletion support the eviction cascade.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes at a path
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Upload bytes and make them publicly readable (best effort),
    /// returning the public URL
    async fn upload_public(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Download bytes from a path
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// List paths under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete everything under a prefix; absent paths are not errors
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
