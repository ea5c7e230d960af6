//! Large-value store trait for serialized vector indices

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the durable large-value tier.
///
/// Holds only the string-framed vector index payload, which exceeds the
/// per-value size limit of the document tier.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Fetch a serialized index payload
    async fn get(&self, paper_id: &str) -> Result<Option<String>>;

    /// Store a serialized index payload
    async fn set(&self, paper_id: &str, payload: &str) -> Result<()>;

    /// Delete an entry; deleting an absent entry is not an error
    async fn delete(&self, paper_id: &str) -> Result<()>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
