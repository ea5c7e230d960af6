//! Persistent document store trait

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Figure, PaperRecord};

/// Trait for the durable paper-record tier.
///
/// Implementations own the server-assigned last-access timestamp: `set`
/// stamps it, and `get` may refresh it with a small sampled probability to
/// bound write amplification while still approximating LRU order.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record, or `None` when absent
    async fn get(&self, paper_id: &str) -> Result<Option<PaperRecord>>;

    /// Whole-record upsert with a fresh timestamp
    async fn set(&self, record: &PaperRecord) -> Result<()>;

    /// Rewrite only the stored figure registry of an existing record.
    ///
    /// A narrow partial update: figure URL resolution must not pay for a
    /// full record rewrite. Missing records are ignored.
    async fn update_figures(&self, paper_id: &str, figures: &BTreeMap<String, Figure>)
        -> Result<()>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;

    /// Delete the oldest-by-timestamp entries beyond `limit`, returning the
    /// paper ids that were removed so callers can cascade.
    async fn delete_oldest(&self, limit: usize) -> Result<Vec<String>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
