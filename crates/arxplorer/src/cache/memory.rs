//! Bounded in-process cache tier with synchronous LRU eviction

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::retrieval::VectorIndex;
use crate::types::PaperRecord;

struct Entry {
    record: PaperRecord,
    last_access: u64,
}

struct Inner {
    records: HashMap<String, Entry>,
    /// Chunk-index tier; entries live and die with their records
    indices: HashMap<String, Arc<VectorIndex>>,
    /// Monotonic access counter; avoids clock-resolution ties
    clock: u64,
}

/// In-process record and chunk-index tier
pub struct MemoryTier {
    limit: usize,
    inner: Mutex<Inner>,
}

impl MemoryTier {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                indices: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Fetch a record, refreshing its access time
    pub fn get(&self, paper_id: &str) -> Option<PaperRecord> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.records.get_mut(paper_id)?;
        entry.last_access = clock;
        Some(entry.record.clone())
    }

    /// Insert a record, then evict synchronously if over capacity
    pub fn insert(&self, paper_id: &str, record: PaperRecord) {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.records.insert(
            paper_id.to_string(),
            Entry {
                record,
                last_access: clock,
            },
        );
        Self::evict(&mut inner, self.limit);
    }

    pub fn get_index(&self, paper_id: &str) -> Option<Arc<VectorIndex>> {
        self.inner.lock().indices.get(paper_id).cloned()
    }

    pub fn insert_index(&self, paper_id: &str, index: Arc<VectorIndex>) {
        self.inner.lock().indices.insert(paper_id.to_string(), index);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, paper_id: &str) -> bool {
        self.inner.lock().records.contains_key(paper_id)
    }

    /// Delete the oldest-by-last-access entries until at capacity, cascading
    /// to the index tier
    fn evict(inner: &mut Inner, limit: usize) {
        let excess = inner.records.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }

        let mut by_age: Vec<(String, u64)> = inner
            .records
            .iter()
            .map(|(id, entry)| (id.clone(), entry.last_access))
            .collect();
        by_age.sort_by_key(|(_, access)| *access);

        for (id, _) in by_age.into_iter().take(excess) {
            inner.records.remove(&id);
            inner.indices.remove(&id);
            tracing::debug!("Evicted '{}' from in-process tier", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, Section};
    use std::collections::BTreeMap;

    fn record(id: &str) -> PaperRecord {
        let doc = Document::new(Some("T".to_string()), Section::new("T", "body"), BTreeMap::new());
        PaperRecord::new(id, "T", "2024-01-01", "A", "abs", doc)
    }

    #[test]
    fn test_capacity_law() {
        let tier = MemoryTier::new(3);
        for i in 0..5 {
            tier.insert(&format!("p{i}"), record(&format!("p{i}")));
        }

        // Exactly C items survive, and they are the most recently accessed
        assert_eq!(tier.len(), 3);
        assert!(!tier.contains("p0"));
        assert!(!tier.contains("p1"));
        for i in 2..5 {
            assert!(tier.contains(&format!("p{i}")));
        }
    }

    #[test]
    fn test_get_refreshes_recency() {
        let tier = MemoryTier::new(2);
        tier.insert("a", record("a"));
        tier.insert("b", record("b"));

        // Touch "a" so "b" becomes the eviction victim
        tier.get("a").unwrap();
        tier.insert("c", record("c"));

        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[test]
    fn test_index_evicted_with_record() {
        let tier = MemoryTier::new(1);
        tier.insert("a", record("a"));
        tier.insert_index(
            "a",
            Arc::new(
                VectorIndex::from_parts(Vec::new(), ndarray::Array2::zeros((0, 0)), None).unwrap(),
            ),
        );

        tier.insert("b", record("b"));
        assert!(tier.get_index("a").is_none());
    }
}
