//! Multi-tier cache orchestrator
//!
//! Lookup order: in-process tier, persistent document store, full ingestion.
//! Writes go through every configured tier synchronously, so a `get`
//! immediately after a `set` observes the new value. The vector index rides
//! its own tiers because of per-value size limits on the document store.

pub mod figures;
pub mod memory;

use std::sync::Arc;

use crate::config::XplorerConfig;
use crate::error::{Error, Result};
use crate::ingestion::{chunk_tree, IngestPipeline};
use crate::providers::images::PassthroughConverter;
use crate::providers::{
    sanitize_id, BlobStore, EmbeddingProvider, ImageConverter, IndexStore, RecordStore,
};
use crate::retrieval::{deserialize_index, serialize_index, VectorIndex};
use crate::types::{Figure, PaperRecord};

use figures::FigureResolver;
use memory::MemoryTier;

/// The explicit context object owning cache tiers, store clients, and
/// configuration. Constructed once at process start and passed by reference.
pub struct PaperCache {
    config: XplorerConfig,
    memory: MemoryTier,
    pipeline: IngestPipeline,
    embedder: Arc<dyn EmbeddingProvider>,
    records: Option<Arc<dyn RecordStore>>,
    indices: Option<Arc<dyn IndexStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    converter: Arc<dyn ImageConverter>,
}

impl PaperCache {
    /// Create a cache with only the in-process tier configured
    pub fn new(
        config: XplorerConfig,
        pipeline: IngestPipeline,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let memory = MemoryTier::new(config.cache.memory_limit);
        Self {
            config,
            memory,
            pipeline,
            embedder,
            records: None,
            indices: None,
            blobs: None,
            converter: Arc::new(PassthroughConverter),
        }
    }

    /// Attach the persistent document tier
    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Attach the large-value tier for serialized vector indices
    pub fn with_index_store(mut self, indices: Arc<dyn IndexStore>) -> Self {
        self.indices = Some(indices);
        self
    }

    /// Attach the blob tier used for figure archives and resolved images
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Replace the image conversion collaborator
    pub fn with_image_converter(mut self, converter: Arc<dyn ImageConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Read a paper, ingesting it on a full miss.
    ///
    /// There is deliberately no per-id ingestion lock: two concurrent first
    /// reads of an uncached id may both run the pipeline and both write
    /// through. The work is wasted but the writes are idempotent
    /// last-write-wins upserts, so state stays consistent.
    pub async fn get(&self, paper_id: &str) -> Result<PaperRecord> {
        if let Some(record) = self.memory.get(paper_id) {
            return Ok(record);
        }

        if let Some(store) = &self.records {
            if let Some(record) = store.get(paper_id).await? {
                tracing::debug!("Persistent-tier hit for '{}'", paper_id);
                self.memory.insert(paper_id, record.clone());
                return Ok(record);
            }
        }

        tracing::info!("Full cache miss for '{}', running ingestion", paper_id);
        let record = self.pipeline.ingest(paper_id).await?;
        self.set(record.clone()).await?;
        Ok(record)
    }

    /// Write-through to the in-process and persistent tiers; an attached
    /// vector index also goes to the large-value tier.
    pub async fn set(&self, record: PaperRecord) -> Result<()> {
        if let (Some(index), Some(store)) = (&record.document.index, &self.indices) {
            store
                .set(&record.id, &serialize_index(index)?)
                .await?;
            self.memory.insert_index(&record.id, Arc::clone(index));
        }

        self.memory.insert(&record.id, record.clone());
        if let Some(store) = &self.records {
            store.set(&record).await?;
        }
        Ok(())
    }

    /// Read the paper's vector index, building it lazily on a full miss
    pub async fn get_vector_index(&self, paper_id: &str) -> Result<Arc<VectorIndex>> {
        if let Some(index) = self.memory.get_index(paper_id) {
            return Ok(index);
        }

        if let Some(store) = &self.indices {
            if let Some(payload) = store.get(paper_id).await? {
                let index = Arc::new(deserialize_index(&payload)?);
                self.memory.insert_index(paper_id, Arc::clone(&index));
                return Ok(index);
            }
        }

        let record = self.get(paper_id).await?;
        let chunks = chunk_tree(&record.document, &self.config.chunking);
        tracing::info!("Embedding {} chunks for '{}'", chunks.len(), paper_id);
        let index = Arc::new(
            VectorIndex::embed(
                self.embedder.as_ref(),
                chunks,
                self.config.embedding.compress_dim,
            )
            .await?,
        );

        self.memory.insert_index(paper_id, Arc::clone(&index));
        if let Some(store) = &self.indices {
            store.set(paper_id, &serialize_index(&index)?).await?;
        }
        Ok(index)
    }

    /// Semantic search over a paper's chunks
    pub async fn chunk_search(
        &self,
        paper_id: &str,
        query: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        let index = self.get_vector_index(paper_id).await?;
        index.search(self.embedder.as_ref(), query, count).await
    }

    /// Fetch figures by label, resolving source locators to URLs on demand.
    ///
    /// Resolution rewrites only the figure registry of the persistent
    /// record, not the whole record.
    pub async fn get_figures(&self, paper_id: &str, labels: &[String]) -> Result<Vec<Figure>> {
        let mut record = self.get(paper_id).await?;

        for label in labels {
            if !record.document.figures.contains_key(label) {
                return Err(Error::NotFound(format!(
                    "figure '{}' of paper '{}'",
                    label, paper_id
                )));
            }
        }

        let pending = labels.iter().any(|label| {
            record
                .document
                .figures
                .get(label)
                .map(|f| f.needs_resolution())
                .unwrap_or(false)
        });
        if pending {
            let blobs = self.blobs.as_ref().ok_or_else(|| {
                Error::CapabilityUnavailable("no blob tier configured for figures".to_string())
            })?;
            let resolver = FigureResolver::new(Arc::clone(blobs), Arc::clone(&self.converter));
            let updated = resolver
                .resolve(paper_id, &mut record.document.figures, labels)
                .await?;

            if updated {
                if let Some(store) = &self.records {
                    store
                        .update_figures(paper_id, &record.document.figures)
                        .await?;
                }
                self.memory.insert(paper_id, record.clone());
            }
        }

        Ok(labels
            .iter()
            .filter_map(|label| record.document.figures.get(label).cloned())
            .collect())
    }

    /// Evict the oldest entries of the persistent tier beyond its configured
    /// capacity, cascading to blob and large-value entries for each id.
    ///
    /// Invoked by a scheduled maintenance trigger. Concurrent deletion of
    /// the same id is tolerated: already-gone entries count as success.
    pub async fn sweep_persistent(&self) -> Result<usize> {
        let Some(store) = &self.records else {
            return Ok(0);
        };

        let deleted = store
            .delete_oldest(self.config.cache.persistent_limit)
            .await?;

        for paper_id in &deleted {
            let key = sanitize_id(paper_id);
            if let Some(blobs) = &self.blobs {
                if let Err(e) = blobs.delete_prefix(&format!("images/{key}/")).await {
                    tracing::warn!("Couldn't delete images for '{}': {}", paper_id, e);
                }
                if let Err(e) = blobs
                    .delete_prefix(&format!("papers/{key}_images."))
                    .await
                {
                    tracing::warn!("Couldn't delete archive for '{}': {}", paper_id, e);
                }
            }
            if let Some(indices) = &self.indices {
                if let Err(e) = indices.delete(paper_id).await {
                    tracing::warn!("Couldn't delete index for '{}': {}", paper_id, e);
                }
            }
        }

        if !deleted.is_empty() {
            tracing::info!("Evicted {} papers from the persistent tier", deleted.len());
        }
        Ok(deleted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::providers::embedding::IndexedEmbedding;
    use crate::providers::local::{LocalBlobStore, MemoryIndexStore};
    use crate::providers::source::{PaperDetails, SourceProvider};
    use crate::storage::SqliteRecordStore;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_TEX: &str = r"
\documentclass{article}
\begin{document}
\section{Introduction}
Opening content for the mock paper, useful for chunking tests.
\section{Methods}
Methods content with several distinctive words inside.
\end{document}
";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    struct CountingSource {
        ingest_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceProvider for CountingSource {
        async fn details(&self, paper_id: &str) -> Result<PaperDetails> {
            Ok(PaperDetails {
                id: paper_id.to_string(),
                title: "Cached Paper".to_string(),
                date: "2024-02-02".to_string(),
                authors: "A. Author".to_string(),
                abstract_text: "abs".to_string(),
            })
        }

        async fn download_source(&self, _paper_id: &str) -> Result<Vec<u8>> {
            self.ingest_calls.fetch_add(1, Ordering::SeqCst);
            Ok(gzip(SAMPLE_TEX.as_bytes()))
        }

        async fn download_pdf(&self, paper_id: &str) -> Result<Vec<u8>> {
            Err(Error::NotFound(paper_id.to_string()))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct HashEmbedder;

    #[async_trait]
    impl crate::providers::EmbeddingProvider for HashEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, text)| {
                    let mut v = vec![0.0f32; 8];
                    for (i, b) in text.bytes().enumerate() {
                        v[i % 8] += (b as f32) / 255.0;
                    }
                    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                    v.iter_mut().for_each(|x| *x /= norm);
                    IndexedEmbedding {
                        index,
                        embedding: v,
                    }
                })
                .collect())
        }

        fn name(&self) -> &str {
            "hash"
        }
    }

    fn test_config(memory_limit: usize, persistent_limit: usize) -> XplorerConfig {
        XplorerConfig {
            cache: CacheConfig {
                memory_limit,
                persistent_limit,
                refresh_probability: 0.0,
                db_path: "unused".into(),
            },
            ..Default::default()
        }
    }

    fn build_cache(
        memory_limit: usize,
        persistent_limit: usize,
        calls: Arc<AtomicUsize>,
    ) -> PaperCache {
        let source = Arc::new(CountingSource {
            ingest_calls: calls,
        });
        PaperCache::new(
            test_config(memory_limit, persistent_limit),
            IngestPipeline::new(source),
            Arc::new(HashEmbedder),
        )
    }

    #[tokio::test]
    async fn test_miss_ingests_then_hits_memory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = build_cache(5, 100, Arc::clone(&calls));

        let first = cache.get("2402.00001").await.unwrap();
        assert_eq!(first.title, "Cached Paper");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = cache.get("2402.00001").await.unwrap();
        assert_eq!(second.title, first.title);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second read must not re-ingest");
    }

    #[tokio::test]
    async fn test_write_through_to_persistent_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let records: Arc<SqliteRecordStore> =
            Arc::new(SqliteRecordStore::in_memory(0.0).unwrap());
        let cache =
            build_cache(5, 100, Arc::clone(&calls)).with_record_store(records.clone());

        cache.get("2402.00002").await.unwrap();

        // The record is observable in the store immediately after the set
        let stored = records.get("2402.00002").await.unwrap().unwrap();
        assert_eq!(stored.title, "Cached Paper");
    }

    #[tokio::test]
    async fn test_persistent_hit_populates_memory() {
        let calls = Arc::new(AtomicUsize::new(0));
        let records: Arc<SqliteRecordStore> =
            Arc::new(SqliteRecordStore::in_memory(0.0).unwrap());

        // Warm the persistent tier with one cache, read with a fresh one
        let warm = build_cache(5, 100, Arc::clone(&calls)).with_record_store(records.clone());
        warm.get("2402.00003").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let cold = build_cache(5, 100, Arc::clone(&calls)).with_record_store(records);
        cold.get("2402.00003").await.unwrap();
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "persistent hit must not re-ingest"
        );
        assert!(cold.memory.contains("2402.00003"));
    }

    #[tokio::test]
    async fn test_vector_index_lazy_build_and_tiering() {
        let calls = Arc::new(AtomicUsize::new(0));
        let indices = Arc::new(MemoryIndexStore::new());
        let cache = build_cache(5, 100, Arc::clone(&calls)).with_index_store(indices.clone());

        let index = cache.get_vector_index("2402.00004").await.unwrap();
        assert!(!index.is_empty());
        assert_eq!(index.chunks().len(), index.vectors().nrows());

        // The serialized payload landed in the large-value tier
        assert!(indices.get("2402.00004").await.unwrap().is_some());

        // A fresh cache sharing the tier deserializes instead of re-embedding
        let cold = build_cache(5, 100, Arc::clone(&calls)).with_index_store(indices);
        let restored = cold.get_vector_index("2402.00004").await.unwrap();
        assert_eq!(restored.chunks(), index.chunks());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "index hit must not re-ingest");
    }

    #[tokio::test]
    async fn test_chunk_search_end_to_end() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = build_cache(5, 100, calls);

        let results = cache
            .chunk_search("2402.00005", "distinctive words", 2)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
    }

    #[tokio::test]
    async fn test_sweep_cascades_to_other_tiers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let records: Arc<SqliteRecordStore> =
            Arc::new(SqliteRecordStore::in_memory(0.0).unwrap());
        let indices = Arc::new(MemoryIndexStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path()).unwrap());

        let cache = build_cache(10, 1, Arc::clone(&calls))
            .with_record_store(records.clone())
            .with_index_store(indices.clone())
            .with_blob_store(blobs.clone());

        // Two papers with blob and index entries; capacity is one
        for id in ["2402.00006", "2402.00007"] {
            cache.get(id).await.unwrap();
            cache.get_vector_index(id).await.unwrap();
            let key = sanitize_id(id);
            blobs
                .upload(&format!("images/{key}/fig.png"), b"img")
                .await
                .unwrap();
            blobs
                .upload(&format!("papers/{key}_images.zip"), b"zip")
                .await
                .unwrap();
        }

        let evicted = cache.sweep_persistent().await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(records.count().await.unwrap(), 1);

        // The oldest paper's blob and index entries are gone with it
        let key = sanitize_id("2402.00006");
        assert!(blobs.list(&format!("images/{key}/")).await.unwrap().is_empty());
        assert!(blobs
            .list(&format!("papers/{key}_images."))
            .await
            .unwrap()
            .is_empty());
        assert!(indices.get("2402.00006").await.unwrap().is_none());

        // The survivor keeps everything
        let survivor = sanitize_id("2402.00007");
        assert!(!blobs.list(&format!("images/{survivor}/")).await.unwrap().is_empty());
        assert!(indices.get("2402.00007").await.unwrap().is_some());

        // A second sweep finds nothing over capacity
        assert_eq!(cache.sweep_persistent().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_figure_label() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dir = tempfile::tempdir().unwrap();
        let cache = build_cache(5, 100, calls)
            .with_blob_store(Arc::new(LocalBlobStore::new(dir.path()).unwrap()));

        let err = cache
            .get_figures("2402.00008", &["nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
