//! arxplorer: scholarly paper ingestion, indexing, and caching
//!
//! Ingests papers from LaTeX source or PDF, normalizes them into one
//! hierarchical document model, indexes chunked content for semantic
//! retrieval, and serves records through a multi-tier cache that trades
//! persistence cost against latency.

pub mod cache;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod providers;
pub mod retrieval;
pub mod storage;
pub mod types;

pub use cache::PaperCache;
pub use config::XplorerConfig;
pub use error::{Error, Result};
pub use ingestion::{build_document, IngestPipeline, PaperInput};
pub use retrieval::VectorIndex;
pub use types::{Document, Figure, PaperMetadata, PaperRecord, Section};
