//! Error types for the paper ingestion and caching system

use serde_json::json;
use thiserror::Error;

/// Result type alias for arxplorer operations
pub type Result<T> = std::result::Result<T, Error>;

/// System errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No resolvable source exists for the given paper id
    #[error("Paper not found: {0}")]
    NotFound(String),

    /// A builder produced no usable document tree
    #[error("Failed to parse paper '{paper_id}': {message}")]
    ParseFailure { paper_id: String, message: String },

    /// An external provider exhausted its retries
    #[error("Provider failure: {0}")]
    Provider(String),

    /// The requested capability is not available on this document
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A subsection path pointed outside the tree
    #[error("No section at path {path:?} (failed at segment {segment})")]
    SectionNotFound { path: Vec<usize>, segment: usize },

    /// Store tier error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a parse failure error
    pub fn parse_failure(paper_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseFailure {
            paper_id: paper_id.into(),
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable error type tag used in the boundary payload
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::NotFound(_) => "not_found",
            Error::ParseFailure { .. } => "parse_error",
            Error::Provider(_) => "provider_error",
            Error::CapabilityUnavailable(_) => "capability_unavailable",
            Error::SectionNotFound { .. } => "section_not_found",
            Error::Store(_) => "store_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Structured payload surfaced at the service boundary instead of a raw trace
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        })
    }
}
