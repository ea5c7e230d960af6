//! Core domain types: the hierarchical document model and cached paper records

pub mod document;
pub mod record;

pub use document::{Document, Figure, Section, SizeHint, UNKNOWN_CITATION};
pub use record::{PaperMetadata, PaperRecord};
