//! Cached paper records and their metadata summaries

use serde::{Deserialize, Serialize};

use crate::types::Document;

/// The unit stored and evicted by the multi-tier cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Source identifier (arXiv id)
    pub id: String,
    pub title: String,
    /// Publication date, `YYYY-MM-DD`
    pub date: String,
    /// Comma-separated author list
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Rendered table of contents, snapshotted at build time
    pub table_of_contents: String,
    pub can_read_citation: bool,
    pub document: Document,
}

impl PaperRecord {
    /// Assemble a record from fetched metadata and a built document.
    ///
    /// The table of contents and citation capability are snapshotted here so
    /// metadata reads never have to touch the tree.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        date: impl Into<String>,
        authors: impl Into<String>,
        abstract_text: impl Into<String>,
        document: Document,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            date: date.into(),
            authors: authors.into(),
            abstract_text: abstract_text.into(),
            table_of_contents: document.table_of_contents(),
            can_read_citation: document.has_bibliography,
            document,
        }
    }

    /// Summary view for metadata readers
    pub fn metadata(&self, show_abstract: bool) -> PaperMetadata {
        PaperMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            date: self.date.clone(),
            authors: self.authors.clone(),
            abstract_text: show_abstract.then(|| self.abstract_text.clone()),
            table_of_contents: self.table_of_contents.clone(),
            can_read_citation: self.can_read_citation,
            num_figures: self.document.figures.len(),
        }
    }
}

/// Partial paper details surfaced without the document body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub id: String,
    pub title: String,
    pub date: String,
    pub authors: String,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    pub table_of_contents: String,
    pub can_read_citation: bool,
    pub num_figures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Section;
    use std::collections::BTreeMap;

    #[test]
    fn test_metadata_snapshot() {
        let root = Section::with_subsections(
            "T",
            "one two three",
            vec![Section::new("Intro", "one two three")],
        );
        let doc = Document::new(Some("T".to_string()), root, BTreeMap::new());
        let record = PaperRecord::new("2401.00001", "T", "2024-01-01", "A. Author", "abs", doc);

        assert!(record.table_of_contents.contains("1. Intro"));
        assert!(!record.can_read_citation);

        let meta = record.metadata(false);
        assert!(meta.abstract_text.is_none());
        assert_eq!(meta.num_figures, 0);

        let meta = record.metadata(true);
        assert_eq!(meta.abstract_text.as_deref(), Some("abs"));
    }
}
