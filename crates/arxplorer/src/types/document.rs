//! Hierarchical document model built from LaTeX source or PDF outlines

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retrieval::VectorIndex;

/// Sentinel returned for citation keys missing from the bibliography, so
/// downstream formatting never has to branch on a lookup failure.
pub const UNKNOWN_CITATION: &str = "Unknown citation.";

/// Size hints captured from the figure source (e.g. `\includegraphics` options)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A figure attached to a section
///
/// `sources` holds pre-resolution locators (archive member names for LaTeX
/// papers, image object names for PDFs). A deferred resolution step replaces
/// them with public `urls`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Figure {
    /// Label unique within a document
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Owning section title, set once when figures are collected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<SizeHint>,
}

impl Figure {
    /// True when the figure still points at unresolved source locators
    pub fn needs_resolution(&self) -> bool {
        self.urls.is_empty() && !self.sources.is_empty()
    }
}

/// A titled span of content with ordered subsections and associated figures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsections: Vec<Section>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub figures: BTreeMap<String, Figure>,
}

impl Section {
    /// Create a leaf section
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            subsections: Vec::new(),
            figures: BTreeMap::new(),
        }
    }

    /// Create a section with subsections
    pub fn with_subsections(
        title: impl Into<String>,
        content: impl Into<String>,
        subsections: Vec<Section>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            subsections,
            figures: BTreeMap::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    pub fn figure_count(&self) -> usize {
        self.figures.len()
    }
}

/// One line of the flattened section listing, paired with its section
pub(crate) struct TocLine<'a> {
    pub line: String,
    pub section: &'a Section,
}

/// Walk a section list in document order, producing indented, numbered lines.
///
/// `prefix` carries the hierarchical numbering of the parent ("1.2."), so a
/// child at position 0 renders as "1.2.1.".
fn flatten_into<'a>(
    sections: &'a [Section],
    level: usize,
    prefix: &str,
    show_words: bool,
    show_figures: bool,
    out: &mut Vec<TocLine<'a>>,
) {
    for (i, section) in sections.iter().enumerate() {
        let number = format!("{}{}.", prefix, i + 1);
        let indent = "  ".repeat(level);

        let mut info = Vec::new();
        if show_words {
            info.push(format!("{} words", section.word_count()));
        }
        let figures = section.figure_count();
        if show_figures && figures > 0 {
            info.push(format!(
                "{} figure{}",
                figures,
                if figures > 1 { "s" } else { "" }
            ));
        }
        let info = if info.is_empty() {
            String::new()
        } else {
            format!(" ({})", info.join(", "))
        };

        out.push(TocLine {
            line: format!("{}{} {}{}", indent, number, section.title, info),
            section,
        });

        if !section.subsections.is_empty() {
            flatten_into(
                &section.subsections,
                level + 1,
                &number,
                show_words,
                show_figures,
                out,
            );
        }
    }
}

/// Normalized hierarchical representation of one paper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub root: Section,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bibliography: BTreeMap<String, String>,
    /// Document-level figure registry collected from the section tree
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub figures: BTreeMap<String, Figure>,
    /// Capability flags, computed once at construction
    pub has_toc: bool,
    pub has_bibliography: bool,
    /// Lazily attached chunk index; cached separately because of per-value
    /// size limits on some store tiers
    #[serde(skip)]
    pub index: Option<Arc<VectorIndex>>,
}

impl Document {
    /// Assemble a document from a built section tree and bibliography.
    ///
    /// Capability flags are derived here and never recomputed; the figure
    /// registry is collected and each figure's owning section title stamped.
    pub fn new(
        title: Option<String>,
        root: Section,
        bibliography: BTreeMap<String, String>,
    ) -> Self {
        let has_toc = !root.subsections.is_empty();
        let has_bibliography = !bibliography.is_empty();
        let figures = Self::collect_figures(&root);

        Self {
            title: title.unwrap_or_else(|| "Unknown Title.".to_string()),
            root,
            bibliography,
            figures,
            has_toc,
            has_bibliography,
            index: None,
        }
    }

    /// Gather every section's figures into one registry, stamping the owning
    /// section title on each record (set once, used for search-result grouping).
    fn collect_figures(root: &Section) -> BTreeMap<String, Figure> {
        let mut lines = Vec::new();
        flatten_into(&root.subsections, 0, "", false, false, &mut lines);

        let mut figures = BTreeMap::new();
        for entry in lines {
            for (label, figure) in &entry.section.figures {
                let mut figure = figure.clone();
                if figure.section.is_none() {
                    figure.section = Some(entry.line.trim().to_string());
                }
                figures.insert(label.clone(), figure);
            }
        }
        figures
    }

    /// Index into the subsection tree by a path of 0-based indices.
    ///
    /// An empty path returns the root section.
    pub fn section(&self, path: &[usize]) -> Result<&Section> {
        let mut current = &self.root;
        for (depth, &index) in path.iter().enumerate() {
            current = current
                .subsections
                .get(index)
                .ok_or_else(|| Error::SectionNotFound {
                    path: path.to_vec(),
                    segment: depth,
                })?;
        }
        Ok(current)
    }

    /// Render the table of contents, one line per section, indented by depth
    /// and annotated with word and figure counts.
    pub fn table_of_contents(&self) -> String {
        let mut lines = Vec::new();
        flatten_into(&self.root.subsections, 0, "", true, true, &mut lines);
        lines
            .into_iter()
            .map(|entry| entry.line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up a citation by key.
    ///
    /// Missing keys return the fixed sentinel; documents without a
    /// bibliography fail with a typed error instead of silently degrading.
    pub fn citation(&self, key: &str) -> Result<String> {
        if !self.has_bibliography {
            return Err(Error::CapabilityUnavailable(
                "document has no bibliography".to_string(),
            ));
        }
        Ok(self
            .bibliography
            .get(key)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_CITATION.to_string()))
    }

    /// Full document content for "read whole document" use cases
    pub fn content(&self) -> &str {
        &self.root.content
    }

    /// Flattened (title line, section) pairs covering the root and every
    /// subsection, used for chunking and figure collection.
    pub(crate) fn flat_sections(&self) -> Vec<(String, &Section)> {
        let mut out = vec![(self.title.clone(), &self.root)];
        let mut lines = Vec::new();
        flatten_into(&self.root.subsections, 0, "", false, false, &mut lines);
        out.extend(
            lines
                .into_iter()
                .map(|entry| (entry.line, entry.section)),
        );
        out
    }

    /// Serialize to bytes for the persistent document tier
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Reconstruct a document from serialized bytes.
    ///
    /// Plain factory function; the deserialized value is indistinguishable
    /// from a freshly built one except for the detached index.
    pub fn deserialize(bytes: &[u8]) -> Result<Document> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
