//! PDF document builder
//!
//! Rebuilds the section hierarchy from a flat, level-tagged outline by
//! locating each heading in the extracted text and recursing into the body
//! captured between a heading and its next sibling.

use std::collections::{BTreeMap, HashMap};

use regex::RegexBuilder;

use crate::error::{Error, Result};
use crate::types::{Document, Figure, Section};

/// One outline (bookmark) entry: nesting level, title, source page
#[derive(Debug, Clone)]
pub struct OutlineEntry {
    pub level: u32,
    pub title: String,
    pub page: Option<u32>,
}

/// Extracted PDF content handed to the builder
#[derive(Debug, Default)]
pub struct PdfInput {
    /// Full extracted text
    pub text: String,
    /// Title from document metadata, if any
    pub title: Option<String>,
    /// Flat outline; empty when the PDF carries no bookmarks
    pub outline: Vec<OutlineEntry>,
    /// Images found per page, attached to sections by source page
    pub figures_by_page: HashMap<u32, Vec<Figure>>,
}

/// Builds documents from extracted PDF text and outlines
#[derive(Debug, Default)]
pub struct PdfBuilder;

impl PdfBuilder {
    /// Build a document. PDFs never carry a usable bibliography, so the
    /// citation capability is always absent for this format.
    pub fn build(&self, mut input: PdfInput, title: Option<String>) -> Result<Document> {
        if input.text.trim().is_empty() && input.outline.is_empty() {
            return Err(Error::internal("empty outline and no text"));
        }

        let title = title.or(input.title.take());

        let mut root = Section {
            title: title.clone().unwrap_or_else(|| "Unknown Title.".to_string()),
            content: input.text.clone(),
            subsections: Vec::new(),
            figures: BTreeMap::new(),
        };

        if !input.outline.is_empty() {
            let entries: Vec<OutlineEntry> = input
                .outline
                .iter()
                .map(|e| OutlineEntry {
                    level: e.level,
                    title: clean_title(&e.title),
                    page: e.page,
                })
                .collect();
            root.subsections =
                unflatten_sections(&input.text, &entries, &mut input.figures_by_page);
        }

        Ok(Document::new(title, root, BTreeMap::new()))
    }
}

/// Strip a leading numbering token ("3.", "2.1", "A.", "B.2.") so the title
/// can anchor a text search.
pub fn clean_title(title: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"^\s*(?:\d+(\.\d*)*\.?|[a-zA-Z\d\.]+\s+)\s*")
            .expect("valid title-cleaning pattern")
    });
    re.replace(title, "").trim().to_string()
}

/// Locate the body of `start` in `text`: everything from the line beginning
/// with (optional numbering +) the title up to the next sibling's title, or
/// the end of the text when there is no next sibling.
fn fetch_content(text: &str, start: &str, end: Option<&str>) -> Option<String> {
    let mut pattern = format!(
        r"(?:^|\n)\s*(?:[A-Z\d\.]+\s*)?(?:\d+(?:\.\d*)*\s*)?{}\s*\n+([\s\S]+?)",
        regex::escape(start)
    );
    match end {
        Some(end) => pattern.push_str(&format!(
            r"\n+\s*(?:[A-Z\d\.]+\s*)?(?:\d+(?:\.\d*)*\s*)?{}",
            regex::escape(end)
        )),
        None => pattern.push('$'),
    }

    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Rebuild the section tree from the flat outline.
///
/// An explicit cursor walks the entry list: each position starts a node,
/// greedily collects the contiguous run of strictly-deeper entries as its
/// descendants, and recurses into the run with the node's captured body as
/// the new search text. Nodes whose body cannot be located are dropped,
/// unless figures are attached to their source page, in which case an
/// empty-bodied node carrying those figures is still emitted.
pub fn unflatten_sections(
    text: &str,
    entries: &[OutlineEntry],
    figures_by_page: &mut HashMap<u32, Vec<Figure>>,
) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut i = 0;

    while i < entries.len() {
        let entry = &entries[i];

        let mut run_len = 0;
        for next in &entries[i + 1..] {
            if next.level <= entry.level {
                break;
            }
            run_len += 1;
        }
        let next_index = i + run_len + 1;
        let next_title = entries.get(next_index).map(|e| e.title.as_str());

        let body = fetch_content(text, &entry.title, next_title);

        // Figures attach by source page, not textual proximity
        let mut section_figures = BTreeMap::new();
        if let Some(page) = entry.page {
            if let Some(figures) = figures_by_page.remove(&page) {
                for figure in figures {
                    section_figures.insert(figure.label.clone(), figure);
                }
            }
        }

        let descendants = &entries[i + 1..next_index];
        match body {
            Some(body) => {
                let subsections = unflatten_sections(&body, descendants, figures_by_page);
                sections.push(Section {
                    title: entry.title.trim().to_string(),
                    content: body,
                    subsections,
                    figures: section_figures,
                });
            }
            None if !section_figures.is_empty() => {
                let subsections = unflatten_sections("", descendants, figures_by_page);
                sections.push(Section {
                    title: entry.title.trim().to_string(),
                    content: String::new(),
                    subsections,
                    figures: section_figures,
                });
            }
            None => {
                tracing::debug!("Dropping outline entry '{}': no matching body", entry.title);
            }
        }

        i = next_index;
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: u32, title: &str) -> OutlineEntry {
        OutlineEntry {
            level,
            title: title.to_string(),
            page: None,
        }
    }

    #[test]
    fn test_clean_title_numbering() {
        assert_eq!(clean_title("3. Results"), "Results");
        assert_eq!(clean_title("2.1 Background"), "Background");
        assert_eq!(clean_title("A. Appendix"), "Appendix");
        assert_eq!(clean_title("B.2. Details"), "Details");
        assert_eq!(clean_title("Introduction"), "Introduction");
    }

    #[test]
    fn test_unflatten_basic_hierarchy() {
        let text = "preamble\n\n1 Intro\nintro body text\n\n1.1 Background\nbackground body\n\n2 Results\nresults body\n";
        let outline = vec![entry(1, "Intro"), entry(2, "Background"), entry(1, "Results")];
        let mut figures = HashMap::new();

        let sections = unflatten_sections(text, &outline, &mut figures);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Intro");
        assert_eq!(sections[1].title, "Results");
        assert_eq!(sections[0].subsections.len(), 1);
        assert_eq!(sections[0].subsections[0].title, "Background");
        assert!(sections[0].subsections[0].content.contains("background body"));
    }

    #[test]
    fn test_unlocatable_entry_dropped() {
        let text = "1 Intro\nintro body\n\n2 Results\nresults body\n";
        let outline = vec![entry(1, "Intro"), entry(1, "Ghost Section"), entry(1, "Results")];
        let mut figures = HashMap::new();

        let sections = unflatten_sections(text, &outline, &mut figures);
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert!(!titles.contains(&"Ghost Section"));
    }

    #[test]
    fn test_unlocatable_entry_with_figures_kept() {
        let text = "1 Intro\nintro body\n";
        let outline = vec![
            entry(1, "Intro"),
            OutlineEntry {
                level: 1,
                title: "Ghost Section".to_string(),
                page: Some(4),
            },
        ];
        let mut figures = HashMap::new();
        figures.insert(
            4,
            vec![Figure {
                label: "Im1".to_string(),
                sources: vec!["Im1".to_string()],
                ..Default::default()
            }],
        );

        let sections = unflatten_sections(text, &outline, &mut figures);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "Ghost Section");
        assert!(sections[1].content.is_empty());
        assert_eq!(sections[1].figure_count(), 1);
    }

    #[test]
    fn test_build_without_outline() {
        let input = PdfInput {
            text: "just raw text".to_string(),
            title: Some("Metadata Title".to_string()),
            ..Default::default()
        };
        let doc = PdfBuilder.build(input, None).unwrap();
        assert_eq!(doc.title, "Metadata Title");
        assert!(!doc.has_toc);
        assert!(!doc.has_bibliography);
        assert!(doc.citation("anything").is_err());
    }

    #[test]
    fn test_build_empty_input_fails() {
        let input = PdfInput::default();
        assert!(PdfBuilder.build(input, None).is_err());
    }

    #[test]
    fn test_numbered_headings_in_text() {
        // Outline titles come pre-cleaned, text keeps its numbering
        let text = "IV. Methodology\nwe do things\n\n5 Conclusion\nthe end\n";
        let outline = vec![entry(1, "Methodology"), entry(1, "Conclusion")];
        let mut figures = HashMap::new();

        let sections = unflatten_sections(text, &outline, &mut figures);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].content.contains("we do things"));
        assert!(sections[1].content.contains("the end"));
    }
}
