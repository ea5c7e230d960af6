//! LaTeX document builder
//!
//! Walks the parsed macro/element tree and produces the hierarchical
//! document model. One malformed macro never aborts the whole parse: each
//! node renders independently and degrades to its raw text on failure.

pub mod encoder;
pub mod nodes;
pub mod table;

use std::collections::BTreeMap;

pub use encoder::{default_registry, MacroRegistry, TextEncoder};
pub use nodes::{Element, EnvNode, MacroNode, SectionNode, TexNode};

use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::types::{Document, Figure, Section, SizeHint};

/// Environments rendered by macro-to-text encoding of their raw source,
/// preserving markup-sensitive content.
const VERBATIM_ENVIRONMENTS: &[&str] = &[
    "equation",
    "equation*",
    "math",
    "displaymath",
    "itemize",
    "enumerate",
    "align",
    "align*",
];

/// Builds documents from LaTeX source
pub struct LatexBuilder {
    encoder: TextEncoder,
}

/// Accumulator for one level of the tree walk
#[derive(Default)]
struct Walked {
    content: String,
    subsections: Vec<Section>,
    figures: BTreeMap<String, Figure>,
}

impl Default for LatexBuilder {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

impl LatexBuilder {
    /// Create a builder with an explicit macro-handler registry
    pub fn new(registry: MacroRegistry) -> Self {
        Self {
            encoder: TextEncoder::new(registry),
        }
    }

    /// Parse LaTeX source into a document.
    ///
    /// An externally supplied title takes precedence over `\title{...}`
    /// metadata found in the source.
    pub fn build(&self, source: &str, title: Option<String>) -> Result<Document> {
        let all_nodes = nodes::parse(source);
        let title = title.or_else(|| self.find_title(&all_nodes));

        let body = nodes::document_body(&all_nodes);
        let elements = nodes::sectionize(body);

        let mut bibliography = BTreeMap::new();
        let walked = self.build_content(&elements, &mut bibliography);

        let root = Section {
            title: title.clone().unwrap_or_else(|| "Unknown Title.".to_string()),
            content: walked.content,
            subsections: walked.subsections,
            figures: walked.figures,
        };

        Ok(Document::new(title, root, bibliography))
    }

    fn find_title(&self, all_nodes: &[TexNode]) -> Option<String> {
        fn search<'a>(nodes: &'a [TexNode]) -> Option<&'a MacroNode> {
            for node in nodes {
                match node {
                    TexNode::Macro(m) if m.name == "title" => return Some(m),
                    TexNode::Environment(env) => {
                        if let Some(found) = search(&env.children) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        let node = search(all_nodes)?;
        let title = self.encoder.encode(node.main_arg()?).trim().to_string();
        (!title.is_empty()).then_some(title)
    }

    /// Walk one element list, concatenating rendered text and collecting
    /// subsections, figures, and bibliography entries.
    fn build_content(
        &self,
        elements: &[Element],
        bibliography: &mut BTreeMap<String, String>,
    ) -> Walked {
        let mut out = Walked::default();

        for element in elements {
            match element {
                Element::Section(section) => self.render_section(section, bibliography, &mut out),
                Element::Node(node) => self.render_body_node(node, bibliography, &mut out),
            }
        }

        out
    }

    fn render_section(
        &self,
        section: &SectionNode,
        bibliography: &mut BTreeMap<String, String>,
        out: &mut Walked,
    ) {
        let title = self.encoder.encode(&section.title).trim().to_string();
        let inner = self.build_content(&section.children, bibliography);

        // Level-1 and level-2 headings are underlined in the running text
        let underline = match section.level {
            1 => format!("\n{}", "=".repeat(title.chars().count())),
            2 => format!("\n{}", "-".repeat(title.chars().count())),
            _ => String::new(),
        };
        out.content
            .push_str(&format!("\n\n{}{}\n{}", title, underline, inner.content));

        out.subsections.push(Section {
            title,
            content: inner.content,
            subsections: inner.subsections,
            figures: inner.figures,
        });
    }

    fn render_body_node(
        &self,
        node: &TexNode,
        bibliography: &mut BTreeMap<String, String>,
        out: &mut Walked,
    ) {
        match node {
            TexNode::Text(text) => out.content.push_str(text),
            TexNode::Macro(_) => out.content.push_str(&self.encoder.render_node(node)),
            TexNode::Environment(env) => self.render_environment(env, bibliography, out),
        }
    }

    fn render_environment(
        &self,
        env: &EnvNode,
        bibliography: &mut BTreeMap<String, String>,
        out: &mut Walked,
    ) {
        match env.name.as_str() {
            "thebibliography" => {
                let child_elements: Vec<Element> =
                    env.children.iter().cloned().map(Element::Node).collect();
                let mut scratch = BTreeMap::new();
                let inner = self.build_content(&child_elements, &mut scratch);
                self.collect_bibliography(&env.children, bibliography);

                out.content.push_str(&format!(
                    "\n\nReferences\n{}\n{}",
                    "=".repeat(10),
                    inner.content
                ));
                out.subsections
                    .push(Section::new("References", inner.content));
            }
            "table" | "table*" => {
                match table::parse_table(&self.encoder, &env.raw) {
                    Ok(rendered) => out.content.push_str(&format!("\n\n{rendered}\n\n")),
                    Err(err) => {
                        tracing::warn!("Failed to parse table: {}", err);
                        out.content
                            .push_str(&format!("\n\n{}\n\n", self.encoder.encode(&env.raw)));
                    }
                }
            }
            "figure" | "figure*" => {
                let figure = self.capture_figure(env);
                let placeholder = match &figure.caption {
                    Some(caption) => format!("<figure. {} - {}>", figure.label, caption),
                    None => format!("<figure. {}>", figure.label),
                };
                out.content.push_str(&placeholder);
                out.figures.insert(figure.label.clone(), figure);
            }
            name if VERBATIM_ENVIRONMENTS.contains(&name) => {
                out.content.push_str(&self.encoder.encode(&env.raw));
            }
            _ if !env.children.is_empty() => {
                // Nodes with children but no special kind splice into the caller
                let child_elements: Vec<Element> =
                    env.children.iter().cloned().map(Element::Node).collect();
                let inner = self.build_content(&child_elements, bibliography);
                out.content.push_str(&inner.content);
                out.subsections.extend(inner.subsections);
                out.figures.extend(inner.figures);
            }
            _ => out.content.push_str(&self.encoder.encode(&env.raw)),
        }
    }

    /// Key bibliography entries by their `\bibitem` id; each entry's text is
    /// everything rendered up to the next item.
    fn collect_bibliography(&self, children: &[TexNode], bibliography: &mut BTreeMap<String, String>) {
        let mut key: Option<String> = None;
        let mut buffer = String::new();

        for node in children {
            if let TexNode::Macro(m) = node {
                if m.name == "bibitem" {
                    if let Some(done) = key.take() {
                        bibliography.insert(done, buffer.trim().to_string());
                    }
                    buffer = String::new();
                    key = m.main_arg().map(|s| s.to_string());
                    continue;
                }
            }
            buffer.push_str(&self.encoder.render_node(node));
        }

        if let Some(done) = key {
            bibliography.insert(done, buffer.trim().to_string());
        }
    }

    /// Capture a figure environment: images, size hints, caption, label
    fn capture_figure(&self, env: &EnvNode) -> Figure {
        let mut sources = Vec::new();
        let mut sizes = Vec::new();
        let mut captions = Vec::new();
        let mut label = None;
        let mut image_stems = Vec::new();

        self.scan_figure_nodes(
            &env.children,
            &mut sources,
            &mut sizes,
            &mut captions,
            &mut label,
            &mut image_stems,
        );

        let label = label.unwrap_or_else(|| image_stems.join("_"));
        let caption = (!captions.is_empty()).then(|| captions.join("\n"));

        Figure {
            label,
            caption,
            section: None,
            sources,
            urls: Vec::new(),
            sizes,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_figure_nodes(
        &self,
        children: &[TexNode],
        sources: &mut Vec<String>,
        sizes: &mut Vec<SizeHint>,
        captions: &mut Vec<String>,
        label: &mut Option<String>,
        image_stems: &mut Vec<String>,
    ) {
        for node in children {
            match node {
                TexNode::Macro(m) => match m.name.as_str() {
                    "includegraphics" => {
                        if let Some(file) = m.main_arg() {
                            sources.push(file.to_string());
                            sizes.push(parse_size_hint(m.options.first().map(String::as_str)));
                            let stem = file
                                .rsplit('/')
                                .next()
                                .unwrap_or(file)
                                .rsplit_once('.')
                                .map(|(stem, _)| stem.to_string())
                                .unwrap_or_else(|| file.to_string());
                            image_stems.push(stem);
                        }
                    }
                    "caption" => {
                        if let Some(arg) = m.main_arg() {
                            captions.push(self.encoder.encode(arg).trim().to_string());
                        }
                    }
                    "label" => {
                        if label.is_none() {
                            *label = m.main_arg().map(|s| s.to_string());
                        }
                    }
                    _ => {}
                },
                TexNode::Environment(inner) => self.scan_figure_nodes(
                    &inner.children,
                    sources,
                    sizes,
                    captions,
                    label,
                    image_stems,
                ),
                TexNode::Text(_) => {}
            }
        }
    }
}

/// Parse `scale=`, `width=`, `height=` options into a size hint.
///
/// Dimension values with units convert to pixels at 96 dpi; fractional
/// `\textwidth`-style values carry no absolute size and are ignored.
fn parse_size_hint(options: Option<&str>) -> SizeHint {
    let mut hint = SizeHint::default();
    let Some(options) = options else {
        return hint;
    };

    for pair in options.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim() {
            "scale" => hint.scale = value.trim().parse().ok(),
            "width" => hint.width = to_pixels(value.trim()),
            "height" => hint.height = to_pixels(value.trim()),
            _ => {}
        }
    }
    hint
}

fn to_pixels(value: &str) -> Option<u32> {
    static DIM: OnceLock<Regex> = OnceLock::new();
    let re = DIM.get_or_init(|| Regex::new(r"^([\d.]+)\s*([a-z]*)$").expect("valid dim pattern"));
    let captures = re.captures(value)?;
    let number: f64 = captures[1].parse().ok()?;
    let dpi = 96.0;
    let pixels = match &captures[2] {
        "cm" => number / 2.54 * dpi,
        "in" => number * dpi,
        "pt" => number / 72.0 * dpi,
        "px" | "" => number,
        _ => return None,
    };
    Some(pixels.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
\documentclass{article}
\title{Attention Is All You Need}
\begin{document}
Opening remarks before any section.

\section{Introduction}
Recurrent models \cite{vaswani2017} dominate.

\subsection{Background}
Earlier work applies here.

\section{Model}
\begin{figure}
  \includegraphics[width=5cm]{figures/arch.png}
  \caption{Model architecture}
  \label{fig:arch}
\end{figure}
The model uses attention.

\begin{thebibliography}{9}
\bibitem{vaswani2017} Vaswani et al. Attention is all you need. 2017.
\end{thebibliography}
\end{document}
";

    #[test]
    fn test_build_full_document() {
        let doc = LatexBuilder::default().build(SAMPLE, None).unwrap();
        assert_eq!(doc.title, "Attention Is All You Need");
        assert!(doc.has_toc);
        assert!(doc.has_bibliography);

        let titles: Vec<&str> = doc
            .root
            .subsections
            .iter()
            .map(|s| s.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Introduction", "Model"]);
        assert_eq!(doc.root.subsections[0].subsections[0].title, "Background");
        // The bibliography environment follows the last \section, so the
        // synthetic References section nests under it
        assert_eq!(doc.root.subsections[1].subsections[0].title, "References");
    }

    #[test]
    fn test_external_title_wins() {
        let doc = LatexBuilder::default()
            .build(SAMPLE, Some("Override".to_string()))
            .unwrap();
        assert_eq!(doc.title, "Override");
    }

    #[test]
    fn test_citation_encoded_inline() {
        let doc = LatexBuilder::default().build(SAMPLE, None).unwrap();
        assert!(doc.root.subsections[0].content.contains("<cit. vaswani2017>"));
    }

    #[test]
    fn test_bibliography_entries() {
        let doc = LatexBuilder::default().build(SAMPLE, None).unwrap();
        let entry = doc.bibliography.get("vaswani2017").unwrap();
        assert!(entry.contains("Vaswani et al."));
        assert_eq!(doc.citation("vaswani2017").unwrap(), *entry);
    }

    #[test]
    fn test_figure_capture_and_placeholder() {
        let doc = LatexBuilder::default().build(SAMPLE, None).unwrap();
        let model = &doc.root.subsections[1];
        let figure = model.figures.get("fig:arch").unwrap();
        assert_eq!(figure.sources, vec!["figures/arch.png"]);
        assert_eq!(figure.caption.as_deref(), Some("Model architecture"));
        assert_eq!(figure.sizes[0].width, Some(189));
        assert!(model
            .content
            .contains("<figure. fig:arch - Model architecture>"));

        // Document-level registry carries the owning section title
        let registered = doc.figures.get("fig:arch").unwrap();
        assert!(registered.section.as_deref().unwrap().contains("Model"));
    }

    #[test]
    fn test_section_underlines_in_content() {
        let doc = LatexBuilder::default().build(SAMPLE, None).unwrap();
        assert!(doc.root.content.contains("Introduction\n============"));
        assert!(doc.root.content.contains("Background\n----------"));
    }

    #[test]
    fn test_malformed_node_degrades_locally() {
        let source = r"
\begin{document}
\section{Only}
Good text \badmacro{ unclosed
More text after.
\end{document}
";
        let doc = LatexBuilder::default().build(source, None).unwrap();
        assert_eq!(doc.root.subsections.len(), 1);
        assert!(doc.root.content.contains("Good text"));
    }

    #[test]
    fn test_size_hint_units() {
        let hint = parse_size_hint(Some("width=2in, scale=0.5"));
        assert_eq!(hint.width, Some(192));
        assert_eq!(hint.scale, Some(0.5));

        let hint = parse_size_hint(Some(r"width=0.5\textwidth"));
        assert_eq!(hint.width, None);
    }
}
