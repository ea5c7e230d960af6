//! Paper ingestion: chunking, format-specific builders, and the pipeline

pub mod chunker;
pub mod latex;
pub mod outline;
pub mod pdf;
pub mod pipeline;

pub use chunker::{chunk, chunk_tree, unique_content};
pub use latex::LatexBuilder;
pub use pdf::{OutlineEntry, PdfBuilder, PdfInput};
pub use pipeline::IngestPipeline;

use crate::error::Result;
use crate::types::Document;

/// Raw input for a document build, tagged by source format
pub enum PaperInput {
    /// Resolved LaTeX source text (inputs inlined)
    Latex(String),
    /// Extracted PDF text, outline, and image inventory
    Pdf(PdfInput),
}

/// Build a document from either source format.
///
/// Single dispatch point over the format-specific builders; an externally
/// supplied title always wins over source metadata.
pub fn build_document(input: PaperInput, title: Option<String>) -> Result<Document> {
    match input {
        PaperInput::Latex(source) => LatexBuilder::default().build(&source, title),
        PaperInput::Pdf(pdf_input) => PdfBuilder.build(pdf_input, title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_latex() {
        let doc = build_document(
            PaperInput::Latex(r"\section{One} body text".to_string()),
            Some("T".to_string()),
        )
        .unwrap();
        assert_eq!(doc.root.subsections[0].title, "One");
    }

    #[test]
    fn test_dispatch_pdf() {
        let doc = build_document(
            PaperInput::Pdf(PdfInput {
                text: "plain text".to_string(),
                ..Default::default()
            }),
            Some("T".to_string()),
        )
        .unwrap();
        assert_eq!(doc.content(), "plain text");
    }
}
