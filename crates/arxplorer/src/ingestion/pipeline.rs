//! Full-miss ingestion: fetch, extract, build, register figures
//!
//! Tries the LaTeX source first and falls back to the PDF once before
//! surfacing failure.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use regex::Regex;

use crate::cache::figures::{archive_path, pack_images};
use crate::error::{Error, Result};
use crate::ingestion::latex::{LatexBuilder, MacroRegistry};
use crate::ingestion::outline;
use crate::ingestion::pdf::PdfBuilder;
use crate::providers::{BlobStore, SourceProvider};
use crate::types::{Document, PaperRecord};

/// Extensions tried when a figure path has none
const IMAGE_EXTENSIONS: &[&str] = &["", ".png", ".jpg", ".jpeg", ".gif", ".pdf", ".ps", ".eps", ".svg"];

/// Ingestion pipeline over the source collaborator
pub struct IngestPipeline {
    source: Arc<dyn SourceProvider>,
    blobs: Option<Arc<dyn BlobStore>>,
    latex: LatexBuilder,
}

impl IngestPipeline {
    pub fn new(source: Arc<dyn SourceProvider>) -> Self {
        Self {
            source,
            blobs: None,
            latex: LatexBuilder::default(),
        }
    }

    /// Attach the blob tier so packed figure sources get registered
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Use a custom macro-handler registry for the LaTeX builder
    pub fn with_registry(mut self, registry: MacroRegistry) -> Self {
        self.latex = LatexBuilder::new(registry);
        self
    }

    /// Fetch and parse one paper into a record.
    ///
    /// Metadata lookup failures (unknown id) surface as `NotFound`. A failed
    /// LaTeX build falls back to the PDF build once; if that also fails the
    /// ingestion attempt is a terminal `ParseFailure`.
    pub async fn ingest(&self, paper_id: &str) -> Result<PaperRecord> {
        let details = self.source.details(paper_id).await?;

        let document = match self.ingest_latex(paper_id, &details.title).await {
            Ok(document) => document,
            Err(latex_err) => {
                tracing::warn!(
                    "LaTeX ingestion failed for '{}' ({}), falling back to PDF",
                    paper_id,
                    latex_err
                );
                self.ingest_pdf(paper_id, &details.title)
                    .await
                    .map_err(|pdf_err| {
                        Error::parse_failure(
                            paper_id,
                            format!("latex: {latex_err}; pdf: {pdf_err}"),
                        )
                    })?
            }
        };

        Ok(PaperRecord::new(
            details.id,
            details.title,
            details.date,
            details.authors,
            details.abstract_text,
            document,
        ))
    }

    async fn ingest_latex(&self, paper_id: &str, title: &str) -> Result<Document> {
        let archive = self.source.download_source(paper_id).await?;

        let workdir = tempfile::tempdir()?;
        extract_source(&archive, workdir.path())?;

        let main_file = guess_main_tex_file(workdir.path())?;
        let source_text = std::fs::read_to_string(&main_file)
            .unwrap_or_else(|_| {
                // Some archives carry non-UTF-8 tex files
                String::from_utf8_lossy(&std::fs::read(&main_file).unwrap_or_default())
                    .into_owned()
            });
        let source_text = inline_inputs(&source_text, workdir.path());

        let mut document = self.latex.build(&source_text, Some(title.to_string()))?;
        if document.root.subsections.is_empty() {
            return Err(Error::parse_failure(paper_id, "no sections recovered from source"));
        }

        self.register_latex_images(paper_id, &mut document, workdir.path())
            .await?;

        Ok(document)
    }

    async fn ingest_pdf(&self, paper_id: &str, title: &str) -> Result<Document> {
        let bytes = self.source.download_pdf(paper_id).await?;
        let input = outline::read_pdf(&bytes)?;
        let document = PdfBuilder.build(input, Some(title.to_string()))?;

        // The original PDF doubles as the packed figure source
        if let Some(blobs) = &self.blobs {
            blobs.upload(&archive_path(paper_id, "pdf"), &bytes).await?;
        }

        Ok(document)
    }

    /// Pack every referenced image into one zip, upload it, and rewrite
    /// figure source locators to their archive member names.
    async fn register_latex_images(
        &self,
        paper_id: &str,
        document: &mut Document,
        workdir: &Path,
    ) -> Result<()> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();

        for figure in document.figures.values_mut() {
            let mut member_names = Vec::new();
            for source in &figure.sources {
                match resolve_image_file(workdir, source) {
                    Some(path) => {
                        let basename = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| source.clone());
                        if !entries.iter().any(|(name, _)| *name == basename) {
                            entries.push((basename.clone(), std::fs::read(&path)?));
                        }
                        member_names.push(basename);
                    }
                    None => {
                        tracing::warn!("Figure source '{}' not found in archive", source)
                    }
                }
            }
            figure.sources = member_names;
        }

        if entries.is_empty() {
            return Ok(());
        }

        if let Some(blobs) = &self.blobs {
            let archive = pack_images(&entries)?;
            blobs
                .upload(&archive_path(paper_id, "zip"), &archive)
                .await?;
        }

        Ok(())
    }
}

/// Locate an image file referenced by a figure, trying known extensions
fn resolve_image_file(workdir: &Path, source: &str) -> Option<PathBuf> {
    for extension in IMAGE_EXTENSIONS {
        let candidate = workdir.join(format!("{source}{extension}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Extract the downloaded source: a gzipped tarball, a bare tarball, or a
/// single gzip-compressed tex file (materialized as `main.tex`).
pub fn extract_source(data: &[u8], output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;

    let mut decompressed = Vec::new();
    let payload = match GzDecoder::new(data).read_to_end(&mut decompressed) {
        Ok(_) => decompressed.as_slice(),
        Err(_) => data,
    };

    if looks_like_tar(payload) {
        tar::Archive::new(payload)
            .unpack(output_dir)
            .map_err(|e| Error::internal(format!("tar extraction failed: {}", e)))?;
    } else {
        std::fs::write(output_dir.join("main.tex"), payload)?;
    }

    Ok(())
}

fn looks_like_tar(data: &[u8]) -> bool {
    data.len() > 262 && &data[257..262] == b"ustar"
}

/// Pick the main tex file: prefer files with `\documentclass` or a complete
/// `document` environment, then `main.tex`, then anything; the largest
/// candidate wins.
pub fn guess_main_tex_file(directory: &Path) -> Result<PathBuf> {
    let mut candidates = Vec::new();

    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tex") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        if contents.contains("\\documentclass")
            || (contents.contains("\\begin{document}") && contents.contains("\\end{document}"))
        {
            candidates.push(path);
        }
    }

    if candidates.is_empty() {
        let main = directory.join("main.tex");
        if main.is_file() {
            tracing::info!("Guessing main.tex");
            return Ok(main);
        }
        candidates = std::fs::read_dir(directory)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
    }

    let largest = candidates
        .into_iter()
        .max_by_key(|path| {
            std::fs::metadata(path)
                .map(|m| m.len())
                .unwrap_or_default()
        })
        .ok_or_else(|| Error::internal("source archive contains no files"))?;

    tracing::info!("Guessing main file: {}", largest.display());
    Ok(largest)
}

/// One-level expansion of `\input`/`\include` references
pub fn inline_inputs(source: &str, directory: &Path) -> String {
    static INPUT: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = INPUT
        .get_or_init(|| Regex::new(r"\\(?:input|include)\{([^}]+)\}").expect("valid input pattern"));

    re.replace_all(source, |caps: &regex::Captures| {
        let name = &caps[1];
        let mut path = directory.join(name);
        if path.extension().is_none() {
            path.set_extension("tex");
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => {
                tracing::debug!("Could not inline '{}', keeping reference", name);
                caps[0].to_string()
            }
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::source::PaperDetails;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_TEX: &str = r"
\documentclass{article}
\begin{document}
\section{Introduction}
Hello paper world.
\section{Results}
Numbers went up.
\end{document}
";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        gzip(&builder.into_inner().unwrap())
    }

    /// Source that serves canned bytes and counts downloads
    struct MockSource {
        source: Option<Vec<u8>>,
        pdf: Option<Vec<u8>>,
        detail_calls: AtomicUsize,
        source_calls: AtomicUsize,
    }

    impl MockSource {
        fn latex(archive: Vec<u8>) -> Self {
            Self {
                source: Some(archive),
                pdf: None,
                detail_calls: AtomicUsize::new(0),
                source_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceProvider for MockSource {
        async fn details(&self, paper_id: &str) -> crate::error::Result<PaperDetails> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            if paper_id == "0000.00000" {
                return Err(Error::NotFound(paper_id.to_string()));
            }
            Ok(PaperDetails {
                id: paper_id.to_string(),
                title: "A Mock Paper".to_string(),
                date: "2024-01-01".to_string(),
                authors: "First Author, Second Author".to_string(),
                abstract_text: "An abstract.".to_string(),
            })
        }

        async fn download_source(&self, paper_id: &str) -> crate::error::Result<Vec<u8>> {
            self.source_calls.fetch_add(1, Ordering::SeqCst);
            self.source
                .clone()
                .ok_or_else(|| Error::NotFound(paper_id.to_string()))
        }

        async fn download_pdf(&self, paper_id: &str) -> crate::error::Result<Vec<u8>> {
            self.pdf
                .clone()
                .ok_or_else(|| Error::NotFound(paper_id.to_string()))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[test]
    fn test_extract_single_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        extract_source(&gzip(SAMPLE_TEX.as_bytes()), dir.path()).unwrap();
        let main = dir.path().join("main.tex");
        assert!(main.is_file());
        assert!(std::fs::read_to_string(main).unwrap().contains("Hello paper world"));
    }

    #[test]
    fn test_extract_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tar_gz(&[
            ("paper.tex", SAMPLE_TEX.as_bytes()),
            ("refs.bib", b"@article{x}"),
        ]);
        extract_source(&archive, dir.path()).unwrap();
        assert!(dir.path().join("paper.tex").is_file());
        assert!(dir.path().join("refs.bib").is_file());
    }

    #[test]
    fn test_guess_main_prefers_documentclass() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("macros.tex"), "\\newcommand{\\x}{y}").unwrap();
        std::fs::write(dir.path().join("paper.tex"), SAMPLE_TEX).unwrap();

        let main = guess_main_tex_file(dir.path()).unwrap();
        assert_eq!(main.file_name().unwrap(), "paper.tex");
    }

    #[test]
    fn test_inline_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intro.tex"), "the intro body").unwrap();

        let merged = inline_inputs(r"before \input{intro} after", dir.path());
        assert_eq!(merged, "before the intro body after");

        let kept = inline_inputs(r"\input{missing}", dir.path());
        assert_eq!(kept, r"\input{missing}");
    }

    #[tokio::test]
    async fn test_ingest_latex_paper() {
        let source = Arc::new(MockSource::latex(gzip(SAMPLE_TEX.as_bytes())));
        let pipeline = IngestPipeline::new(source.clone());

        let record = pipeline.ingest("2401.12345").await.unwrap();
        assert_eq!(record.title, "A Mock Paper");
        assert_eq!(record.document.root.subsections.len(), 2);
        assert!(record.table_of_contents.contains("1. Introduction"));
        assert_eq!(source.source_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let source = Arc::new(MockSource::latex(gzip(SAMPLE_TEX.as_bytes())));
        let pipeline = IngestPipeline::new(source);
        let err = pipeline.ingest("0000.00000").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_both_formats_failing_is_parse_failure() {
        // Sectionless tex forces the PDF fallback; garbage PDF bytes fail too
        let source = Arc::new(MockSource {
            source: Some(gzip(b"\\documentclass{article}\\begin{document}no sections\\end{document}")),
            pdf: Some(b"not a pdf".to_vec()),
            detail_calls: AtomicUsize::new(0),
            source_calls: AtomicUsize::new(0),
        });
        let pipeline = IngestPipeline::new(source);

        let err = pipeline.ingest("2401.99999").await.unwrap_err();
        assert!(matches!(err, Error::ParseFailure { .. }));
    }
}
