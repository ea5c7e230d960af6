//! Deferred figure URL resolution
//!
//! Figures come out of ingestion holding source locators only. On first
//! request the paper's packed source (image archive or original PDF) is
//! fetched from the blob tier, the specific images are extracted and
//! converted, resolved PNGs are uploaded, and the figure records are
//! rewritten in place.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::{sanitize_id, BlobStore, ImageConverter};
use crate::types::{Figure, SizeHint};

/// Deterministic blob path of a paper's packed image source
pub fn archive_path(paper_id: &str, extension: &str) -> String {
    format!("papers/{}_images.{}", sanitize_id(paper_id), extension)
}

/// Blob path of one resolved figure image
fn image_path(paper_id: &str, name: &str) -> String {
    format!("images/{}/{}.png", sanitize_id(paper_id), sanitize_id(name))
}

/// Resolves figure source locators into public image URLs
pub struct FigureResolver {
    blobs: Arc<dyn BlobStore>,
    converter: Arc<dyn ImageConverter>,
}

impl FigureResolver {
    pub fn new(blobs: Arc<dyn BlobStore>, converter: Arc<dyn ImageConverter>) -> Self {
        Self { blobs, converter }
    }

    /// Resolve the named figures in place. Returns true when any record was
    /// rewritten, so the caller knows to run the persistent partial update.
    pub async fn resolve(
        &self,
        paper_id: &str,
        figures: &mut BTreeMap<String, Figure>,
        labels: &[String],
    ) -> Result<bool> {
        let pending: Vec<String> = labels
            .iter()
            .filter(|label| {
                figures
                    .get(label.as_str())
                    .map(|f| f.needs_resolution())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(false);
        }

        let (archive, is_pdf) = self.fetch_archive(paper_id).await?;

        for label in &pending {
            let Some(figure) = figures.get_mut(label) else {
                continue;
            };
            if is_pdf {
                self.resolve_from_pdf(paper_id, figure, &archive).await;
            } else {
                self.resolve_from_zip(paper_id, figure, &archive).await;
            }
        }

        Ok(true)
    }

    /// Locate and download the paper's packed source archive
    async fn fetch_archive(&self, paper_id: &str) -> Result<(Vec<u8>, bool)> {
        let prefix = format!("papers/{}_images.", sanitize_id(paper_id));
        let path = self
            .blobs
            .list(&prefix)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::store(format!("no packed image source for paper '{}'", paper_id))
            })?;

        let is_pdf = path.ends_with(".pdf");
        let data = self.blobs.download(&path).await?;
        Ok((data, is_pdf))
    }

    /// Latex papers: images live as members of a zip archive
    async fn resolve_from_zip(&self, paper_id: &str, figure: &mut Figure, archive: &[u8]) {
        let mut urls = Vec::new();

        for (i, source) in figure.sources.iter().enumerate() {
            let Some(data) = read_zip_member(archive, source) else {
                tracing::warn!("Image '{}' missing from archive of '{}'", source, paper_id);
                continue;
            };
            let format = source.rsplit('.').next().unwrap_or("").to_string();
            let size = figure.sizes.get(i).cloned().unwrap_or_default();

            let Some(png) = self.converter.to_png(&data, &format, &size) else {
                continue;
            };
            match self
                .blobs
                .upload_public(&image_path(paper_id, source), &png)
                .await
            {
                Ok(url) => urls.push(url),
                Err(e) => tracing::warn!("Couldn't upload figure image: {}", e),
            }
        }

        figure.urls = urls;
        figure.sources.clear();
        figure.sizes.clear();
    }

    /// PDF papers: images extract from the original document by locator
    async fn resolve_from_pdf(&self, paper_id: &str, figure: &mut Figure, pdf: &[u8]) {
        let Some(locator) = figure.sources.first().cloned() else {
            return;
        };

        if let Some(data) = self.converter.extract_pdf_image(pdf, &locator) {
            let size = figure.sizes.first().cloned().unwrap_or(SizeHint::default());
            if let Some(png) = self.converter.to_png(&data, "png", &size) {
                match self
                    .blobs
                    .upload_public(&image_path(paper_id, &figure.label), &png)
                    .await
                {
                    Ok(url) => figure.urls = vec![url],
                    Err(e) => tracing::warn!("Couldn't upload figure image: {}", e),
                }
            }
        }

        figure.sources.clear();
        figure.sizes.clear();
    }
}

/// Read one member of a zip archive by name
pub fn read_zip_member(archive: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).ok()?;
    let mut file = zip.by_name(name).ok()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).ok()?;
    Some(data)
}

/// Pack named image files into a zip archive
pub fn pack_images(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| Error::internal(format!("zip write failed: {}", e)))?;
            std::io::Write::write_all(&mut writer, data)?;
        }
        writer
            .finish()
            .map_err(|e| Error::internal(format!("zip finish failed: {}", e)))?;
    }
    Ok(buffer.into_inner())
}
