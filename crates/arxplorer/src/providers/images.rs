//! Image conversion collaborator
//!
//! Resizing and format conversion are external concerns; the cache only
//! needs "bytes in, PNG bytes out" plus PDF image extraction by locator.

use crate::types::SizeHint;

/// Converts figure source data into uploadable PNGs
pub trait ImageConverter: Send + Sync {
    /// Convert raw image data of the given format (file extension) into PNG
    /// bytes, applying size hints. `None` skips the image without failing
    /// the resolution pass.
    fn to_png(&self, data: &[u8], format: &str, size: &SizeHint) -> Option<Vec<u8>>;

    /// Extract one image from a PDF by its locator (XObject name)
    fn extract_pdf_image(&self, pdf: &[u8], locator: &str) -> Option<Vec<u8>>;
}

/// Converter that passes PNG/JPEG data through unchanged and pulls raw
/// image streams out of PDFs. Suitable for development and tests; real
/// deployments inject a converter that rasterizes and resizes.
#[derive(Debug, Default)]
pub struct PassthroughConverter;

impl ImageConverter for PassthroughConverter {
    fn to_png(&self, data: &[u8], format: &str, _size: &SizeHint) -> Option<Vec<u8>> {
        match format.to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" => Some(data.to_vec()),
            other => {
                tracing::debug!("Passthrough converter skipping format '{}'", other);
                None
            }
        }
    }

    fn extract_pdf_image(&self, pdf: &[u8], locator: &str) -> Option<Vec<u8>> {
        let doc = lopdf::Document::load_mem(pdf).ok()?;
        for (_, page_id) in doc.get_pages() {
            let Ok(page) = doc.get_dictionary(page_id) else {
                continue;
            };
            let xobjects = page
                .get(b"Resources")
                .ok()
                .and_then(|r| resolve_dict(&doc, r))
                .and_then(|resources| resources.get(b"XObject").ok())
                .and_then(|x| resolve_dict(&doc, x));
            let Some(xobjects) = xobjects else { continue };

            for (name, object) in xobjects.iter() {
                if String::from_utf8_lossy(name) == locator {
                    if let Some(lopdf::Object::Stream(stream)) = resolve(&doc, object) {
                        return Some(stream.content.clone());
                    }
                }
            }
        }
        None
    }
}

fn resolve<'a>(doc: &'a lopdf::Document, object: &'a lopdf::Object) -> Option<&'a lopdf::Object> {
    match object {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(
    doc: &'a lopdf::Document,
    object: &'a lopdf::Object,
) -> Option<&'a lopdf::Dictionary> {
    match resolve(doc, object)? {
        lopdf::Object::Dictionary(dict) => Some(dict),
        lopdf::Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}
