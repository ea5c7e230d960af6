//! PDF text, outline, and image inventory extraction
//!
//! Thin adapter over `pdf-extract` (text) and `lopdf` (outline bookmarks,
//! metadata title, per-page image XObjects) producing the builder's input.

use std::collections::HashMap;

use lopdf::{Dictionary, Object, ObjectId};

use crate::error::{Error, Result};
use crate::ingestion::pdf::{OutlineEntry, PdfInput};
use crate::types::Figure;

/// Extract everything the PDF builder needs from raw PDF bytes.
///
/// Text extraction failure is fatal; a malformed or missing outline only
/// degrades to the no-outline path.
pub fn read_pdf(data: &[u8]) -> Result<PdfInput> {
    let text = pdf_extract::extract_text_from_mem(data)
        .map_err(|e| Error::internal(format!("PDF text extraction failed: {}", e)))?;

    let mut input = PdfInput {
        text,
        ..Default::default()
    };

    match lopdf::Document::load_mem(data) {
        Ok(doc) => {
            input.title = metadata_title(&doc);
            input.outline = read_outline(&doc);
            input.figures_by_page = page_images(&doc);
        }
        Err(err) => {
            tracing::warn!("Could not read PDF structure, using text only: {}", err);
        }
    }

    Ok(input)
}

/// Resolve an object through at most one level of indirection
fn resolve<'a>(doc: &'a lopdf::Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a lopdf::Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, else treated as Latin-1-ish)
fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Title from the trailer's Info dictionary, if present and non-empty
fn metadata_title(doc: &lopdf::Document) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let info = resolve_dict(doc, info)?;
    match resolve(doc, info.get(b"Title").ok()?)? {
        Object::String(bytes, _) => {
            let title = decode_text(bytes).trim().to_string();
            (!title.is_empty()).then_some(title)
        }
        _ => None,
    }
}

/// Map from page object id to 1-indexed page number
fn page_numbers(doc: &lopdf::Document) -> HashMap<ObjectId, u32> {
    doc.get_pages()
        .into_iter()
        .map(|(number, id)| (id, number))
        .collect()
}

/// Walk the `/Outlines` linked list into a flat `(level, title, page)` list
fn read_outline(doc: &lopdf::Document) -> Vec<OutlineEntry> {
    let pages = page_numbers(doc);
    let mut entries = Vec::new();

    let Some(root) = doc
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Outlines").ok())
        .and_then(|outlines| resolve_dict(doc, outlines))
    else {
        return entries;
    };

    walk_outline_level(doc, root, 1, &pages, &mut entries);
    entries
}

fn walk_outline_level(
    doc: &lopdf::Document,
    parent: &Dictionary,
    level: u32,
    pages: &HashMap<ObjectId, u32>,
    entries: &mut Vec<OutlineEntry>,
) {
    // Bound traversal so cyclic First/Next chains cannot loop forever
    let mut remaining = 1024;
    let mut current = parent
        .get(b"First")
        .ok()
        .and_then(|first| resolve_dict(doc, first));

    while let Some(item) = current {
        if remaining == 0 {
            tracing::warn!("Outline traversal limit reached, truncating");
            return;
        }
        remaining -= 1;

        let title = item
            .get(b"Title")
            .ok()
            .and_then(|t| resolve(doc, t))
            .and_then(|t| match t {
                Object::String(bytes, _) => Some(decode_text(bytes)),
                _ => None,
            });

        if let Some(title) = title {
            entries.push(OutlineEntry {
                level,
                title,
                page: destination_page(doc, item, pages),
            });
        }

        walk_outline_level(doc, item, level + 1, pages, entries);

        current = item
            .get(b"Next")
            .ok()
            .and_then(|next| resolve_dict(doc, next));
    }
}

/// Page number of an outline item's destination, from `/Dest` or the `/D`
/// of a GoTo action. Named destinations are not resolved.
fn destination_page(
    doc: &lopdf::Document,
    item: &Dictionary,
    pages: &HashMap<ObjectId, u32>,
) -> Option<u32> {
    let dest = match item.get(b"Dest").ok().and_then(|d| resolve(doc, d)) {
        Some(dest) => Some(dest),
        None => item
            .get(b"A")
            .ok()
            .and_then(|a| resolve_dict(doc, a))
            .and_then(|action| action.get(b"D").ok())
            .and_then(|d| resolve(doc, d)),
    }?;

    match dest {
        Object::Array(elements) => match elements.first()? {
            Object::Reference(id) => pages.get(id).copied(),
            _ => None,
        },
        _ => None,
    }
}

/// Inventory of image XObjects per page, keyed by 1-indexed page number.
///
/// Each image becomes an unresolved figure whose source locator is the
/// XObject name; actual pixel extraction happens at figure-resolution time.
fn page_images(doc: &lopdf::Document) -> HashMap<u32, Vec<Figure>> {
    let mut by_page: HashMap<u32, Vec<Figure>> = HashMap::new();

    for (page_number, page_id) in doc.get_pages() {
        let Ok(page_dict) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Some(xobjects) = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve_dict(doc, r))
            .and_then(|resources| resources.get(b"XObject").ok())
            .and_then(|x| resolve_dict(doc, x))
        else {
            continue;
        };

        for (name, object) in xobjects.iter() {
            let is_image = resolve_dict(doc, object)
                .and_then(|dict| dict.get(b"Subtype").ok())
                .map(|subtype| matches!(subtype, Object::Name(n) if n == b"Image"))
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            let label = String::from_utf8_lossy(name).into_owned();
            by_page.entry(page_number).or_default().push(Figure {
                label: label.clone(),
                sources: vec![label],
                ..Default::default()
            });
        }
    }

    by_page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_utf16() {
        // "Hi" as UTF-16BE with BOM
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_text(&bytes), "Hi");
    }

    #[test]
    fn test_decode_text_plain() {
        assert_eq!(decode_text(b"Plain Title"), "Plain Title");
    }

    #[test]
    fn test_read_pdf_rejects_garbage() {
        assert!(read_pdf(b"not a pdf at all").is_err());
    }
}
