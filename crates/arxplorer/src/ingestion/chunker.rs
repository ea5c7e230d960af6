//! Overlapping word-window chunking of section content

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::types::{Document, Section};

/// Split text into overlapping retrieval units.
///
/// Scans character by character counting word boundaries; each time
/// `chunk_size` words have accumulated the chunk is cut, the join is marked
/// with an ellipsis on both sides, and the start pointer rewinds by the
/// character length of the trailing `overlap` words so the overlap stays
/// literal in the text. Texts of at most `chunk_size + min_len` words come
/// back as a single chunk, and a trailing remainder shorter than `min_len`
/// words is folded into the last chunk instead of emitted on its own.
pub fn chunk(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let ChunkingConfig {
        chunk_size,
        overlap,
        min_len,
    } = cfg.clone();

    if text.split_whitespace().count() <= chunk_size + min_len {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut start = 0usize;
    let mut end = 1usize;
    let mut num_words = 0usize;
    let mut chr_overlap = 0usize;

    while end < chars.len() {
        if (chars[end] == ' ' || chars[end] == '\n') && end - start > 1 {
            num_words += 1;
            if num_words >= chunk_size {
                let mut next: String = chars[start..end].iter().collect();
                if let Some(last) = chunks.last_mut() {
                    last.push_str("...");
                    next = format!("... {next}");
                }
                chr_overlap = tail_overlap_chars(&next, overlap);
                chunks.push(next);
                start = end.saturating_sub(chr_overlap);
                end = start;
                num_words = 0;
            }
        }
        end += 1;
    }

    if let Some(last) = chunks.last_mut() {
        if num_words < min_len {
            let tail_start = (start + chr_overlap).min(chars.len());
            last.extend(chars[tail_start..].iter());
        } else {
            last.push_str("...");
            let tail: String = chars[start..].iter().collect();
            chunks.push(format!("... {tail}"));
        }
    }

    chunks
}

/// Character length of the trailing `overlap` words plus the overlap count,
/// which is how far the start pointer rewinds after a cut.
fn tail_overlap_chars(chunk: &str, overlap: usize) -> usize {
    let words: Vec<&str> = chunk.split_whitespace().collect();
    let tail = &words[words.len().saturating_sub(overlap)..];
    let chars: usize = tail.iter().map(|w| w.chars().count()).sum();
    (chars + overlap).saturating_sub(1)
}

/// Reduce a section's content to the text not repeated by its immediate
/// subsections, so the same prose is never indexed under both parent and
/// child. Each subsection contributes a `<title>...<content>` span match
/// (dot matches newline) that is removed from the parent.
pub fn unique_content(section: &Section) -> String {
    if section.subsections.is_empty() {
        return section.content.clone();
    }

    let mut unique = section.content.clone();
    for sub in &section.subsections {
        let pattern = format!(
            "(?s){}.*?{}",
            regex::escape(&sub.title),
            regex::escape(&sub.content)
        );
        match Regex::new(&pattern) {
            Ok(re) => unique = re.replace_all(&unique, "").into_owned(),
            Err(err) => {
                tracing::debug!("Skipping unique-content span for '{}': {}", sub.title, err)
            }
        }
    }
    unique
}

/// Chunk every section of a document, prefixing each chunk with its section's
/// table-of-contents line for retrieval context.
pub fn chunk_tree(doc: &Document, cfg: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    for (title, section) in doc.flat_sections() {
        let unique = unique_content(section);
        for piece in chunk(&unique, cfg) {
            chunks.push(format!("{}\n{}", title.trim(), piece));
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn cfg() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 250,
            overlap: 15,
            min_len: 50,
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = words(260);
        let chunks = chunk(&text, &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_two_chunks_with_ellipsis_markers() {
        let text = words(320);
        let chunks = chunk(&text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with("..."));
        assert!(chunks[1].starts_with("... "));
    }

    #[test]
    fn test_overlap_is_literal() {
        let text = words(320);
        let chunks = chunk(&text, &cfg());
        // The rewind re-reads the trailing words of the first chunk, so some
        // word present near the end of chunk 0 must reappear in chunk 1.
        let first_tail: Vec<&str> = chunks[0]
            .trim_end_matches("...")
            .split_whitespace()
            .rev()
            .take(10)
            .collect();
        assert!(first_tail.iter().any(|w| chunks[1].contains(w)));
    }

    #[test]
    fn test_small_remainder_merged_into_last_chunk() {
        // 520 words: two cuts fire, and after the second rewind only 49 fresh
        // words remain, which is under min_len, so the tail folds into the
        // second chunk instead of becoming a third.
        let text = words(520);
        let chunks = chunk(&text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].contains("word519"));
        assert!(!chunks[1].ends_with("..."));
    }

    #[test]
    fn test_unique_content_removes_subsection_spans() {
        let section = Section::with_subsections(
            "Parent",
            "Preamble only in parent.\n\nChild\nshared child text here.\n\nCoda.",
            vec![Section::new("Child", "shared child text here.")],
        );
        let unique = unique_content(&section);
        assert!(unique.contains("Preamble only in parent."));
        assert!(unique.contains("Coda."));
        assert!(!unique.contains("shared child text"));
    }

    #[test]
    fn test_chunk_tree_prefixes_section_titles() {
        let root = Section::with_subsections(
            "Paper",
            "intro words",
            vec![Section::new("Methods", "some methods content")],
        );
        let doc = crate::types::Document::new(
            Some("Paper".to_string()),
            root,
            std::collections::BTreeMap::new(),
        );
        let chunks = chunk_tree(&doc, &cfg());
        assert!(chunks.iter().any(|c| c.starts_with("Paper\n")));
        assert!(chunks.iter().any(|c| c.starts_with("1. Methods\n")));
    }
}
