//! Splitting fragments into bounded, overlapping chunks.
//!
//! [`RecursiveChunker`] splits at the coarsest boundary that keeps pieces
//! under `chunk_size` characters: paragraph, line, sentence, period, space.
//! Pieces are then merged back greedily, and each new chunk starts with the
//! tail of the previous one (at most `chunk_overlap` characters, aligned to
//! piece boundaries). A single piece with no separator left to split on,
//! such as a very long token, is emitted whole even if it exceeds the limit.
//!
//! Sizes are measured in characters, not bytes.

use std::collections::VecDeque;

use crate::document::{Chunk, Fragment};

/// Separators in preference order.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", ".", " "];

/// A strategy for splitting fragments into chunks.
pub trait Chunker: Send + Sync {
    /// Split one fragment. Every chunk carries the fragment's metadata with
    /// `chunk_index` set. Returns an empty `Vec` for blank text.
    fn chunk(&self, fragment: &Fragment) -> Vec<Chunk>;

    /// Split a sequence of fragments, preserving order.
    fn split(&self, fragments: &[Fragment]) -> Vec<Chunk> {
        fragments.iter().flat_map(|fragment| self.chunk(fragment)).collect()
    }
}

/// Recursive separator-based splitter with overlap.
///
/// # Example
///
/// ```rust,ignore
/// use drawing_rag::{Chunker, RecursiveChunker};
///
/// let chunker = RecursiveChunker::new(1200, 150);
/// let chunks = chunker.split(&fragments);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker using [`DEFAULT_SEPARATORS`].
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum characters shared by consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the separator list (coarsest first).
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Split raw text into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        split_recursive(text, &separators, self.chunk_size, self.chunk_overlap)
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, fragment: &Fragment) -> Vec<Chunk> {
        if fragment.text.trim().is_empty() {
            return Vec::new();
        }

        self.split_text(&fragment.text)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = fragment.metadata.clone();
                metadata.chunk_index = Some(i);
                Chunk { text, metadata }
            })
            .collect()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split with the first separator present in `text`, recursing into pieces
/// that are still too large with the remaining, finer separators.
fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let position = separators.iter().position(|sep| text.contains(sep));
    let (separator, finer) = match position {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => match separators.last() {
            Some(last) => (*last, &separators[separators.len()..]),
            None => return merge_pieces(&[text], chunk_size, chunk_overlap),
        },
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) <= chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
        } else {
            chunks.extend(split_recursive(piece, finer, chunk_size, chunk_overlap));
        }
    }
    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
    }
    chunks
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Greedily merge pieces (each at most `chunk_size`) into chunks, carrying
/// up to `chunk_overlap` characters of trailing pieces into the next chunk.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            push_trimmed(&mut chunks, &window);
            // Shrink the window to the overlap, and until the new piece fits.
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }
        window.push_back((piece, len));
        total += len;
    }
    push_trimmed(&mut chunks, &window);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() && chunks.last().is_none_or(|last: &String| last != trimmed) {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BoundingBox, SourceDocument};

    fn fragment(text: &str) -> Fragment {
        let source = SourceDocument::from_path("/drawings/A-501 Wall Sections.pdf");
        Fragment::native(&source, 4, BoundingBox::new(36.0, 40.0, 560.0, 300.0), text)
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = RecursiveChunker::new(100, 20);
        let chunks = chunker.chunk(&fragment("  Wall thickness: 300mm  "));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Wall thickness: 300mm");
        assert_eq!(chunks[0].metadata.chunk_index, Some(0));
    }

    #[test]
    fn blank_text_yields_nothing() {
        let chunker = RecursiveChunker::new(100, 20);
        assert!(chunker.chunk(&fragment(" \n\n ")).is_empty());
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let chunker = RecursiveChunker::new(40, 0);
        let text = "GENERAL NOTES APPLY TO ALL SHEETS\n\nSEE STRUCTURAL FOR FOOTINGS";
        let chunks = chunker.split_text(text);
        assert_eq!(chunks, vec!["GENERAL NOTES APPLY TO ALL SHEETS", "SEE STRUCTURAL FOR FOOTINGS"]);
    }

    #[test]
    fn falls_back_to_sentences_then_words() {
        let chunker = RecursiveChunker::new(30, 0);
        let text = "Provide blocking at all grab bars. Verify rough opening sizes with the supplier";
        let chunks = chunker.split_text(text);
        assert_eq!(chunks[0], "Provide blocking at all grab");
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        assert_eq!(chunks.join(" ").split_whitespace().count(), text.split_whitespace().count());
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = RecursiveChunker::new(50, 20);
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen fourteen";
        let chunks = chunker.split_text(text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let first_word = pair[1].split_whitespace().next().unwrap();
            assert!(pair[0].contains(first_word), "{:?} does not overlap {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn oversized_token_is_kept_whole() {
        let chunker = RecursiveChunker::new(10, 2);
        let chunks = chunker.split_text("see DRAWING-NUMBER-A-501-REV-C now");
        assert!(chunks.contains(&"DRAWING-NUMBER-A-501-REV-C".to_string()));
    }

    #[test]
    fn metadata_is_carried_forward() {
        let chunker = RecursiveChunker::new(20, 5);
        let source = fragment("first line of text\nsecond line of text\nthird line of text");
        let chunks = chunker.chunk(&source);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.page, 4);
            assert_eq!(chunk.metadata.source, "A-501 Wall Sections.pdf");
            assert_eq!(chunk.metadata.bbox, source.metadata.bbox);
            assert_eq!(chunk.metadata.chunk_index, Some(i));
        }
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let chunker = RecursiveChunker::new(12, 0);
        let chunks = chunker.split_text("ø12 rebar ø16 rebar ø20 rebar");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }
}
