//! Boundary-aware text chunker with overlap.
//!
//! Splits a [`Document`]'s text into [`Chunk`]s of at most `max_size`
//! characters, each overlapping its predecessor by `overlap` characters.
//!
//! # Algorithm
//!
//! 1. Record every split point in the text, ranked paragraph (`\n\n`) >
//!    sentence (`.`/`!`/`?` followed by whitespace) > word (whitespace).
//! 2. From the current start, look at the window of `max_size` characters.
//! 3. If the rest of the text fits, emit it and stop.
//! 4. Otherwise cut at the highest-ranked split point in the window,
//!    preferring points in its second half so chunks stay well filled.
//!    With no split point past the previous chunk's end, hard-cut at the
//!    window edge.
//! 5. Start the next chunk `overlap` characters before the cut.
//!
//! Chunks cover every byte of the text, offsets always land on UTF-8 char
//! boundaries, and identical input produces identical chunks and ids.
//!
//! # Example
//!
//! ```rust
//! use travel_rag_core::chunk::{chunk_document, ChunkingParams};
//! use travel_rag_core::models::{Document, Metadata};
//!
//! let doc = Document::from_source("notes.txt", "Hello world.\n\nSecond paragraph.".into(), Metadata::new());
//! let chunks = chunk_document(&doc, ChunkingParams::new(700, 50).unwrap()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].sequence_index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{hex_string, Chunk, Document};

/// Validated chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    max_size: usize,
    overlap: usize,
}

impl ChunkingParams {
    /// Fails with [`RagError::Config`] unless `max_size > 0` and
    /// `overlap < max_size`.
    pub fn new(max_size: usize, overlap: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(RagError::Config("max_chunk_size must be > 0".to_string()));
        }
        if overlap >= max_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than max_chunk_size ({})",
                overlap, max_size
            )));
        }
        Ok(Self { max_size, overlap })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word = 1,
    Sentence = 2,
    Paragraph = 3,
}

/// Split `document` into ordered, overlapping chunks.
///
/// Returns an empty vector for empty text.
pub fn chunk_document(document: &Document, params: ChunkingParams) -> Result<Vec<Chunk>> {
    let text = document.raw_text.as_str();
    let len = text.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let boundaries = find_boundaries(text);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;
    let mut sequence: u32 = 0;

    loop {
        let limit = advance_chars(text, start, params.max_size);
        let end = if limit >= len {
            len
        } else {
            let preferred_from = advance_chars(text, start, params.max_size / 2);
            pick_boundary(&boundaries, prev_end, preferred_from, limit).unwrap_or(limit)
        };

        chunks.push(make_chunk(document, sequence, start, end));
        if end >= len {
            break;
        }

        let mut next = retreat_chars(text, end, params.overlap);
        if next <= start {
            next = end;
        }
        prev_end = end;
        start = next;
        sequence += 1;
    }

    Ok(chunks)
}

/// Collect ranked split points as byte offsets just past a whitespace char.
fn find_boundaries(text: &str) -> Vec<(usize, Boundary)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = Vec::new();

    for i in 0..chars.len() {
        let (pos, c) = chars[i];
        if !c.is_whitespace() {
            continue;
        }
        let after = pos + c.len_utf8();

        let level = if c == '\n' && follows_newline(&chars, i) {
            Boundary::Paragraph
        } else if ends_sentence(&chars, i) {
            Boundary::Sentence
        } else {
            Boundary::Word
        };
        out.push((after, level));
    }

    out
}

/// True if the newline at `i` is preceded by another newline, ignoring
/// horizontal whitespace and carriage returns in between.
fn follows_newline(chars: &[(usize, char)], i: usize) -> bool {
    chars[..i]
        .iter()
        .rev()
        .find(|(_, c)| !matches!(c, ' ' | '\t' | '\r'))
        .is_some_and(|(_, c)| *c == '\n')
}

/// True if the whitespace at `i` directly follows sentence punctuation,
/// optionally wrapped in a closing quote or bracket.
fn ends_sentence(chars: &[(usize, char)], i: usize) -> bool {
    let mut j = i;
    while j > 0 && matches!(chars[j - 1].1, '"' | '\'' | ')' | ']' | '”' | '’') {
        j -= 1;
    }
    j > 0 && matches!(chars[j - 1].1, '.' | '!' | '?' | '。')
}

/// Highest-ranked split point in `(prev_end, limit]`, preferring points at
/// or past `preferred_from`; ties go to the later point.
fn pick_boundary(
    boundaries: &[(usize, Boundary)],
    prev_end: usize,
    preferred_from: usize,
    limit: usize,
) -> Option<usize> {
    let lo = boundaries.partition_point(|(p, _)| *p <= prev_end);
    let hi = boundaries.partition_point(|(p, _)| *p <= limit);
    let window = &boundaries[lo..hi.max(lo)];

    best_of(window.iter().filter(|(p, _)| *p >= preferred_from))
        .or_else(|| best_of(window.iter()))
}

fn best_of<'a>(candidates: impl Iterator<Item = &'a (usize, Boundary)>) -> Option<usize> {
    candidates
        .max_by_key(|(p, level)| (*level, *p))
        .map(|(p, _)| *p)
}

/// Byte offset `n` chars after `from`, or the end of the text.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte offset `n` chars before `from`, or 0.
fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn make_chunk(document: &Document, sequence: u32, start: usize, end: usize) -> Chunk {
    let text = &document.raw_text[start..end];
    let id_digest = Sha256::digest(
        format!("{}:{}:{}:{}", document.id, sequence, start, end).as_bytes(),
    );
    let text_digest = Sha256::digest(text.as_bytes());

    Chunk {
        id: format!("chk-{}", &hex_string(&id_digest)[..24]),
        document_id: document.id.clone(),
        text: text.to_string(),
        start_offset: start,
        end_offset: end,
        sequence_index: sequence,
        ingested_at: document.ingested_at,
        hash: hex_string(&text_digest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn doc(text: &str) -> Document {
        Document::from_source("test.txt", text.to_string(), Metadata::new())
    }

    fn params(max: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams::new(max, overlap).unwrap()
    }

    /// Every byte covered, spans match text, starts strictly increase.
    fn assert_covers(d: &Document, chunks: &[Chunk], overlap: usize) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, d.raw_text.len());
        for (i, c) in chunks.iter().enumerate() {
            assert!(c.end_offset > c.start_offset);
            assert_eq!(c.text, &d.raw_text[c.start_offset..c.end_offset]);
            assert_eq!(c.sequence_index, i as u32);
            if i > 0 {
                let prev = &chunks[i - 1];
                assert!(c.start_offset > prev.start_offset);
                assert!(c.start_offset <= prev.end_offset, "gap before chunk {}", i);
                let shared = d.raw_text[c.start_offset..prev.end_offset].chars().count();
                assert!(shared <= overlap, "overlap {} exceeds {}", shared, overlap);
            }
        }
    }

    #[test]
    fn test_rejects_invalid_params() {
        assert!(matches!(ChunkingParams::new(0, 0), Err(RagError::Config(_))));
        assert!(matches!(ChunkingParams::new(10, 10), Err(RagError::Config(_))));
        assert!(matches!(ChunkingParams::new(10, 11), Err(RagError::Config(_))));
        assert!(ChunkingParams::new(10, 9).is_ok());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let d = doc("Hello, world!");
        let chunks = chunk_document(&d, params(700, 50)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let chunks = chunk_document(&doc(""), params(10, 2)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let d = doc("Alpha beta gamma.\n\nDelta epsilon zeta.");
        let chunks = chunk_document(&d, params(30, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Alpha beta gamma.\n\n");
        assert_eq!(chunks[1].text, "Delta epsilon zeta.");
    }

    #[test]
    fn test_prefers_sentence_over_word() {
        let d = doc("One two three. Four five six seven eight nine");
        let chunks = chunk_document(&d, params(24, 0)).unwrap();
        assert_eq!(chunks[0].text, "One two three. ");
        assert_covers(&d, &chunks, 0);
    }

    #[test]
    fn test_hard_cut_for_oversized_unit() {
        let d = doc("abcdefghijklmnopqrstuvwxyz");
        let chunks = chunk_document(&d, params(10, 2)).unwrap();
        let spans: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| (c.start_offset, c.end_offset))
            .collect();
        assert_eq!(spans, vec![(0, 10), (8, 18), (16, 26)]);
    }

    #[test]
    fn test_coverage_with_overlap() {
        let text = (0..40)
            .map(|i| format!("Sentence number {} about Kyoto temples.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let d = doc(&text);
        let chunks = chunk_document(&d, params(120, 20)).unwrap();
        assert!(chunks.len() > 5);
        assert_covers(&d, &chunks, 20);
    }

    #[test]
    fn test_coverage_multibyte() {
        let d = doc("┌──────────────────┐\n│ Café à Paris     │\n└──────────────────┘\n\n日本語の文章です。東京タワー。");
        for (max, overlap) in [(3, 1), (7, 3), (16, 0), (40, 10)] {
            let chunks = chunk_document(&d, params(max, overlap)).unwrap();
            assert_covers(&d, &chunks, overlap);
            for c in &chunks {
                assert!(c.text.chars().count() <= max);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let d = doc("Alpha\n\nBeta\n\nGamma\n\nDelta. Epsilon! Zeta?");
        let c1 = chunk_document(&d, params(8, 2)).unwrap();
        let c2 = chunk_document(&d, params(8, 2)).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_chunk_ids_depend_on_document() {
        let a = Document::from_source("a.txt", "same text".into(), Metadata::new());
        let b = Document::from_source("b.txt", "same text".into(), Metadata::new());
        let ca = chunk_document(&a, params(100, 0)).unwrap();
        let cb = chunk_document(&b, params(100, 0)).unwrap();
        assert_ne!(ca[0].id, cb[0].id);
        assert_eq!(ca[0].hash, cb[0].hash);
    }
}
