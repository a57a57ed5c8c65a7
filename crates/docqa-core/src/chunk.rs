//! Overlapping fixed-size text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! with exactly `overlap` characters shared between consecutive chunks so
//! context spanning a boundary is not lost.
//!
//! Each chunk receives a deterministic UUID derived from its source and
//! ordinal, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Measure the text in characters (Unicode scalar values, never bytes).
//! 2. Emit the window `[start, start + chunk_size)`, clamped to the end.
//! 3. Stop when a window reaches the end of the text, otherwise advance
//!    `start` by `chunk_size - overlap`.
//! 4. Guarantee at least one chunk per unit (even for empty text).
//!
//! Because every non-final window is exactly `chunk_size` long, the next
//! window always starts `overlap` characters before the previous one ends.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::chunk;
//!
//! let chunks = chunk("Hello world.", "notes.txt", 1000, 200).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Validated chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingParams {
    /// Fails with [`RagError::InvalidConfig`] when `chunk_size` is zero or
    /// `overlap >= chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Split a single text into chunks, validating the parameters first.
pub fn chunk(text: &str, source: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let params = ChunkingParams::new(chunk_size, overlap)?;
    Ok(chunk_text(text, source, None, 0, &params))
}

/// Split `text` into overlapping windows.
///
/// Ordinals start at `first_ordinal` and are contiguous. Offsets are
/// character offsets into `text`.
pub fn chunk_text(
    text: &str,
    source: &str,
    page: Option<u32>,
    first_ordinal: u32,
    params: &ChunkingParams,
) -> Vec<Chunk> {
    // Byte index of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut ordinal = first_ordinal;
    let mut start = 0usize;

    loop {
        let end = (start + params.chunk_size).min(char_len);
        let piece = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(source, page, ordinal, start, end, piece));
        ordinal += 1;

        if end == char_len {
            break;
        }
        start += params.stride();
    }

    chunks
}

/// Chunk every unit of a document, numbering ordinals across the whole
/// document in source order. Blank units (e.g. empty PDF pages) are skipped;
/// a document whose units are all blank yields no chunks.
pub fn chunk_document(doc: &Document, params: &ChunkingParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for unit in &doc.units {
        if unit.text.trim().is_empty() {
            continue;
        }
        let next = chunks.len() as u32;
        chunks.extend(chunk_text(&unit.text, &doc.source, unit.page, next, params));
    }
    chunks
}

/// Deterministic chunk id: UUIDv5 over `source#ordinal`.
pub fn chunk_id(source: &str, ordinal: u32) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}#{}", source, ordinal).as_bytes()).to_string()
}

/// Hex SHA-256 of chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    source: &str,
    page: Option<u32>,
    ordinal: u32,
    char_start: usize,
    char_end: usize,
    text: &str,
) -> Chunk {
    Chunk {
        id: chunk_id(source, ordinal),
        source: source.to_string(),
        page,
        ordinal,
        char_start,
        char_end,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
