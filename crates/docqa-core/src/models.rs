//! Core data models used throughout docqa.
//!
//! These types represent the documents, chunks, index entries, and answers
//! that flow through the ingestion and question-answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source format of a loaded document, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Text,
}

impl DocumentFormat {
    /// Resolve a format from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "txt" | "md" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Text => "text",
        }
    }
}

/// One unit of loaded text: a PDF page or a whole text file.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnit {
    pub text: String,
    /// 1-based page number for PDFs, `None` for plain text.
    pub page: Option<u32>,
}

/// A loaded document. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identity: path relative to the document directory, or upload name.
    pub source: String,
    pub format: DocumentFormat,
    pub units: Vec<TextUnit>,
    pub loaded_at: DateTime<Utc>,
}

impl Document {
    /// Total characters across all units.
    pub fn char_count(&self) -> usize {
        self.units.iter().map(|u| u.text.chars().count()).sum()
    }
}

/// A bounded span of a document's text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic UUID derived from `source` and `ordinal`.
    pub id: String,
    pub source: String,
    pub page: Option<u32>,
    /// Position within the source document, contiguous from 0.
    pub ordinal: u32,
    /// Character offset (inclusive) within the originating text unit.
    pub char_start: usize,
    /// Character offset (exclusive) within the originating text unit.
    pub char_end: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A chunk together with its embedding and ingestion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub format: DocumentFormat,
    /// Unix timestamp (seconds) of ingestion.
    pub ingested_at: i64,
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ordered retrieval output: at most `k` hits, descending similarity.
pub type RetrievalResult = Vec<ScoredChunk>;

/// A source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub source: String,
    pub page: Option<u32>,
    /// Ordinal of the best-ranked chunk of this source that was cited.
    pub position: u32,
}

/// A generated answer plus the sources it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Distinct sources, in order of their best-ranked included chunk.
    pub sources: Vec<Citation>,
    /// The chunks that were actually placed in the prompt.
    pub passages: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Summary of one indexed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub source: String,
    pub format: DocumentFormat,
    pub ingested_at: DateTime<Utc>,
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("txt"), Some(DocumentFormat::Text));
        assert_eq!(DocumentFormat::from_extension("md"), Some(DocumentFormat::Text));
        assert_eq!(DocumentFormat::from_extension("docx"), None);
    }
}
