//! On-disk encoding of an index snapshot.
//!
//! A single JSON envelope carries the index identity (model, dims, metric),
//! a SHA-256 checksum over every entry, and the entries themselves with
//! vectors as base64 little-endian `f32` blobs. Decoding verifies all of it
//! before anything is installed, so a partially written or hand-edited file
//! is reported as corrupt instead of being served.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::content_hash;
use crate::embedding::{blob_to_vec, vec_to_blob, SimilarityMetric};
use crate::error::{RagError, Result};
use crate::models::{Chunk, DocumentFormat, IndexEntry};

use super::{IndexSpec, Snapshot};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    model: String,
    dims: usize,
    metric: SimilarityMetric,
    saved_at: DateTime<Utc>,
    checksum: String,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    chunk: Chunk,
    format: DocumentFormat,
    ingested_at: i64,
    vector: String,
}

pub(super) fn encode(spec: &IndexSpec, snapshot: &Snapshot) -> Result<Vec<u8>> {
    let entries: Vec<StoredEntry> = snapshot
        .entries()
        .map(|e| StoredEntry {
            chunk: e.chunk.clone(),
            format: e.format,
            ingested_at: e.ingested_at,
            vector: BASE64.encode(vec_to_blob(&e.vector)),
        })
        .collect();

    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        model: spec.model.clone(),
        dims: snapshot.dims(),
        metric: spec.metric,
        saved_at: Utc::now(),
        checksum: checksum(&entries),
        entries,
    };

    serde_json::to_vec(&envelope).map_err(|e| RagError::Storage(format!("encode index: {}", e)))
}

pub(super) fn decode(bytes: &[u8], spec: &IndexSpec) -> Result<Snapshot> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| RagError::CorruptIndex(format!("unreadable index file: {}", e)))?;

    if envelope.format_version != FORMAT_VERSION {
        return Err(RagError::CorruptIndex(format!(
            "unsupported index format version {}",
            envelope.format_version
        )));
    }
    if envelope.model != spec.model {
        return Err(RagError::ModelMismatch {
            indexed: envelope.model,
            configured: spec.model.clone(),
        });
    }
    if let Some(dims) = spec.dims {
        if dims != envelope.dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: envelope.dims,
            });
        }
    }
    if envelope.metric != spec.metric {
        return Err(RagError::CorruptIndex(format!(
            "index was built with metric {} but {} is configured",
            envelope.metric.as_str(),
            spec.metric.as_str()
        )));
    }
    if envelope.entries.is_empty() || envelope.dims == 0 {
        return Err(RagError::CorruptIndex("index file has no entries".to_string()));
    }
    if checksum(&envelope.entries) != envelope.checksum {
        return Err(RagError::CorruptIndex("checksum mismatch".to_string()));
    }

    let dims = envelope.dims;
    let vector_bytes = dims.checked_mul(4).ok_or_else(|| {
        RagError::CorruptIndex(format!("implausible vector dimensionality {}", dims))
    })?;
    let mut entries = Vec::with_capacity(envelope.entries.len());
    for stored in envelope.entries {
        let blob = BASE64.decode(stored.vector.as_bytes()).map_err(|e| {
            RagError::CorruptIndex(format!("chunk {}: bad vector encoding: {}", stored.chunk.id, e))
        })?;
        if blob.len() != vector_bytes {
            return Err(RagError::CorruptIndex(format!(
                "chunk {}: vector has {} bytes, expected {}",
                stored.chunk.id,
                blob.len(),
                vector_bytes
            )));
        }
        if content_hash(&stored.chunk.text) != stored.chunk.hash {
            return Err(RagError::CorruptIndex(format!(
                "chunk {}: text does not match its hash",
                stored.chunk.id
            )));
        }
        entries.push(Arc::new(IndexEntry {
            chunk: stored.chunk,
            vector: blob_to_vec(&blob),
            format: stored.format,
            ingested_at: stored.ingested_at,
        }));
    }

    Ok(Snapshot::new(entries, dims))
}

fn checksum(entries: &[StoredEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.chunk.id.as_bytes());
        hasher.update(entry.chunk.hash.as_bytes());
        hasher.update(entry.vector.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;

    fn spec() -> IndexSpec {
        IndexSpec {
            model: "m".to_string(),
            dims: None,
            metric: SimilarityMetric::Cosine,
        }
    }

    fn snapshot() -> Snapshot {
        let text = "some text".to_string();
        let entry = IndexEntry {
            chunk: Chunk {
                id: chunk_id("a.txt", 0),
                source: "a.txt".to_string(),
                page: None,
                ordinal: 0,
                char_start: 0,
                char_end: 9,
                hash: content_hash(&text),
                text,
            },
            vector: vec![0.5, -0.25, 1.0],
            format: DocumentFormat::Text,
            ingested_at: 1_700_000_000,
        };
        Snapshot::new(vec![Arc::new(entry)], 3)
    }

    fn envelope_json() -> serde_json::Value {
        let bytes = encode(&spec(), &snapshot()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn roundtrip_preserves_vectors_exactly() {
        let bytes = encode(&spec(), &snapshot()).unwrap();
        let decoded = decode(&bytes, &spec()).unwrap();
        assert_eq!(decoded.dims(), 3);
        let entry = decoded.entries().next().unwrap();
        assert_eq!(entry.vector, vec![0.5, -0.25, 1.0]);
        assert_eq!(entry.chunk.text, "some text");
    }

    #[test]
    fn tampered_text_is_corrupt() {
        let mut json = envelope_json();
        json["entries"][0]["chunk"]["text"] = "other text".into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(decode(&bytes, &spec()), Err(RagError::CorruptIndex(_))));
    }

    #[test]
    fn tampered_vector_fails_checksum() {
        let mut json = envelope_json();
        json["entries"][0]["vector"] = BASE64.encode(vec_to_blob(&[9.0, 9.0, 9.0])).into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(decode(&bytes, &spec()), Err(RagError::CorruptIndex(_))));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let mut json = envelope_json();
        json["format_version"] = 99.into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(decode(&bytes, &spec()), Err(RagError::CorruptIndex(_))));
    }

    #[test]
    fn oversized_dims_are_corrupt() {
        let mut json = envelope_json();
        json["dims"] = (usize::MAX as u64).into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(matches!(decode(&bytes, &spec()), Err(RagError::CorruptIndex(_))));
    }

    #[test]
    fn pinned_dims_must_match() {
        let bytes = encode(&spec(), &snapshot()).unwrap();
        let pinned = IndexSpec {
            dims: Some(768),
            ..spec()
        };
        assert!(matches!(
            decode(&bytes, &pinned),
            Err(RagError::DimensionMismatch {
                expected: 768,
                actual: 3
            })
        ));
    }

    #[test]
    fn metric_change_is_rejected() {
        let bytes = encode(&spec(), &snapshot()).unwrap();
        let other = IndexSpec {
            metric: SimilarityMetric::InnerProduct,
            ..spec()
        };
        assert!(matches!(decode(&bytes, &other), Err(RagError::CorruptIndex(_))));
    }
}
