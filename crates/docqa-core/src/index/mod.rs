//! Vector index with snapshot swapping and pluggable persistence.
//!
//! The [`VectorIndex`] holds `(vector, chunk, metadata)` entries and answers
//! nearest-neighbor queries by brute-force scoring with the instance's
//! fixed [`SimilarityMetric`]. Durable storage is delegated to an
//! [`IndexStore`] backend that only moves opaque bytes.
//!
//! # Concurrency
//!
//! All writes go through [`VectorIndex::apply`], which takes a single writer
//! lock, builds a complete new [`Snapshot`] off to the side, and swaps it in
//! under a short write lock. Readers clone the current `Arc<Snapshot>` and
//! score without holding any lock, so a query that started before a swap
//! finishes against the snapshot it started with.
//!
//! # State machine
//!
//! ```text
//! Empty ──build/append──▶ Building ──swap──▶ Ready
//!                                  ▲           │
//!                                  └─rebuild───┘   (append: Ready → Ready)
//! ```

pub mod memory;
mod persist;

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embedding::SimilarityMetric;
use crate::error::{RagError, Result};
use crate::models::{DocumentSummary, IndexEntry, RetrievalResult, ScoredChunk};

/// Storage backend for a persisted index.
///
/// Backends move opaque bytes; the encoding is owned by [`VectorIndex`].
/// A write must replace the previous contents atomically.
pub trait IndexStore: Send + Sync {
    /// Human-readable location for log and error messages.
    fn location(&self) -> String;
    /// Whether a persisted index is present.
    fn exists(&self) -> bool;
    fn read(&self) -> Result<Vec<u8>>;
    fn write(&self, bytes: &[u8]) -> Result<()>;
    /// Remove the persisted index, if any.
    fn clear(&self) -> Result<()>;
}

/// Identity of an index instance: which model produced its vectors, an
/// optional pinned dimensionality, and the similarity metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub model: String,
    /// When set, every vector must have exactly this many dimensions.
    pub dims: Option<usize>,
    pub metric: SimilarityMetric,
}

/// A write against the index, consumed by the single writer path.
#[derive(Debug, Clone)]
pub enum IndexOp {
    /// Replace the entire index.
    Build(Vec<IndexEntry>),
    /// Add entries without disturbing existing ones.
    Append(Vec<IndexEntry>),
    /// Remove every entry of one source document.
    RemoveSource(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Building,
    Ready,
}

/// An immutable, fully constructed view of the index.
#[derive(Debug)]
pub struct Snapshot {
    entries: Vec<Arc<IndexEntry>>,
    dims: usize,
    built_at: DateTime<Utc>,
}

impl Snapshot {
    fn new(entries: Vec<Arc<IndexEntry>>, dims: usize) -> Self {
        Self {
            entries,
            dims,
            built_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter().map(|e| e.as_ref())
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.entries.iter().any(|e| e.chunk.source == source)
    }

    /// Per-document summaries, sorted by source.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let mut by_source: BTreeMap<&str, DocumentSummary> = BTreeMap::new();
        for entry in &self.entries {
            let summary = by_source
                .entry(entry.chunk.source.as_str())
                .or_insert_with(|| DocumentSummary {
                    source: entry.chunk.source.clone(),
                    format: entry.format,
                    ingested_at: DateTime::from_timestamp(entry.ingested_at, 0)
                        .unwrap_or_default(),
                    chunk_count: 0,
                });
            summary.chunk_count += 1;
        }
        by_source.into_values().collect()
    }
}

/// In-memory vector index. See the module docs for the locking discipline.
pub struct VectorIndex {
    spec: IndexSpec,
    current: RwLock<Option<Arc<Snapshot>>>,
    writer: Mutex<()>,
    building: AtomicBool,
}

impl VectorIndex {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            current: RwLock::new(None),
            writer: Mutex::new(()),
            building: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn state(&self) -> IndexState {
        if self.building.load(Ordering::SeqCst) {
            IndexState::Building
        } else if self.snapshot().is_some() {
            IndexState::Ready
        } else {
            IndexState::Empty
        }
    }

    /// The current consistent snapshot, if any write has completed.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a write. Returns the number of entries after the write.
    ///
    /// On error the previous snapshot stays in place untouched.
    pub fn apply(&self, op: IndexOp) -> Result<usize> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        self.building.store(true, Ordering::SeqCst);
        let next = self.prepare(op);
        let next = match next {
            Ok(next) => next,
            Err(e) => {
                self.building.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let len = next.as_ref().map(|s| s.len()).unwrap_or(0);
        self.install(next);
        self.building.store(false, Ordering::SeqCst);
        Ok(len)
    }

    /// Return up to `k` entries nearest to `vector`, descending by score,
    /// ties broken by chunk ordinal, then source.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        let snapshot = self.snapshot().ok_or(RagError::NotInitialized)?;
        if vector.len() != snapshot.dims {
            return Err(RagError::DimensionMismatch {
                expected: snapshot.dims,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = snapshot
            .entries()
            .map(|entry| (self.spec.metric.score(vector, &entry.vector), entry))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then(a.chunk.ordinal.cmp(&b.chunk.ordinal))
                .then_with(|| a.chunk.source.cmp(&b.chunk.source))
                .then(a.chunk.page.cmp(&b.chunk.page))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }

    /// Write the current snapshot to `store`.
    pub fn persist(&self, store: &dyn IndexStore) -> Result<()> {
        let snapshot = self.snapshot().ok_or(RagError::NotInitialized)?;
        let bytes = persist::encode(&self.spec, &snapshot)?;
        store.write(&bytes)
    }

    /// Replace the in-memory index with the one persisted in `store`.
    ///
    /// Missing or unreadable stores fail with [`RagError::CorruptIndex`];
    /// callers are expected to rebuild in that case.
    pub fn load(&self, store: &dyn IndexStore) -> Result<usize> {
        if !store.exists() {
            return Err(RagError::CorruptIndex(format!(
                "no persisted index at {}",
                store.location()
            )));
        }
        let bytes = store
            .read()
            .map_err(|e| RagError::CorruptIndex(e.to_string()))?;
        let snapshot = persist::decode(&bytes, &self.spec)?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let len = snapshot.len();
        self.install(Some(Arc::new(snapshot)));
        Ok(len)
    }

    fn install(&self, next: Option<Arc<Snapshot>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn prepare(&self, op: IndexOp) -> Result<Option<Arc<Snapshot>>> {
        match op {
            IndexOp::Build(entries) => {
                if entries.is_empty() {
                    return Err(RagError::InvalidRequest(
                        "cannot build an index without entries".to_string(),
                    ));
                }
                let dims = self.check_dims(&entries, self.spec.dims)?;
                let entries = entries.into_iter().map(Arc::new).collect();
                Ok(Some(Arc::new(Snapshot::new(entries, dims))))
            }
            IndexOp::Append(entries) => {
                if entries.is_empty() {
                    return Ok(self.snapshot());
                }
                let current = self.snapshot();
                let expected = current.as_ref().map(|s| s.dims).or(self.spec.dims);
                let dims = self.check_dims(&entries, expected)?;

                let mut merged: Vec<Arc<IndexEntry>> = match &current {
                    Some(snapshot) => {
                        let existing: HashSet<&str> = snapshot
                            .entries
                            .iter()
                            .map(|e| e.chunk.source.as_str())
                            .collect();
                        if let Some(dup) = entries
                            .iter()
                            .find(|e| existing.contains(e.chunk.source.as_str()))
                        {
                            return Err(RagError::InvalidRequest(format!(
                                "document already indexed: {}",
                                dup.chunk.source
                            )));
                        }
                        snapshot.entries.clone()
                    }
                    None => Vec::with_capacity(entries.len()),
                };
                merged.extend(entries.into_iter().map(Arc::new));
                Ok(Some(Arc::new(Snapshot::new(merged, dims))))
            }
            IndexOp::RemoveSource(source) => {
                let current = self.snapshot().ok_or(RagError::NotInitialized)?;
                if !current.contains_source(&source) {
                    return Err(RagError::InvalidRequest(format!(
                        "document not indexed: {}",
                        source
                    )));
                }
                let kept: Vec<Arc<IndexEntry>> = current
                    .entries
                    .iter()
                    .filter(|e| e.chunk.source != source)
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Arc::new(Snapshot::new(kept, current.dims))))
                }
            }
        }
    }

    /// Check every vector against `expected` (or the first vector when no
    /// dimensionality is established yet) and return the dimensionality.
    fn check_dims(&self, entries: &[IndexEntry], expected: Option<usize>) -> Result<usize> {
        let dims = match expected {
            Some(d) => d,
            None => entries.first().map(|e| e.vector.len()).unwrap_or(0),
        };
        if dims == 0 {
            return Err(RagError::InvalidRequest(
                "embedding vectors must not be empty".to_string(),
            ));
        }
        for entry in entries {
            if entry.vector.len() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: entry.vector.len(),
                });
            }
        }
        Ok(dims)
    }
}
