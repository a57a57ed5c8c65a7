//! Question → top-k passages.
//!
//! The retriever embeds the question with the same provider that embedded
//! the corpus and asks the [`VectorIndex`] for the nearest chunks. It never
//! degrades to an empty result on provider failure: the error surfaces.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Return up to `k` chunks most similar to `question`.
    ///
    /// Fails with [`RagError::InvalidRequest`] for a blank question or
    /// `k == 0`, and with [`RagError::NotInitialized`] before the index has
    /// been built. Neither case calls the embedding provider.
    pub fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be >= 1".to_string()));
        }
        if self.index.snapshot().is_none() {
            return Err(RagError::NotInitialized);
        }

        let vector = self.embedder.embed(question)?;
        self.index.query(&vector, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_id, content_hash};
    use crate::embedding::SimilarityMetric;
    use crate::error::ProviderError;
    use crate::index::{IndexOp, IndexSpec};
    use crate::models::{Chunk, DocumentFormat, IndexEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps a few keywords onto fixed axes.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            3
        }
        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.matches("rust").count() as f32,
                        t.matches("python").count() as f32,
                        0.1,
                    ]
                })
                .collect())
        }
    }

    struct FailingEmbedder(ProviderError);

    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            3
        }
        fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Err(self.0.clone())
        }
    }

    fn entry(source: &str, ordinal: u32, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id(source, ordinal),
                source: source.to_string(),
                page: None,
                ordinal,
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
                hash: content_hash(text),
            },
            vector,
            format: DocumentFormat::Text,
            ingested_at: 0,
        }
    }

    fn built_index() -> Arc<VectorIndex> {
        let index = Arc::new(VectorIndex::new(IndexSpec {
            model: "keyword".to_string(),
            dims: Some(3),
            metric: SimilarityMetric::Cosine,
        }));
        index
            .apply(IndexOp::Build(vec![
                entry("rust.txt", 0, "Rust is fast", vec![1.0, 0.0, 0.1]),
                entry("python.txt", 0, "Python is dynamic", vec![0.0, 1.0, 0.1]),
                entry("both.txt", 0, "Rust and Python", vec![1.0, 1.0, 0.1]),
            ]))
            .unwrap();
        index
    }

    fn keyword() -> Arc<KeywordEmbedder> {
        Arc::new(KeywordEmbedder {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_retrieve_ranks_by_similarity() {
        let retriever = Retriever::new(keyword(), built_index());
        let hits = retriever.retrieve("tell me about rust", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source, "rust.txt");
        assert_eq!(hits[1].chunk.source, "both.txt");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_k_larger_than_index() {
        let retriever = Retriever::new(keyword(), built_index());
        assert_eq!(retriever.retrieve("python", 50).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_question_skips_provider() {
        let embedder = keyword();
        let retriever = Retriever::new(embedder.clone(), built_index());
        assert!(matches!(
            retriever.retrieve("   ", 3),
            Err(RagError::InvalidRequest(_))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unbuilt_index_skips_provider() {
        let embedder = keyword();
        let index = Arc::new(VectorIndex::new(IndexSpec {
            model: "keyword".to_string(),
            dims: None,
            metric: SimilarityMetric::Cosine,
        }));
        let retriever = Retriever::new(embedder.clone(), index);
        assert!(matches!(
            retriever.retrieve("rust", 3),
            Err(RagError::NotInitialized)
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_provider_failure_surfaces() {
        let retriever = Retriever::new(
            Arc::new(FailingEmbedder(ProviderError::Unavailable("down".into()))),
            built_index(),
        );
        assert!(matches!(
            retriever.retrieve("rust", 3),
            Err(RagError::EmbeddingError(ProviderError::Unavailable(_)))
        ));

        let retriever = Retriever::new(
            Arc::new(FailingEmbedder(ProviderError::Timeout("30s".into()))),
            built_index(),
        );
        assert!(matches!(retriever.retrieve("rust", 3), Err(RagError::Timeout(_))));
    }
}
