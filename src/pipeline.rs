//! Pipeline orchestration.
//!
//! [`Pipeline`] is the one context object that owns the configured
//! providers, the vector index and its store. Every entry point (CLI,
//! HTTP) goes through it:
//!
//! - `initialize`: scan → load → chunk → embed → build → persist, or load
//!   the persisted index when one exists and matches the configured model.
//! - `ingest`: load → chunk → embed → append → persist for uploaded files,
//!   leaving previously indexed chunks untouched.
//! - `ask`: retrieve → generate under a single deadline.
//!
//! Lifecycle operations (`initialize`, `ingest`, `remove_document`) are
//! serialized by an async mutex so slow embedding work never happens under
//! the index's own write lock. `ask` and `health` never take it.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use docqa_core::chunk::{chunk_document, ChunkingParams};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::generate::AnswerGenerator;
use docqa_core::index::{IndexOp, IndexSpec, IndexState, IndexStore, VectorIndex};
use docqa_core::llm::LanguageModel;
use docqa_core::models::{
    Answer, Chunk, ChatTurn, Document, DocumentFormat, DocumentSummary, IndexEntry,
};
use docqa_core::retrieve::Retriever;
use docqa_core::{ProviderError, RagError, Result};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index_file::FileIndexStore;
use crate::llm::create_language_model;
use crate::loader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Uninitialized,
    Ready,
    /// The persisted or in-memory index does not match the configured
    /// embedding model; `initialize(true)` is required.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStatus {
    Built,
    Loaded,
    AlreadyReady,
}

/// A document or upload that could not be indexed.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub source: String,
    pub code: &'static str,
    pub message: String,
}

impl FileFailure {
    fn new(source: impl Into<String>, error: &RagError) -> Self {
        Self {
            source: source.into(),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub status: InitStatus,
    pub document_count: usize,
    pub chunk_count: usize,
    /// Files skipped for an unsupported format.
    pub skipped: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Every new file was indexed.
    Success,
    /// Some files were indexed, some failed.
    Partial,
    /// Nothing new: every file was already indexed.
    Skipped,
    /// No file could be indexed.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub message: String,
    pub ingested: Vec<String>,
    /// Identities already present in the index.
    pub skipped: Vec<String>,
    pub failures: Vec<FileFailure>,
    /// Chunks added by this call.
    pub chunk_count: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveReport {
    pub source: String,
    pub removed_chunks: usize,
    pub remaining_chunks: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` or `degraded`.
    pub status: &'static str,
    pub initialized: bool,
    pub state: PipelineStatus,
    pub index_state: IndexState,
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_model: String,
    pub llm_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An uploaded file: a plain file name plus its raw bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub question: String,
    pub chat_history: Vec<ChatTurn>,
    /// Overrides `generation.timeout_secs` for this call.
    pub timeout: Option<Duration>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

pub struct Pipeline {
    config: Config,
    params: ChunkingParams,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    store: Arc<dyn IndexStore>,
    retriever: Retriever,
    generator: AnswerGenerator,
    lifecycle: tokio::sync::Mutex<()>,
    stale: RwLock<Option<RagError>>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit providers and store.
    ///
    /// Fails with [`RagError::InvalidConfig`] when the configuration does
    /// not validate.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self> {
        config.validate()?;
        let params = config.chunking.params()?;

        let spec = IndexSpec {
            model: embedder.model_name().to_string(),
            dims: Some(embedder.dims()).filter(|d| *d > 0),
            metric: config.index.metric,
        };
        let index = Arc::new(VectorIndex::new(spec));
        let retriever = Retriever::new(embedder.clone(), index.clone());
        let generator = AnswerGenerator::new(model, config.generation_config());

        Ok(Self {
            config,
            params,
            embedder,
            index,
            store,
            retriever,
            generator,
            lifecycle: tokio::sync::Mutex::new(()),
            stale: RwLock::new(None),
        })
    }

    /// Build providers and the on-disk store from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let model: Arc<dyn LanguageModel> = Arc::from(create_language_model(&config.llm)?);
        let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(config.index.dir.clone()));
        Ok(Self::new(config, embedder, model, store)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn status(&self) -> PipelineStatus {
        if self.stale_error().is_some() {
            PipelineStatus::Stale
        } else if self.index.snapshot().is_some() {
            PipelineStatus::Ready
        } else {
            PipelineStatus::Uninitialized
        }
    }

    /// Make the index ready to answer questions.
    ///
    /// Without `force`, an in-memory index is reused and a persisted one is
    /// loaded. A persisted index that is corrupt is rebuilt; one built by a
    /// different embedding model marks the pipeline stale and fails.
    pub async fn initialize(&self, force: bool) -> Result<InitReport> {
        let _guard = self.lifecycle.lock().await;

        if !force {
            if self.stale_error().is_none() {
                if let Some(snapshot) = self.index.snapshot() {
                    return Ok(InitReport {
                        status: InitStatus::AlreadyReady,
                        document_count: snapshot.documents().len(),
                        chunk_count: snapshot.len(),
                        skipped: Vec::new(),
                        failures: Vec::new(),
                        persisted: self.store.exists(),
                    });
                }
            }

            match self.load_persisted().await {
                Ok(Some(chunk_count)) => {
                    return Ok(InitReport {
                        status: InitStatus::Loaded,
                        document_count: self.index.snapshot().map(|s| s.documents().len()).unwrap_or(0),
                        chunk_count,
                        skipped: Vec::new(),
                        failures: Vec::new(),
                        persisted: true,
                    });
                }
                Ok(None) => {}
                Err(RagError::CorruptIndex(msg)) => {
                    tracing::warn!(error = %msg, "persisted index is unusable, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }

        self.rebuild().await
    }

    /// Load the persisted index if one exists, without ever building.
    ///
    /// Used by one-shot commands that must see earlier work but should
    /// not embed the whole corpus as a side effect. Returns whether an
    /// index is in memory afterwards. An unreadable index file is an
    /// error here ([`RagError::CorruptIndex`]); only `initialize` replaces it.
    pub async fn resume(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        if self.index.snapshot().is_some() {
            return Ok(true);
        }
        Ok(self.load_persisted().await?.is_some())
    }

    /// Swap the persisted index into memory. `Ok(None)` when nothing is
    /// persisted. Callers hold the lifecycle lock.
    async fn load_persisted(&self) -> Result<Option<usize>> {
        if !self.store.exists() {
            return Ok(None);
        }
        let index = self.index.clone();
        let store = self.store.clone();
        match run_blocking(None, "index load", move || index.load(store.as_ref())).await {
            Ok(chunk_count) => {
                self.clear_stale();
                tracing::info!(
                    location = %self.store.location(),
                    chunks = chunk_count,
                    "loaded persisted index"
                );
                Ok(Some(chunk_count))
            }
            Err(e) => {
                if e.is_stale_index() {
                    tracing::warn!(error = %e, "persisted index does not match the embedding model");
                    self.mark_stale(&e);
                }
                Err(e)
            }
        }
    }

    async fn rebuild(&self) -> Result<InitReport> {
        let docs_config = self.config.documents.clone();
        let scan = run_blocking(None, "document scan", move || loader::scan(&docs_config)).await?;

        let mut failures: Vec<FileFailure> = scan
            .failures
            .iter()
            .map(|f| FileFailure::new(f.source.clone(), &f.error))
            .collect();

        let mut pending: Vec<(Chunk, DocumentFormat)> = Vec::new();
        let mut document_count = 0;
        for doc in &scan.documents {
            let chunks = chunk_document(doc, &self.params);
            if chunks.is_empty() {
                failures.push(no_text_failure(doc));
                continue;
            }
            document_count += 1;
            pending.extend(chunks.into_iter().map(|c| (c, doc.format)));
        }

        if pending.is_empty() {
            return Err(RagError::NoDocuments(
                self.config.documents.dir.display().to_string(),
            ));
        }

        tracing::info!(
            documents = document_count,
            chunks = pending.len(),
            model = %self.embedder.model_name(),
            "building index"
        );

        let entries = self.embed_entries(pending).await?;
        let chunk_count = self.index.apply(IndexOp::Build(entries))?;
        self.clear_stale();
        let persisted = self.persist().await;

        tracing::info!(documents = document_count, chunks = chunk_count, persisted, "index built");

        Ok(InitReport {
            status: InitStatus::Built,
            document_count,
            chunk_count,
            skipped: scan.skipped,
            failures,
            persisted,
        })
    }

    /// Add uploaded files to the index without touching existing entries.
    ///
    /// Uploads are also written into the document directory so a later
    /// rebuild includes them. Per-file problems are collected in the
    /// report; a dimensionality mismatch aborts the whole batch and marks
    /// the pipeline stale.
    pub async fn ingest(&self, files: Vec<UploadedFile>) -> Result<IngestReport> {
        if files.is_empty() {
            return Err(RagError::InvalidRequest("no files to ingest".to_string()));
        }
        let _guard = self.lifecycle.lock().await;
        if let Some(stale) = self.stale_error() {
            return Err(stale);
        }
        if self.index.snapshot().is_none() {
            // Appending to an empty index would overwrite the persisted one.
            match self.load_persisted().await {
                Ok(_) => {}
                Err(RagError::CorruptIndex(msg)) => {
                    tracing::warn!(error = %msg, "persisted index is unusable, starting a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let snapshot = self.index.snapshot();
        let mut skipped = Vec::new();
        let mut failures = Vec::new();
        let mut accepted: Vec<UploadedFile> = Vec::new();

        for file in files {
            if let Err(e) = validate_upload_name(&file.name) {
                failures.push(FileFailure::new(file.name.clone(), &e));
                continue;
            }
            let indexed = snapshot.as_ref().is_some_and(|s| s.contains_source(&file.name));
            if indexed || accepted.iter().any(|f| f.name == file.name) {
                tracing::info!(source = %file.name, "already indexed, skipping");
                skipped.push(file.name);
                continue;
            }
            accepted.push(file);
        }

        let docs_dir = self.config.documents.dir.clone();
        let loaded = run_blocking(None, "upload load", move || Ok(load_and_save(&docs_dir, accepted)))
            .await?;

        let mut ingested = Vec::new();
        let mut pending: Vec<(Chunk, DocumentFormat)> = Vec::new();
        for (name, result) in loaded {
            match result {
                Ok(doc) => {
                    let chunks = chunk_document(&doc, &self.params);
                    if chunks.is_empty() {
                        failures.push(no_text_failure(&doc));
                        continue;
                    }
                    pending.extend(chunks.into_iter().map(|c| (c, doc.format)));
                    ingested.push(name);
                }
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "upload rejected");
                    failures.push(FileFailure::new(name, &e));
                }
            }
        }

        let chunk_count = pending.len();
        let mut persisted = false;
        if !pending.is_empty() {
            let entries = self.embed_entries(pending).await?;
            match self.index.apply(IndexOp::Append(entries)) {
                Ok(total) => {
                    tracing::info!(files = ingested.len(), chunks = chunk_count, total, "ingested uploads");
                }
                Err(e) => {
                    if e.is_stale_index() {
                        self.mark_stale(&e);
                    }
                    return Err(e);
                }
            }
            persisted = self.persist().await;
        }

        let status = match (ingested.is_empty(), failures.is_empty()) {
            (false, true) => IngestStatus::Success,
            (false, false) => IngestStatus::Partial,
            (true, true) => IngestStatus::Skipped,
            (true, false) => IngestStatus::Failed,
        };
        let message = format!(
            "ingested {} file(s) ({} chunks), skipped {}, failed {}",
            ingested.len(),
            chunk_count,
            skipped.len(),
            failures.len()
        );

        Ok(IngestReport {
            status,
            message,
            ingested,
            skipped,
            failures,
            chunk_count,
            persisted,
        })
    }

    /// Answer a question from the indexed documents.
    ///
    /// Fails with [`RagError::NotReady`] before any document is indexed,
    /// without calling a provider. Retrieval and generation share one
    /// deadline; on expiry the result is [`RagError::Timeout`].
    pub async fn ask(&self, request: AskRequest) -> Result<Answer> {
        if self.index.is_empty() {
            return Err(RagError::NotReady);
        }
        if request.question.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        let deadline = request
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.generation.timeout_secs));
        let retriever = self.retriever.clone();
        let generator = self.generator.clone();
        let k = self.config.retrieval.k;
        let AskRequest {
            question,
            chat_history,
            ..
        } = request;

        let until = Instant::now() + deadline;
        let answer = run_blocking(Some(deadline), "question answering", move || {
            let retrieved = retriever.retrieve(&question, k)?;
            generator.generate(&question, &chat_history, &retrieved, Some(until))
        })
        .await;

        match answer {
            Err(RagError::NotInitialized) => Err(RagError::NotReady),
            Err(e) => {
                if e.is_stale_index() {
                    self.mark_stale(&e);
                }
                Err(e)
            }
            ok => ok,
        }
    }

    pub fn health(&self) -> HealthReport {
        let snapshot = self.index.snapshot();
        let stale = self.stale_error();
        HealthReport {
            status: if stale.is_some() { "degraded" } else { "healthy" },
            initialized: snapshot.is_some(),
            state: self.status(),
            index_state: self.index.state(),
            document_count: snapshot.as_ref().map(|s| s.documents().len()).unwrap_or(0),
            chunk_count: snapshot.as_ref().map(|s| s.len()).unwrap_or(0),
            embedding_model: self.embedder.model_name().to_string(),
            llm_model: self.generator.model_name().to_string(),
            message: stale.map(|e| e.to_string()),
        }
    }

    /// Indexed documents, sorted by source identity.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.index
            .snapshot()
            .map(|s| s.documents())
            .unwrap_or_default()
    }

    /// Remove every entry of `source` from the index and persist.
    ///
    /// The file in the document directory is left alone, so a forced
    /// rebuild indexes it again.
    pub async fn remove_document(&self, source: &str) -> Result<RemoveReport> {
        let _guard = self.lifecycle.lock().await;

        let before = self.index.len();
        let remaining = match self.index.apply(IndexOp::RemoveSource(source.to_string())) {
            Ok(remaining) => remaining,
            Err(RagError::NotInitialized) => return Err(RagError::NotReady),
            Err(e) => return Err(e),
        };

        let persisted = if remaining == 0 {
            let store = self.store.clone();
            match run_blocking(None, "index clear", move || store.clear()).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to clear persisted index");
                    false
                }
            }
        } else {
            self.persist().await
        };

        tracing::info!(%source, removed = before - remaining, remaining, "removed document");

        Ok(RemoveReport {
            source: source.to_string(),
            removed_chunks: before - remaining,
            remaining_chunks: remaining,
            persisted,
        })
    }

    /// Embed chunks in `embedding.batch_size` batches, each call bounded
    /// by the embedding deadline.
    async fn embed_entries(&self, pending: Vec<(Chunk, DocumentFormat)>) -> Result<Vec<IndexEntry>> {
        let batch_size = self.config.embedding.batch_size.max(1);
        let deadline = self.config.embedding.call_deadline();
        let ingested_at = Utc::now().timestamp();
        let total = pending.len();

        let mut entries = Vec::with_capacity(total);
        for (n, batch) in pending.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let embedder = self.embedder.clone();
            let vectors = run_blocking(Some(deadline), "embedding batch", move || {
                embedder.embed_batch(&texts).map_err(RagError::from)
            })
            .await?;

            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingError(ProviderError::Malformed(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))));
            }

            for ((chunk, format), vector) in batch.iter().zip(vectors) {
                entries.push(IndexEntry {
                    chunk: chunk.clone(),
                    vector,
                    format: *format,
                    ingested_at,
                });
            }
            tracing::debug!(batch = n + 1, embedded = entries.len(), total, "embedded batch");
        }
        Ok(entries)
    }

    /// Persist the current snapshot. Failure is logged, not returned: the
    /// in-memory index stays authoritative until the next successful write.
    async fn persist(&self) -> bool {
        let index = self.index.clone();
        let store = self.store.clone();
        match run_blocking(None, "index persist", move || index.persist(store.as_ref())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(location = %self.store.location(), error = %e, "failed to persist index");
                false
            }
        }
    }

    fn stale_error(&self) -> Option<RagError> {
        self.stale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_stale(&self, error: &RagError) {
        *self.stale.write().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
    }

    fn clear_stale(&self) {
        *self.stale.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Run blocking work off the async runtime, optionally under a deadline.
async fn run_blocking<T, F>(deadline: Option<Duration>, what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    let joined = match deadline {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| RagError::Timeout(format!("{} exceeded {}s", what, limit.as_secs_f32())))?,
        None => task.await,
    };
    joined.map_err(|e| RagError::Internal(format!("{} task failed: {}", what, e)))?
}

/// Upload names must be plain file names: no directories, no hidden files.
fn validate_upload_name(name: &str) -> Result<()> {
    let plain = !name.trim().is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().map(|f| f == name).unwrap_or(false);
    if plain {
        Ok(())
    } else {
        Err(RagError::InvalidRequest(format!(
            "'{}' is not a plain file name",
            name
        )))
    }
}

/// Parse each upload and, when it parses, save it into the document
/// directory.
fn load_and_save(dir: &Path, files: Vec<UploadedFile>) -> Vec<(String, Result<Document>)> {
    files
        .into_iter()
        .map(|file| {
            let result = loader::load_bytes(&file.name, &file.bytes).and_then(|doc| {
                std::fs::create_dir_all(dir)
                    .and_then(|_| std::fs::write(dir.join(&file.name), &file.bytes))
                    .map_err(|e| {
                        RagError::Storage(format!(
                            "failed to save {} into {}: {}",
                            file.name,
                            dir.display(),
                            e
                        ))
                    })?;
                Ok(doc)
            });
            (file.name, result)
        })
        .collect()
}

fn no_text_failure(doc: &Document) -> FileFailure {
    FileFailure::new(
        doc.source.clone(),
        &RagError::load(doc.source.clone(), None, "no extractable text"),
    )
}
