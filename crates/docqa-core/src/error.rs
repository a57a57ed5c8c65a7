//! Error taxonomy shared by every pipeline stage.
//!
//! [`RagError`] is what pipeline operations return. [`ProviderError`] is what
//! the external capability providers (embedding model, language model)
//! return; the stage that called the provider wraps it into the matching
//! [`RagError`] variant.

use thiserror::Error;

/// Failure reported by an embedding or language-model provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider is disabled: {0}")]
    Disabled(String),
}

impl ProviderError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Timeout(_) | ProviderError::Unavailable(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum RagError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to load {document}{}: {message}", page_suffix(.page))]
    LoadError {
        document: String,
        page: Option<u32>,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("embedding dimensionality mismatch: index has {expected}, got {actual}; run initialize with force to rebuild")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with embedding model '{indexed}' but '{configured}' is configured; run initialize with force to rebuild")]
    ModelMismatch { indexed: String, configured: String },

    #[error("vector index has not been built")]
    NotInitialized,

    #[error("pipeline is not ready: initialize or ingest documents first")]
    NotReady,

    #[error("no loadable documents found in {0}")]
    NoDocuments(String),

    #[error("embedding failed: {0}")]
    EmbeddingError(ProviderError),

    #[error("generation failed after {attempts} attempt(s): {cause}")]
    GenerationError { attempts: u32, cause: ProviderError },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("persisted index is unusable: {0}")]
    CorruptIndex(String),

    #[error("index storage failed: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn load(document: impl Into<String>, page: Option<u32>, message: impl ToString) -> Self {
        RagError::LoadError {
            document: document.into(),
            page,
            message: message.to_string(),
        }
    }

    /// Stable snake_case identifier, used in API error bodies and reports.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::LoadError { .. } => "load_error",
            RagError::InvalidConfig(_) => "invalid_config",
            RagError::InvalidRequest(_) => "invalid_request",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::ModelMismatch { .. } => "model_mismatch",
            RagError::NotInitialized => "not_initialized",
            RagError::NotReady => "not_ready",
            RagError::NoDocuments(_) => "no_documents",
            RagError::EmbeddingError(_) => "embedding_error",
            RagError::GenerationError { .. } => "generation_error",
            RagError::Timeout(_) => "timeout",
            RagError::CorruptIndex(_) => "corrupt_index",
            RagError::Storage(_) => "storage_error",
            RagError::Internal(_) => "internal",
        }
    }

    /// Whether this error means the persisted or in-memory index no longer
    /// matches the configured embedding model.
    pub fn is_stale_index(&self) -> bool {
        matches!(
            self,
            RagError::DimensionMismatch { .. } | RagError::ModelMismatch { .. }
        )
    }
}

/// Maps an embedding provider failure to the pipeline taxonomy. A provider
/// timeout surfaces as [`RagError::Timeout`], everything else as
/// [`RagError::EmbeddingError`].
impl From<ProviderError> for RagError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(msg) => RagError::Timeout(format!("embedding provider: {}", msg)),
            other => RagError::EmbeddingError(other),
        }
    }
}

fn page_suffix(page: &Option<u32>) -> String {
    page.map(|p| format!(" (page {})", p)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, RagError>;
