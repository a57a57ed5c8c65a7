//! TOML configuration.
//!
//! Every section and field is optional; an empty file is a working
//! configuration that indexes `./documents` into `./vector_store` and
//! answers with Groq once `GROQ_API_KEY` is set. Embeddings are disabled
//! until `[embedding]` names a provider.
//!
//! ```toml
//! [documents]
//! dir = "./documents"
//! exclude_globs = ["drafts/**"]
//!
//! [index]
//! dir = "./vector_store"
//! metric = "cosine"            # or "inner_product"
//!
//! [chunking]
//! chunk_size = 1000            # characters
//! overlap = 200
//!
//! [retrieval]
//! k = 3
//!
//! [embedding]
//! provider = "openai"          # disabled | openai | ollama | local
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"          # any OpenAI-compatible chat endpoint
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama-3.3-70b-versatile"
//! api_key_env = "GROQ_API_KEY"
//!
//! [generation]
//! max_prompt_chars = 12000
//! timeout_secs = 120
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! [`load_config`] parses and then runs [`Config::validate`], so a loaded
//! config is always usable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docqa_core::chunk::ChunkingParams;
use docqa_core::embedding::SimilarityMetric;
use docqa_core::generate::GenerationConfig;
use docqa_core::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./documents")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub metric: SimilarityMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            metric: SimilarityMetric::Cosine,
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./vector_store")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> docqa_core::Result<ChunkingParams> {
        ChunkingParams::new(self.chunk_size, self.overlap)
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Upper bound for one provider call, including its retries and backoff.
    pub fn call_deadline(&self) -> Duration {
        let backoff: u64 = (0..self.max_retries).map(|i| 1u64 << i.min(5)).sum();
        Duration::from_secs(self.timeout_secs * (u64::from(self.max_retries) + 1) + backoff)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_llm_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_llm_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    1024
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationSettings {
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    /// Deadline for one `ask`, retrieval and generation together.
    #[serde(default = "default_ask_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            max_history_turns: default_max_history_turns(),
            timeout_secs: default_ask_timeout_secs(),
        }
    }
}

fn default_max_prompt_chars() -> usize {
    12_000
}
fn default_max_history_turns() -> usize {
    6
}
fn default_ask_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Generator settings assembled from `[llm]` and `[generation]`.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_prompt_chars: self.generation.max_prompt_chars,
            max_tokens: self.llm.max_tokens,
            max_retries: self.llm.max_retries,
            backoff_base: Duration::from_millis(self.llm.backoff_ms),
            max_history_turns: self.generation.max_history_turns,
        }
    }

    /// Check cross-field constraints. Violations are [`RagError::InvalidConfig`].
    pub fn validate(&self) -> docqa_core::Result<()> {
        self.chunking.params()?;

        if self.retrieval.k < 1 {
            return Err(invalid("retrieval.k must be >= 1"));
        }
        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size must be > 0"));
        }
        if self.generation.timeout_secs == 0 {
            return Err(invalid("generation.timeout_secs must be > 0"));
        }
        if self.generation.max_prompt_chars == 0 {
            return Err(invalid("generation.max_prompt_chars must be > 0"));
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                return Err(invalid(&format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.model.is_none() {
                return Err(invalid(&format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(invalid(&format!(
                    "unknown embedding provider '{}': must be disabled, openai, ollama, or local",
                    other
                )))
            }
        }

        match self.llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => {
                return Err(invalid(&format!(
                    "unknown llm provider '{}': must be disabled or openai",
                    other
                )))
            }
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature must be in [0.0, 2.0]"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> RagError {
    RagError::InvalidConfig(msg.to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
