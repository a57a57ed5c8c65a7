//! Shared fixtures for the integration tests: deterministic providers and
//! a small document corpus on disk.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use docqa::config::Config;
use docqa::index_file::FileIndexStore;
use docqa::pipeline::Pipeline;
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::llm::LanguageModel;
use docqa_core::ProviderError;

const VOCAB: [&str; 3] = ["refund", "shipping", "warranty"];

/// Embeds text as keyword counts plus a constant component, so texts
/// about the same topic land close together.
pub struct KeywordEmbedder {
    model: String,
    pub calls: Arc<AtomicUsize>,
    query_delay: Mutex<Option<Duration>>,
}

impl KeywordEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
            query_delay: Mutex::new(None),
        }
    }

    /// From now on, stall every single-text call (a question) for `delay`.
    pub fn slow_queries(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.len() == 1 {
            if let Some(delay) = *self.query_delay.lock().unwrap() {
                std::thread::sleep(delay);
            }
        }
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = VOCAB.iter().map(|w| lower.matches(w).count() as f32).collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

pub enum Reply {
    Text(String),
    Fail(ProviderError),
    Sleep(Duration),
}

/// Language model with a scripted reply that records every prompt.
pub struct FakeModel {
    reply: Reply,
    pub calls: Arc<AtomicUsize>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeModel {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(Reply::Text(text.to_string()))
    }
}

impl LanguageModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake-llm"
    }

    fn complete(&self, prompt: &str, _max_tokens: usize) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(err) => Err(err.clone()),
            Reply::Sleep(d) => {
                std::thread::sleep(*d);
                Ok("too late".to_string())
            }
        }
    }
}

pub const REFUNDS: &str = "Refund requests are accepted within 30 days of purchase. \
The refund is paid back to the original card.";
pub const SHIPPING: &str = "Shipping takes five business days. Express shipping costs extra \
and arrives the next day.";

/// A temp workspace with `documents/refunds.txt` and `documents/shipping.md`
/// and a config pointing at it.
pub fn workspace() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("documents");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("refunds.txt"), REFUNDS).unwrap();
    fs::write(docs.join("shipping.md"), SHIPPING).unwrap();

    let config = config_for(tmp.path());
    (tmp, config)
}

pub fn config_for(root: &Path) -> Config {
    let mut config = Config::default();
    config.documents.dir = root.join("documents");
    config.index.dir = root.join("vector_store");
    config.chunking.chunk_size = 200;
    config.chunking.overlap = 20;
    config.llm.backoff_ms = 1;
    config
}

pub fn pipeline_with(
    config: &Config,
    embedder: Arc<KeywordEmbedder>,
    model: Arc<FakeModel>,
) -> Pipeline {
    let store = Arc::new(FileIndexStore::new(config.index.dir.clone()));
    Pipeline::new(config.clone(), embedder, model, store).unwrap()
}

pub fn pipeline(config: &Config) -> Pipeline {
    pipeline_with(
        config,
        Arc::new(KeywordEmbedder::new("keyword-v1")),
        Arc::new(FakeModel::answering("Refunds are accepted within 30 days [1].")),
    )
}
