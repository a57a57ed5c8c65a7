//! Language-model provider trait.
//!
//! Concrete providers (OpenAI-compatible chat completions) live in the
//! `docqa` app crate.

use crate::error::ProviderError;

/// A text-completion capability.
///
/// `complete` is synchronous and performs exactly one attempt; retrying is
/// the caller's job (see [`AnswerGenerator`](crate::generate::AnswerGenerator)).
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ProviderError>;
}
