//! Concrete language-model providers.
//!
//! [`ChatCompletionsModel`] speaks the OpenAI-compatible
//! `POST {base_url}/chat/completions` protocol; the default configuration
//! points it at Groq. Each call makes exactly one attempt: retries and
//! backoff belong to the answer generator.

use anyhow::Result;

use docqa_core::llm::LanguageModel;
use docqa_core::ProviderError;

use crate::config::LlmConfig;
use crate::http::{send_json, LazyClient};

/// Fails every completion with [`ProviderError::Disabled`].
pub struct DisabledModel {
    reason: String,
}

impl DisabledModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled(self.reason.clone()))
    }
}

pub struct ChatCompletionsModel {
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    client: LazyClient,
}

impl ChatCompletionsModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Self {
        Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            client: LazyClient::new(config.timeout()),
        }
    }
}

impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": max_tokens,
        });
        let request = self
            .client
            .get()?
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = send_json(request, "chat completions API")?;
        parse_completion(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String, ProviderError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".to_string()))
}

/// Create the [`LanguageModel`] named by `config.provider`.
///
/// A missing API key is not fatal: the pipeline can still be initialized
/// and queried for health, and `ask` reports the disabled model.
pub fn create_language_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel::new(
            "set [llm] provider in the config to enable answers",
        ))),
        "openai" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                Ok(Box::new(ChatCompletionsModel::new(config, key)))
            }
            _ => {
                tracing::warn!(
                    env = %config.api_key_env,
                    "language model API key not set, answers are disabled"
                );
                Ok(Box::new(DisabledModel::new(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))))
            }
        },
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_completion_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "42"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "42");
        assert!(matches!(
            parse_completion(&serde_json::json!({"choices": []})),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn missing_key_yields_disabled_model() {
        let config = LlmConfig {
            api_key_env: "DOCQA_TEST_LLM_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let model = create_language_model(&config).unwrap();
        assert_eq!(model.model_name(), "disabled");
        assert!(matches!(
            model.complete("hi", 10),
            Err(ProviderError::Disabled(_))
        ));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = LlmConfig {
            base_url: "http://localhost:9999/v1/".to_string(),
            ..LlmConfig::default()
        };
        let model = ChatCompletionsModel::new(&config, "k".to_string());
        assert_eq!(model.endpoint, "http://localhost:9999/v1/chat/completions");
        assert_eq!(model.model_name(), "llama-3.3-70b-versatile");
    }
}
