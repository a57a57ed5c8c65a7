//! Prompt assembly, language-model invocation, and citation tracking.
//!
//! # Prompt layout
//!
//! ```text
//! <instruction>
//!
//! Context from documents:
//! [1] guide.pdf (page 3)
//! <chunk text>
//!
//! [2] notes.md
//! <chunk text>
//!
//! Chat history:
//! User: ...
//! Assistant: ...
//!
//! User question: <question>
//!
//! Answer:
//! ```
//!
//! The prompt is bounded by `max_prompt_chars`. Everything except the
//! context blocks is fixed; context blocks are added in descending
//! similarity while they fit, so the lowest-similarity chunks are dropped
//! first and no chunk is ever cut mid-text. Only chunks that made it into
//! the prompt are cited.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ProviderError, RagError, Result};
use crate::llm::LanguageModel;
use crate::models::{Answer, ChatRole, ChatTurn, Citation, ScoredChunk};

const INSTRUCTION: &str = "You are a helpful AI assistant that answers questions based on the \
provided context from the user's documents. Answer accurately using the context. If the answer \
is not in the context, say so. Always cite which document(s) you are referencing, using the \
bracketed passage numbers.";

const NO_CONTEXT: &str = "(no relevant passages found)\n\n";

/// Longest backoff exponent: delays stop growing after `base * 2^5`.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Upper bound on the assembled prompt, in characters.
    pub max_prompt_chars: usize,
    pub max_tokens: usize,
    /// Retries after the first attempt, for transient provider errors only.
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// How many of the most recent chat turns go into the prompt.
    pub max_history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 12_000,
            max_tokens: 1024,
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
            max_history_turns: 6,
        }
    }
}

/// An assembled prompt and the chunks it contains, in prompt order.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub included: Vec<ScoredChunk>,
}

/// Build a prompt no longer than `max_prompt_chars` characters.
///
/// Fails with [`RagError::InvalidRequest`] when the instruction, history
/// and question alone exceed the budget.
pub fn build_prompt(
    question: &str,
    history: &[ChatTurn],
    retrieved: &[ScoredChunk],
    max_prompt_chars: usize,
    max_history_turns: usize,
) -> Result<Prompt> {
    let head = format!("{}\n\nContext from documents:\n", INSTRUCTION);
    let tail = render_tail(question, history, max_history_turns);

    let fixed = head.chars().count() + tail.chars().count();
    if fixed + NO_CONTEXT.chars().count() > max_prompt_chars {
        return Err(RagError::InvalidRequest(format!(
            "question and history need {} characters, prompt budget is {}",
            fixed, max_prompt_chars
        )));
    }

    let mut ranked: Vec<&ScoredChunk> = retrieved.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut context = String::new();
    let mut used = fixed;
    let mut included = Vec::new();
    for hit in ranked {
        let block = render_block(included.len() + 1, hit);
        let len = block.chars().count();
        if used + len > max_prompt_chars {
            break;
        }
        used += len;
        context.push_str(&block);
        included.push(hit.clone());
    }
    if included.is_empty() {
        context.push_str(NO_CONTEXT);
    }

    Ok(Prompt {
        text: format!("{}{}{}", head, context, tail),
        included,
    })
}

/// Distinct sources in prompt order, each pointing at its first (best
/// ranked) included chunk.
pub fn citations(included: &[ScoredChunk]) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for hit in included {
        if out.iter().any(|c| c.source == hit.chunk.source) {
            continue;
        }
        out.push(Citation {
            source: hit.chunk.source.clone(),
            page: hit.chunk.page,
            position: hit.chunk.ordinal,
        });
    }
    out
}

fn render_block(number: usize, hit: &ScoredChunk) -> String {
    let page = hit
        .chunk
        .page
        .map(|p| format!(" (page {})", p))
        .unwrap_or_default();
    format!("[{}] {}{}\n{}\n\n", number, hit.chunk.source, page, hit.chunk.text)
}

fn render_tail(question: &str, history: &[ChatTurn], max_turns: usize) -> String {
    let mut tail = String::new();
    let recent = &history[history.len().saturating_sub(max_turns)..];
    if !recent.is_empty() {
        tail.push_str("Chat history:\n");
        for turn in recent {
            let who = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            tail.push_str(&format!("{}: {}\n", who, turn.content));
        }
        tail.push('\n');
    }
    tail.push_str(&format!("User question: {}\n\nAnswer:", question.trim()));
    tail
}

/// Turns a question plus retrieved passages into a cited [`Answer`].
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    config: GenerationConfig,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, config: GenerationConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Assemble the prompt, call the model with retries, and attach
    /// citations for the chunks that were in the prompt.
    ///
    /// Blocks the calling thread during backoff. No attempt starts, and
    /// no backoff is slept, past `deadline`; hitting it is
    /// [`RagError::Timeout`].
    pub fn generate(
        &self,
        question: &str,
        history: &[ChatTurn],
        retrieved: &[ScoredChunk],
        deadline: Option<Instant>,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        let prompt = build_prompt(
            question,
            history,
            retrieved,
            self.config.max_prompt_chars,
            self.config.max_history_turns,
        )?;
        let text = self.complete_with_retry(&prompt.text, deadline)?;

        Ok(Answer {
            text,
            sources: citations(&prompt.included),
            passages: prompt.included,
        })
    }

    fn complete_with_retry(&self, prompt: &str, deadline: Option<Instant>) -> Result<String> {
        let expired = |wait: Duration| deadline.is_some_and(|d| Instant::now() + wait >= d);
        let mut attempt: u32 = 0;
        loop {
            if expired(Duration::ZERO) {
                return Err(RagError::Timeout(format!(
                    "generation deadline passed after {} attempt(s)",
                    attempt
                )));
            }
            attempt += 1;
            match self.model.complete(prompt, self.config.max_tokens) {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => {
                    return Err(RagError::GenerationError {
                        attempts: attempt,
                        cause: ProviderError::Malformed("empty completion".to_string()),
                    })
                }
                Err(e) if e.is_transient() && attempt <= self.config.max_retries => {
                    let wait = self.backoff(attempt);
                    if expired(wait) {
                        return Err(RagError::Timeout(format!(
                            "generation deadline passed after {} attempt(s): {}",
                            attempt, e
                        )));
                    }
                    std::thread::sleep(wait);
                }
                Err(e) => {
                    return Err(RagError::GenerationError {
                        attempts: attempt,
                        cause: e,
                    })
                }
            }
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.config.backoff_base * 2u32.pow(exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_id, content_hash};
    use crate::models::Chunk;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of responses and records every prompt.
    struct ScriptedModel {
        responses: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<std::result::Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, prompt: &str, _max_tokens: usize) -> std::result::Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default answer".to_string()))
        }
    }

    fn hit(source: &str, ordinal: u32, page: Option<u32>, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: chunk_id(source, ordinal),
                source: source.to_string(),
                page,
                ordinal,
                char_start: 0,
                char_end: text.chars().count(),
                text: text.to_string(),
                hash: content_hash(text),
            },
            score,
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig {
            backoff_base: Duration::ZERO,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let retrieved = vec![
            hit("guide.pdf", 4, Some(2), "Install with cargo.", 0.9),
            hit("notes.md", 0, None, "Run the tests.", 0.5),
        ];
        let prompt = build_prompt("How do I install?", &[], &retrieved, 12_000, 6).unwrap();
        assert!(prompt.text.contains("[1] guide.pdf (page 2)\nInstall with cargo."));
        assert!(prompt.text.contains("[2] notes.md\nRun the tests."));
        assert!(prompt.text.contains("User question: How do I install?"));
        assert!(!prompt.text.contains("Chat history:"));
        assert_eq!(prompt.included.len(), 2);
    }

    #[test]
    fn test_prompt_drops_lowest_similarity_whole() {
        let big = "x".repeat(400);
        let retrieved = vec![
            hit("low.txt", 0, None, &big, 0.1),
            hit("high.txt", 0, None, &big, 0.9),
            hit("mid.txt", 0, None, &big, 0.5),
        ];
        let full = build_prompt("q?", &[], &retrieved, 100_000, 6).unwrap();
        let budget = full.text.chars().count() - 200;

        let prompt = build_prompt("q?", &[], &retrieved, budget, 6).unwrap();
        assert!(prompt.text.chars().count() <= budget);
        let sources: Vec<&str> = prompt
            .included
            .iter()
            .map(|h| h.chunk.source.as_str())
            .collect();
        assert_eq!(sources, vec!["high.txt", "mid.txt"]);
        assert!(!prompt.text.contains("low.txt"));
        // Included chunks are whole.
        assert_eq!(prompt.text.matches(&big).count(), 2);
    }

    #[test]
    fn test_prompt_budget_too_small_for_question() {
        let question = "q".repeat(500);
        assert!(matches!(
            build_prompt(&question, &[], &[], 200, 6),
            Err(RagError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_prompt_keeps_only_recent_history() {
        let history: Vec<ChatTurn> = (0..10)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 { ChatRole::User } else { ChatRole::Assistant },
                content: format!("turn-{}", i),
            })
            .collect();
        let prompt = build_prompt("next?", &history, &[], 12_000, 4).unwrap();
        assert!(prompt.text.contains("Chat history:"));
        assert!(!prompt.text.contains("turn-5"));
        assert!(prompt.text.contains("User: turn-6"));
        assert!(prompt.text.contains("Assistant: turn-9"));
    }

    #[test]
    fn test_citations_distinct_in_rank_order() {
        let included = vec![
            hit("b.pdf", 7, Some(3), "b7", 0.9),
            hit("a.txt", 2, None, "a2", 0.8),
            hit("b.pdf", 1, Some(1), "b1", 0.7),
        ];
        let cites = citations(&included);
        assert_eq!(
            cites,
            vec![
                Citation {
                    source: "b.pdf".into(),
                    page: Some(3),
                    position: 7
                },
                Citation {
                    source: "a.txt".into(),
                    page: None,
                    position: 2
                },
            ]
        );
    }

    #[test]
    fn test_generate_cites_only_included_chunks() {
        let model = ScriptedModel::new(vec![Ok("  Use cargo [1].  ".to_string())]);
        let big = "y".repeat(300);
        let retrieved = vec![
            hit("kept.txt", 0, None, "short", 0.9),
            hit("dropped.txt", 0, None, &big, 0.2),
        ];
        let prompt_len = build_prompt("q?", &[], &retrieved[..1], 100_000, 6)
            .unwrap()
            .text
            .chars()
            .count();
        let generator = AnswerGenerator::new(
            model.clone(),
            GenerationConfig {
                max_prompt_chars: prompt_len + 10,
                ..config()
            },
        );

        let answer = generator.generate("q?", &[], &retrieved, None).unwrap();
        assert_eq!(answer.text, "Use cargo [1].");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source, "kept.txt");
        assert_eq!(answer.passages.len(), 1);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let model = ScriptedModel::new(vec![
            Err(ProviderError::RateLimited("429".into())),
            Err(ProviderError::Unavailable("503".into())),
            Ok("done".to_string()),
        ]);
        let generator = AnswerGenerator::new(model.clone(), config());
        let answer = generator
            .generate("q?", &[], &[hit("a.txt", 0, None, "a", 0.5)], None)
            .unwrap();
        assert_eq!(answer.text, "done");
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let model = ScriptedModel::new(vec![
            Err(ProviderError::Timeout("t".into())),
            Err(ProviderError::Timeout("t".into())),
            Err(ProviderError::Timeout("t".into())),
        ]);
        let generator = AnswerGenerator::new(
            model.clone(),
            GenerationConfig {
                max_retries: 2,
                ..config()
            },
        );
        let err = generator.generate("q?", &[], &[], None).unwrap_err();
        assert!(matches!(
            err,
            RagError::GenerationError {
                attempts: 3,
                cause: ProviderError::Timeout(_)
            }
        ));
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn test_auth_error_fails_fast() {
        let model = ScriptedModel::new(vec![Err(ProviderError::Auth("bad key".into()))]);
        let generator = AnswerGenerator::new(model.clone(), config());
        let err = generator.generate("q?", &[], &[], None).unwrap_err();
        assert!(matches!(
            err,
            RagError::GenerationError {
                attempts: 1,
                cause: ProviderError::Auth(_)
            }
        ));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_empty_completion_is_an_error() {
        let model = ScriptedModel::new(vec![Ok("   ".to_string())]);
        let generator = AnswerGenerator::new(model, config());
        assert!(matches!(
            generator.generate("q?", &[], &[], None),
            Err(RagError::GenerationError {
                cause: ProviderError::Malformed(_),
                ..
            })
        ));
    }

    #[test]
    fn test_passed_deadline_calls_nothing() {
        let model = ScriptedModel::new(vec![]);
        let generator = AnswerGenerator::new(model.clone(), config());
        let err = generator
            .generate("q?", &[], &[], Some(Instant::now()))
            .unwrap_err();
        assert!(matches!(err, RagError::Timeout(_)));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_no_retry_past_deadline() {
        let model = ScriptedModel::new(vec![
            Err(ProviderError::Unavailable("503".into())),
            Ok("too late".to_string()),
        ]);
        let generator = AnswerGenerator::new(
            model.clone(),
            GenerationConfig {
                backoff_base: Duration::from_secs(60),
                ..GenerationConfig::default()
            },
        );
        let started = Instant::now();
        let err = generator
            .generate("q?", &[], &[], Some(started + Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, RagError::Timeout(_)));
        assert_eq!(model.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let generator = AnswerGenerator::new(
            ScriptedModel::new(vec![]),
            GenerationConfig {
                backoff_base: Duration::from_millis(100),
                ..GenerationConfig::default()
            },
        );
        assert_eq!(generator.backoff(1), Duration::from_millis(100));
        assert_eq!(generator.backoff(2), Duration::from_millis(200));
        assert_eq!(generator.backoff(4), Duration::from_millis(800));
        assert_eq!(generator.backoff(6), Duration::from_millis(3200));
        assert_eq!(generator.backoff(20), Duration::from_millis(3200));
    }
}
