//! Answer generation from an assembled context
//!
//! Two generators exist: a configured LLM backend that is instructed to answer only from
//! the context with inline `[id - year]` citations, and a deterministic echo of the
//! context used when no backend is configured. The choice is made once at startup.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Characters of context echoed back when no backend is configured
pub const ECHO_LIMIT: usize = 1200;

/// Label opening every echoed answer
pub const ECHO_LABEL: &str = "Relevant context:\n";

/// Appended to the echo when the context was cut
pub const TRUNCATION_MARKER: &str = "\n… (truncated)";

/// Produces an answer for a query from a context window
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, query: &str, context: &str) -> Result<String>;

    /// Short name used in logs and metrics
    fn name(&self) -> &str;
}

/// Generate an answer only when requested.
///
/// Backend failures are returned to the caller unchanged.
pub async fn generate_answer(
    generator: &dyn AnswerGenerator,
    query: &str,
    context: &str,
    generate: bool,
) -> Result<Option<String>> {
    if !generate {
        return Ok(None);
    }

    let result = generator.generate(query, context).await;
    metrics::record_generation(generator.name(), result.is_ok());

    result.map(Some)
}

/// Fallback generator: returns the leading part of the context, labeled.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextEcho;

#[async_trait]
impl AnswerGenerator for ContextEcho {
    async fn generate(&self, _query: &str, context: &str) -> Result<String> {
        let head = super::truncate_chars(context, ECHO_LIMIT);
        let marker = if head.len() < context.len() { TRUNCATION_MARKER } else { "" };

        Ok(format!("{}{}{}", ECHO_LABEL, head, marker))
    }

    fn name(&self) -> &str {
        "context-echo"
    }
}

/// Build the instruction prompt sent to the LLM
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a research assistant. Answer ONLY with information found in the context below. \
         After every claim, cite its source paper with a tag of the form [id - year], copied \
         from the heading of the context block the claim comes from. If the context does not \
         contain the information, say so plainly instead of guessing.\n\n\
         Question:\n{}\n\n\
         Context:\n{}\n\n\
         Answer concisely, using bullet points where they help.",
        query, context
    )
}

/// OpenAI-compatible chat completion backend
pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

impl OpenAIGenerator {
    /// Create a generator; requests carry no client-side timeout.
    pub fn new(api_key: String, api_base: &str, model: String, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            model,
            temperature,
        }
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIGenerator {
    async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let prompt = build_prompt(query, context);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
        };

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationError {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse = response.json().await
            .map_err(|e| AppError::GenerationError {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationError {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Select the generator for this process
pub fn create_generator(config: &GenerationConfig) -> Arc<dyn AnswerGenerator> {
    match &config.api_key {
        Some(key) => {
            tracing::info!(model = %config.model, "Answer generation backend configured");
            Arc::new(OpenAIGenerator::new(
                key.clone(),
                &config.api_base,
                config.model.clone(),
                config.temperature,
            ))
        }
        None => {
            tracing::info!("No generation backend configured, answers echo the context");
            Arc::new(ContextEcho)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records whether it was called
    struct Spy(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl AnswerGenerator for Spy {
        async fn generate(&self, _query: &str, _context: &str) -> Result<String> {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok("answer".into())
        }

        fn name(&self) -> &str {
            "spy"
        }
    }

    struct Failing;

    #[async_trait]
    impl AnswerGenerator for Failing {
        async fn generate(&self, _query: &str, _context: &str) -> Result<String> {
            Err(AppError::GenerationError { message: "rate limited".into() })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_generate_false_returns_none_without_calling_backend() {
        let spy = Spy(Default::default());
        let context = "x".repeat(5000);

        let answer = generate_answer(&spy, "q", &context, false).await.unwrap();

        assert!(answer.is_none());
        assert!(!spy.0.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_echo_truncates_long_context() {
        let context = "y".repeat(ECHO_LIMIT + 300);

        let answer = generate_answer(&ContextEcho, "q", &context, true).await.unwrap().unwrap();

        let expected = format!("{}{}{}", ECHO_LABEL, "y".repeat(ECHO_LIMIT), TRUNCATION_MARKER);
        assert_eq!(answer, expected);
    }

    #[tokio::test]
    async fn test_echo_short_context_has_no_marker() {
        let answer = ContextEcho.generate("q", "### [1 - 2020] Title\nabc\n\n").await.unwrap();
        assert_eq!(answer, "Relevant context:\n### [1 - 2020] Title\nabc\n\n");
    }

    #[tokio::test]
    async fn test_echo_exact_limit_has_no_marker() {
        let context = "é".repeat(ECHO_LIMIT);
        let answer = ContextEcho.generate("q", &context).await.unwrap();
        assert!(!answer.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let err = generate_answer(&Failing, "q", "ctx", true).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationError { .. }));
    }

    #[test]
    fn test_prompt_carries_query_context_and_rules() {
        let prompt = build_prompt("How does microgravity affect bone?", "### [abc - 2019] T");
        assert!(prompt.contains("How does microgravity affect bone?"));
        assert!(prompt.contains("### [abc - 2019] T"));
        assert!(prompt.contains("[id - year]"));
        assert!(prompt.contains("ONLY"));
    }

    #[test]
    fn test_generator_selection() {
        let unconfigured = create_generator(&GenerationConfig::default());
        assert_eq!(unconfigured.name(), "context-echo");

        let configured = create_generator(&GenerationConfig {
            api_key: Some("sk-test".into()),
            ..GenerationConfig::default()
        });
        assert_eq!(configured.name(), "gpt-4o-mini");
    }

    #[test]
    fn test_endpoint_joins_base() {
        let generator = OpenAIGenerator::new("k".into(), "http://localhost:8000/v1/", "m".into(), 0.2);
        assert_eq!(generator.endpoint, "http://localhost:8000/v1/chat/completions");
    }
}
