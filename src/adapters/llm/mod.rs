//! Chat-completion clients for the hosted LLM providers
//!
//! Both clients speak the same [`LlmClient`] trait so the screening services
//! never see which provider they are talking to. HTTP calls go through
//! [`with_retry`](crate::utils::http::with_retry); rate limits, 5xx responses and
//! connection failures are retried, everything else is returned as-is.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{LlmProvider, LlmSettings};
use crate::utils::http::{parse_retry_after_message, RetryConfig, Retryable};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("Provider server error [{status}]: {message}")]
    Server { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("No API key configured for {0} (set {env})", env = .0.api_key_env())]
    MissingApiKey(LlmProvider),
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Network(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

impl LlmError {
    /// Classify a non-success HTTP response
    ///
    /// `header_wait` is the parsed `Retry-After` header, which beats any wait
    /// mentioned in the message body.
    pub fn from_status(status: u16, message: String, header_wait: Option<Duration>) -> Self {
        match status {
            429 => LlmError::RateLimited {
                retry_after: header_wait.or_else(|| parse_retry_after_message(&message)),
                message,
            },
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::Api { status, message },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a bare JSON object
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 1000,
            json_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Concatenated prompt text, kept for the audit log
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// USD, from the client's pricing table
    pub cost: f64,
    pub model: String,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, LlmError>;

    /// USD for the given token counts at this client's model
    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64;

    fn provider(&self) -> LlmProvider;

    fn model(&self) -> &str;
}

/// Price per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// Look a model up in a pricing table, falling back to the table's first row
pub(crate) fn lookup_pricing(table: &[(&str, ModelPricing)], model: &str) -> ModelPricing {
    table
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| table.first())
        .map(|(_, pricing)| *pricing)
        .unwrap_or(ModelPricing::new(0.0, 0.0))
}

/// Build the configured client
pub fn build_client(
    settings: &LlmSettings,
    api_key: Option<String>,
    retry: RetryConfig,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    let api_key = api_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(LlmError::MissingApiKey(settings.provider))?;
    let timeout = Duration::from_secs(settings.timeout_secs);
    let model = settings.model_name();

    let client: Arc<dyn LlmClient> = match settings.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(api_key, model, timeout)?.with_retry(retry)),
        LlmProvider::Anthropic => {
            Arc::new(AnthropicClient::new(api_key, model, timeout)?.with_retry(retry))
        }
    };
    Ok(client)
}

/// Pull the human-readable message out of a provider error body
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json["error"]["message"]
                .as_str()
                .or_else(|| json["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = LlmError::from_status(429, "Rate limit. Please try again in 1.5s".into(), None);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));

        let err = LlmError::from_status(429, "try again in 20s".into(), Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        assert!(LlmError::from_status(503, "overloaded".into(), None).is_retryable());
        assert!(!LlmError::from_status(401, "bad key".into(), None).is_retryable());
        assert!(!LlmError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error": {"message": "Invalid model"}}"#),
            "Invalid model"
        );
        assert_eq!(error_message(r#"{"message": "Nope"}"#), "Nope");
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[test]
    fn test_pricing() {
        let table = [
            ("cheap", ModelPricing::new(1.0, 2.0)),
            ("dear", ModelPricing::new(10.0, 20.0)),
        ];
        assert_eq!(lookup_pricing(&table, "dear").input, 10.0);
        assert_eq!(lookup_pricing(&table, "unknown").input, 1.0);
        let cost = ModelPricing::new(1.0, 2.0).cost(500_000, 250_000);
        assert!((cost - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_key() {
        let settings = LlmSettings::default();
        let err = build_client(&settings, Some("  ".into()), RetryConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::MissingApiKey(LlmProvider::OpenAi)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_prompt_text() {
        let request = ChatRequest::new(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")]);
        assert_eq!(request.prompt_text(), "[system]\nbe brief\n\n[user]\nhi");
    }
}
