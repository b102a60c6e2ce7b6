//! OpenAI chat completions client
//!
//! See: https://platform.openai.com/docs/api-reference/chat

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{
    error_message, lookup_pricing, ChatRequest, LlmClient, LlmError, LlmResponse, ModelPricing,
};
use crate::models::LlmProvider;
use crate::utils::http::{parse_retry_after_header, with_retry, RetryConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Per million tokens; the first row is the fallback for unknown models
const PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing::new(5.00, 15.00)),
    ("gpt-4o-mini", ModelPricing::new(0.15, 0.60)),
    ("gpt-4-turbo", ModelPricing::new(10.00, 30.00)),
    ("gpt-4", ModelPricing::new(30.00, 60.00)),
    ("gpt-3.5-turbo", ModelPricing::new(0.50, 1.50)),
];

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Client for the OpenAI API
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryConfig,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Point at an OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let wait = parse_retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), error_message(&text), wait));
        }

        let text = resp.text().await?;
        self.parse_response(&text)
    }

    fn parse_response(&self, text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: CompletionResponse = serde_json::from_str(text)
            .map_err(|e| LlmError::InvalidResponse(format!("bad completion JSON: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("completion has no content".to_string()))?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
            cost: self.estimate_cost(input_tokens, output_tokens),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(&request);
        debug!("OpenAI request to {} ({} messages)", self.model, request.messages.len());

        with_retry(&self.retry, "openai chat", || self.send_once(&body)).await
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        lookup_pricing(PRICING, &self.model).cost(input_tokens, output_tokens)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }
}
