//! Anthropic Messages API client
//!
//! The system prompt travels in its own field rather than as a message. There is
//! no native JSON mode, so a JSON-only instruction is appended to the system
//! prompt instead.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{
    error_message, lookup_pricing, ChatRequest, LlmClient, LlmError, LlmResponse, ModelPricing,
    Role,
};
use crate::models::LlmProvider;
use crate::utils::http::{parse_retry_after_header, with_retry, RetryConfig};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

const JSON_INSTRUCTION: &str =
    "You must respond with valid JSON only. Do not include any text outside the JSON object.";

/// Per million tokens; the first row is the fallback for unknown models
const PRICING: &[(&str, ModelPricing)] = &[
    ("claude-3-5-sonnet-20241022", ModelPricing::new(3.00, 15.00)),
    ("claude-3-5-sonnet-latest", ModelPricing::new(3.00, 15.00)),
    ("claude-3-opus-20240229", ModelPricing::new(15.00, 75.00)),
    ("claude-3-opus-latest", ModelPricing::new(15.00, 75.00)),
    ("claude-3-sonnet-20240229", ModelPricing::new(3.00, 15.00)),
    ("claude-3-haiku-20240307", ModelPricing::new(0.25, 1.25)),
];

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Client for the Anthropic API
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryConfig,
}

impl AnthropicClient {
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

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if request.json_mode {
            system.push(JSON_INSTRUCTION);
        }

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n\n"));
        }
        body
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let wait = parse_retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            // Anthropic reports overload as 529
            return Err(LlmError::from_status(status.as_u16(), error_message(&text), wait));
        }

        let text = resp.text().await?;
        self.parse_response(&text)
    }

    fn parse_response(&self, text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: MessagesResponse = serde_json::from_str(text)
            .map_err(|e| LlmError::InvalidResponse(format!("bad messages JSON: {}", e)))?;

        let content = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .find_map(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("response has no text block".to_string()))?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
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
impl LlmClient for AnthropicClient {
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, LlmError> {
        let body = self.request_body(&request);
        debug!("Anthropic request to {} ({} messages)", self.model, request.messages.len());

        with_retry(&self.retry, "anthropic chat", || self.send_once(&body)).await
    }

    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        lookup_pricing(PRICING, &self.model).cost(input_tokens, output_tokens)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }
}
