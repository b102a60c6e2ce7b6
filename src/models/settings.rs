use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::dedup::DedupConfig;
use crate::utils::http::RetryConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }

    /// Environment variable holding the API key for this provider
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(format!("Unknown LLM provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            temperature: 0.3,
            max_tokens: 500,
            timeout_secs: 120,
        }
    }
}

impl LlmSettings {
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial_backoff_ms: 250,
            max_backoff_ms: 8000,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreeningSettings {
    pub max_title_chars: usize,
    pub max_abstract_chars: usize,
    pub max_fulltext_chars: usize,
    pub feedback_threshold: f64,
}

impl Default for ScreeningSettings {
    fn default() -> Self {
        Self {
            max_title_chars: 300,
            max_abstract_chars: 2000,
            max_fulltext_chars: 60_000,
            feedback_threshold: 0.8,
        }
    }
}

/// Application settings, stored as JSON in the user data directory
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub retry: RetrySettings,
    pub dedup: DedupConfig,
    pub screening: ScreeningSettings,
    pub projects_root: Option<PathBuf>,
    /// Write a daily rolling log file next to the settings file
    pub log_to_file: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"llm": {"provider": "anthropic"}, "retry": {"max_retries": 2}}"#)
                .unwrap();
        assert_eq!(settings.llm.provider, LlmProvider::Anthropic);
        assert_eq!(settings.llm.model_name(), "claude-3-5-sonnet-20241022");
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.max_backoff_ms, 8000);
        assert_eq!(settings.screening.feedback_threshold, 0.8);
    }

    #[test]
    fn test_retry_conversion() {
        let config = RetryConfig::from(&RetrySettings::default());
        assert_eq!(config.max_retries, 6);
        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(250));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_millis(8000));
    }
}
