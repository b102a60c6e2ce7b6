//! API key lookup and storage
//!
//! A key comes from the provider's environment variable when it is set, and from
//! the macOS Keychain otherwise. Other platforms have no store: saving a key
//! there fails with a pointer to the environment variable.

use thiserror::Error;

use crate::models::LlmProvider;

#[derive(Debug, Error, PartialEq)]
pub enum KeychainError {
    #[error("Invalid {provider} API key: {reason}")]
    InvalidKey {
        provider: LlmProvider,
        reason: &'static str,
    },
    #[error("No keychain on this platform; set {0} instead")]
    Unsupported(&'static str),
    #[error("Keychain error: {0}")]
    Store(String),
}

/// Where a key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment(&'static str),
    Keychain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub value: String,
    pub source: KeySource,
}

/// Keychain account name for a provider's key
pub fn account(provider: LlmProvider) -> String {
    format!("{}-api-key", provider.as_str())
}

/// Trim a key and reject ones that cannot belong to `provider`
///
/// Both providers issue `sk-` keys; Anthropic's carry `sk-ant-`, which is the
/// usual mix-up when two keys are configured.
pub fn validate_key(provider: LlmProvider, key: &str) -> Result<String, KeychainError> {
    let key = key.trim();
    let invalid = |reason| KeychainError::InvalidKey { provider, reason };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(invalid("key contains whitespace"));
    }
    match provider {
        LlmProvider::Anthropic if !key.starts_with("sk-ant-") => {
            Err(invalid("expected a key starting with sk-ant-"))
        }
        LlmProvider::OpenAi if key.starts_with("sk-ant-") => {
            Err(invalid("this looks like an Anthropic key"))
        }
        LlmProvider::OpenAi if !key.starts_with("sk-") => Err(invalid("expected a key starting with sk-")),
        _ => Ok(key.to_string()),
    }
}

/// Key for `provider` from `env`, falling back to the keychain
pub fn lookup_api_key(provider: LlmProvider, env: impl Fn(&str) -> Option<String>) -> Option<ApiKey> {
    lookup_with(provider, env, stored_key)
}

fn lookup_with(
    provider: LlmProvider,
    env: impl Fn(&str) -> Option<String>,
    stored: impl Fn(LlmProvider) -> Option<String>,
) -> Option<ApiKey> {
    let var = provider.api_key_env();
    if let Some(value) = env(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        return Some(ApiKey {
            value,
            source: KeySource::Environment(var),
        });
    }
    stored(provider)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|value| ApiKey {
            value,
            source: KeySource::Keychain,
        })
}

/// Validate and save a key in the macOS Keychain
pub fn store_api_key(provider: LlmProvider, key: &str) -> Result<(), KeychainError> {
    let key = validate_key(provider, key)?;
    platform::store(provider, &key)
}

pub fn delete_api_key(provider: LlmProvider) -> Result<(), KeychainError> {
    platform::delete(provider)
}

fn stored_key(provider: LlmProvider) -> Option<String> {
    platform::get(provider)
}

#[cfg(target_os = "macos")]
mod platform {
    use security_framework::passwords::{delete_generic_password, get_generic_password, set_generic_password};

    use super::{account, KeychainError};
    use crate::models::LlmProvider;

    const SERVICE: &str = "com.sysrev";

    pub(super) fn store(provider: LlmProvider, value: &str) -> Result<(), KeychainError> {
        let account = account(provider);
        // Replace any earlier key
        let _ = delete_generic_password(SERVICE, &account);
        set_generic_password(SERVICE, &account, value.as_bytes())
            .map_err(|e| KeychainError::Store(format!("failed to store {}: {}", account, e)))
    }

    pub(super) fn get(provider: LlmProvider) -> Option<String> {
        get_generic_password(SERVICE, &account(provider))
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub(super) fn delete(provider: LlmProvider) -> Result<(), KeychainError> {
        let account = account(provider);
        delete_generic_password(SERVICE, &account)
            .map_err(|e| KeychainError::Store(format!("failed to delete {}: {}", account, e)))
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use super::KeychainError;
    use crate::models::LlmProvider;

    pub(super) fn store(provider: LlmProvider, _value: &str) -> Result<(), KeychainError> {
        Err(KeychainError::Unsupported(provider.api_key_env()))
    }

    pub(super) fn get(_provider: LlmProvider) -> Option<String> {
        None
    }

    /// Nothing is ever stored, so there is nothing to remove
    pub(super) fn delete(_provider: LlmProvider) -> Result<(), KeychainError> {
        Ok(())
    }
}
