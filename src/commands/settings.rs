//! Settings file and environment overrides

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{LlmProvider, Settings};

/// Overrides the configured provider
pub const PROVIDER_ENV: &str = "SYSREV_PROVIDER";
/// Overrides the configured model
pub const MODEL_ENV: &str = "SYSREV_MODEL";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not find the user data directory")]
    NoDataDir,
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Directory holding the settings file and logs
pub fn settings_dir() -> Result<PathBuf, SettingsError> {
    let dir = dirs::data_dir().ok_or(SettingsError::NoDataDir)?.join("sysrev");
    fs::create_dir_all(&dir).map_err(|source| SettingsError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    Ok(dir)
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    Ok(settings_dir()?.join("settings.json"))
}

/// Load settings from the data directory with environment overrides applied
pub fn load_settings() -> Result<Settings, SettingsError> {
    let mut settings = load_settings_from(&settings_path()?)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// A missing file gives the defaults
pub fn load_settings_from(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        debug!("No settings at {}; using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_settings(settings: &Settings) -> Result<PathBuf, SettingsError> {
    let path = settings_path()?;
    save_settings_to(settings, &path)?;
    Ok(path)
}

pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Saved settings to {}", path.display());
    Ok(())
}

/// Apply `SYSREV_PROVIDER` and `SYSREV_MODEL`
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup(PROVIDER_ENV).filter(|v| !v.trim().is_empty()) {
        match value.parse::<LlmProvider>() {
            Ok(provider) => {
                if provider != settings.llm.provider {
                    // A model name belongs to one provider
                    settings.llm.model = None;
                }
                settings.llm.provider = provider;
            }
            Err(e) => warn!("Ignoring {}: {}", PROVIDER_ENV, e),
        }
    }
    if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
        settings.llm.model = Some(model.trim().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.dedup.threshold = 0.9;
        settings.llm.model = Some("gpt-4o".into());

        save_settings_to(&settings, &path).unwrap();
        assert_eq!(load_settings_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.llm.model = Some("gpt-4o".into());

        apply_env_overrides(&mut settings, env(&[(PROVIDER_ENV, "anthropic")]));
        assert_eq!(settings.llm.provider, LlmProvider::Anthropic);
        assert_eq!(settings.llm.model, None);

        apply_env_overrides(&mut settings, env(&[(MODEL_ENV, "claude-3-haiku-20240307")]));
        assert_eq!(settings.llm.model_name(), "claude-3-haiku-20240307");

        apply_env_overrides(&mut settings, env(&[(PROVIDER_ENV, "bogus")]));
        assert_eq!(settings.llm.provider, LlmProvider::Anthropic);
    }
}
