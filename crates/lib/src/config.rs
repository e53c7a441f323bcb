//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.ideasketch/config.json`) and environment.
//! The API url and key are usually supplied through the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::stream::ToolRecovery;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Prediction endpoint settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Where sessions and settings are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Front-end timing and layout.
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Full prediction url, e.g. `https://flow.example.com/api/v1/prediction/<flow-id>`.
    /// Overridden by IDEASKETCH_API_URL env.
    pub url: Option<String>,

    /// Bearer token. Overridden by IDEASKETCH_API_KEY env.
    pub api_key: Option<String>,

    /// What to do when tools were signalled but no metadata listed them.
    #[serde(default)]
    pub tool_recovery: ToolRecovery,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage directory. Relative paths are resolved against the config file's parent.
    /// Default: `storage` next to the config file.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    /// Seconds before a still-loading reply is reported as slow (default 10).
    #[serde(default = "default_slow_response_secs")]
    pub slow_response_secs: u64,

    /// Messages shown per page (default 10).
    #[serde(default = "default_messages_per_page")]
    pub messages_per_page: usize,
}

fn default_slow_response_secs() -> u64 {
    10
}

fn default_messages_per_page() -> usize {
    crate::pagination::DEFAULT_PER_PAGE
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            slow_response_secs: default_slow_response_secs(),
            messages_per_page: default_messages_per_page(),
        }
    }
}

impl UiConfig {
    pub fn slow_response_after(&self) -> Duration {
        Duration::from_secs(self.slow_response_secs)
    }
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the API url: env IDEASKETCH_API_URL overrides config.
pub fn resolve_api_url(config: &Config) -> Option<String> {
    std::env::var("IDEASKETCH_API_URL")
        .ok()
        .and_then(|s| non_blank(&s))
        .or_else(|| config.api.url.as_deref().and_then(non_blank))
}

/// Resolve the API key: env IDEASKETCH_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    std::env::var("IDEASKETCH_API_KEY")
        .ok()
        .and_then(|s| non_blank(&s))
        .or_else(|| config.api.api_key.as_deref().and_then(non_blank))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("IDEASKETCH_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".ideasketch").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the storage directory: `storage.directory` if set, otherwise `storage` next to the config file.
pub fn resolve_storage_dir(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_parent(config_path);
    match &config.storage.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                parent.join(d)
            }
        }
        _ => parent.join("storage"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
