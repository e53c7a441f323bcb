//! Initialize the configuration directory: create ~/.ideasketch, a default config, and the storage directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

const DEFAULT_CONFIG: &[u8] = b"{}";

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the storage directory resolved from the (possibly existing) config.
///
/// Returns the storage directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let storage = config::resolve_storage_dir(&config, config_path);
    if !storage.exists() {
        std::fs::create_dir_all(&storage)
            .with_context(|| format!("creating storage directory {}", storage.display()))?;
        log::info!("created storage directory at {}", storage.display());
    } else {
        log::debug!("storage directory already exists at {}, skipping", storage.display());
    }

    Ok(storage)
}
