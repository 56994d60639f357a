//! Config I/O operations: load and save.

use std::path::{Path, PathBuf};

use super::config_struct::NexusConfig;
use crate::error::ConfigError;

pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_default().join("nexus-live");
    let _ = std::fs::create_dir_all(&config_dir);
    config_dir.join("config.json")
}

/// Load the user config, falling back to defaults when no file exists yet.
pub fn load_config() -> Result<NexusConfig, ConfigError> {
    load_config_from(&get_config_path())
}

pub fn load_config_from(path: &Path) -> Result<NexusConfig, ConfigError> {
    let mut config = if path.exists() {
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            NexusConfig::default()
        } else {
            serde_json::from_str::<NexusConfig>(&data)?
        }
    } else {
        NexusConfig::default()
    };

    // Sanity: a zero retry budget would never call the endpoint
    if config.retry.max_retries == 0 {
        config.retry.max_retries = 1;
    }
    if config.cache.capacity == 0 {
        config.cache.capacity = 1;
    }
    if config.live.frame_samples == 0 {
        config.live.frame_samples = super::LiveConfig::default().frame_samples;
    }

    config.apply_env_overrides();
    Ok(config)
}

pub fn save_config(config: &NexusConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &NexusConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(config)?;
    std::fs::write(path, data)?;
    Ok(())
}
