use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_INTERVAL_MS: u64 = 2000;
pub const MIN_INTERVAL_MS: u64 = 500;
pub const MAX_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamplingSettings {
    pub interval_ms: u64,
    pub command_timeout_sec: u64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            command_timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// Empty means `<output_root>/droidmem.db`. One store for all campaigns.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb_path: String,
    #[serde(default)]
    pub output_root: String,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl AppConfig {
    pub fn output_root_or_default(&self) -> PathBuf {
        if !self.output_root.trim().is_empty() {
            return PathBuf::from(self.output_root.trim());
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".droidmem")
    }

    pub fn db_path_or_default(&self) -> PathBuf {
        if !self.storage.db_path.trim().is_empty() {
            return PathBuf::from(self.storage.db_path.trim());
        }
        self.output_root_or_default().join("droidmem.db")
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DROIDMEM_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".droidmem_config.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(config: &AppConfig, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

pub fn clamp_interval_ms(input: Option<u64>) -> u64 {
    input
        .unwrap_or(DEFAULT_INTERVAL_MS)
        .clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    config.sampling.interval_ms = clamp_interval_ms(Some(config.sampling.interval_ms));
    if config.sampling.command_timeout_sec == 0 {
        config.sampling.command_timeout_sec = SamplingSettings::default().command_timeout_sec;
    }
    config
}
