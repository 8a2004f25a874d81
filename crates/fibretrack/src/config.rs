//! Runtime configuration, loaded from a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    // Tickets are Italian with occasional English labels.
    vec!["ita".to_string(), "eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Recipients for apply notifications (chat ids, addresses — opaque to
    /// the engine, interpreted by the `Notifier` implementation).
    #[serde(default)]
    pub recipients: Vec<String>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database_path must not be empty".to_string(),
        });
    }
    if config.ocr.dpi == 0 {
        return Err(ConfigError::Validation {
            message: "ocr.dpi must be greater than zero".to_string(),
        });
    }
    if config.ocr.enabled && config.ocr.languages.is_empty() {
        return Err(ConfigError::Validation {
            message: "ocr.languages must not be empty when OCR is enabled".to_string(),
        });
    }
    Ok(())
}
