//! TOML configuration file loading
//!
//! Supports `~/.config/focusup/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FocusUpConfigFile {
    /// The user
    #[serde(default)]
    pub profile: ProfileFileConfig,

    /// Live API session
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Who is talking to the assistant
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileFileConfig {
    /// Display name used in greetings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Language the assistant answers in (e.g. "English")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Live API configuration
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LiveFileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier (e.g. "models/gemini-2.5-flash-native-audio-preview-12-2025")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// WebSocket endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// `host:port` probed before connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_host: Option<String>,
}

/// Where tasks are stored
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageFileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FocusUpConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FocusUpConfigFile {
    config_file_path().map_or_else(FocusUpConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> FocusUpConfigFile {
    if !path.exists() {
        return FocusUpConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FocusUpConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FocusUpConfigFile::default()
        }
    }
}

/// Write `config` to `path`, creating parent directories
///
/// # Errors
///
/// Returns error if the file cannot be serialized or written
pub fn save_config_file(config: &FocusUpConfigFile, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| crate::Error::Config(format!("failed to serialize config: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    tracing::info!(path = %path.display(), "saved config file");
    Ok(())
}

/// Return the config file path: `~/.config/focusup/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("focusup").join("config.toml"))
}
