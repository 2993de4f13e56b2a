//! Configuration management for FocusUp

pub mod file;

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::live::{DEFAULT_ENDPOINT, DEFAULT_PROBE_HOST, RetryPolicy, SessionConfig};

pub use file::{FocusUpConfigFile, config_file_path, load_config_file, save_config_file};

/// Default Live API model
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default response language
pub const DEFAULT_LANGUAGE: &str = "English";

/// Supplies the credential and display name for a session
pub trait CredentialProvider: Send + Sync {
    /// API key, if one is configured
    fn credential(&self) -> Option<SecretString>;

    /// Name used to personalize the assistant
    fn display_name(&self) -> Option<String>;
}

/// FocusUp configuration
#[derive(Debug)]
pub struct Config {
    /// Live API key (from `FOCUSUP_API_KEY` or `GEMINI_API_KEY`)
    pub api_key: Option<SecretString>,

    /// User display name
    pub display_name: Option<String>,

    /// Live API model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,

    /// Language the assistant answers in
    pub language: String,

    /// Live API WebSocket endpoint
    pub endpoint: String,

    /// `host:port` probed before starting a session
    pub probe_host: String,

    /// Directory holding `tasks.json`
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        let fc = load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok());

        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            tracing::warn!(
                path = %config.data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        config
    }

    /// Merge a config file with environment lookups
    ///
    /// Empty environment values are treated as unset.
    pub fn resolve(fc: FocusUpConfigFile, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let api_key = env("FOCUSUP_API_KEY")
            .or_else(|| env("GEMINI_API_KEY"))
            .or_else(|| non_empty(fc.live.api_key))
            .map(SecretString::from);

        let data_dir = env("FOCUSUP_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Self {
            api_key,
            display_name: env("FOCUSUP_NAME").or_else(|| non_empty(fc.profile.name)),
            model: env("FOCUSUP_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: env("FOCUSUP_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            language: env("FOCUSUP_LANGUAGE")
                .or(fc.profile.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            endpoint: env("FOCUSUP_ENDPOINT")
                .or(fc.live.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            probe_host: env("FOCUSUP_PROBE_HOST")
                .or(fc.live.probe_host)
                .unwrap_or_else(|| DEFAULT_PROBE_HOST.to_string()),
            data_dir,
        }
    }

    /// Session parameters derived from this config
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            language: self.language.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CredentialProvider for Config {
    fn credential(&self) -> Option<SecretString> {
        self.api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_owned()))
    }

    fn display_name(&self) -> Option<String> {
        self.display_name.clone()
    }
}

/// Default data directory: `~/.local/share/focusup` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/focusup"),
        |d| d.data_dir().join("focusup"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::resolve(FocusUpConfigFile::default(), env_of(&[]));
        assert!(config.api_key.is_none());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.voice, "Kore");
        assert_eq!(config.language, "English");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.probe_host, DEFAULT_PROBE_HOST);
    }

    #[test]
    fn env_beats_file() {
        let mut fc = FocusUpConfigFile::default();
        fc.live.api_key = Some("from-file".to_string());
        fc.profile.name = Some("File Name".to_string());
        fc.live.voice = Some("Puck".to_string());

        let config = Config::resolve(
            fc,
            env_of(&[("FOCUSUP_API_KEY", "from-env"), ("FOCUSUP_NAME", "Ada")]),
        );
        assert_eq!(config.api_key.unwrap().expose_secret(), "from-env");
        assert_eq!(config.display_name.as_deref(), Some("Ada"));
        assert_eq!(config.voice, "Puck");
    }

    #[test]
    fn gemini_key_is_a_fallback() {
        let config = Config::resolve(
            FocusUpConfigFile::default(),
            env_of(&[("GEMINI_API_KEY", "g")]),
        );
        assert_eq!(config.credential().unwrap().expose_secret(), "g");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut fc = FocusUpConfigFile::default();
        fc.live.api_key = Some("   ".to_string());
        let config = Config::resolve(fc, env_of(&[("FOCUSUP_API_KEY", "")]));
        assert!(config.credential().is_none());
    }

    #[test]
    fn data_dir_override() {
        let config = Config::resolve(
            FocusUpConfigFile::default(),
            env_of(&[("FOCUSUP_DATA_DIR", "/tmp/focusup-test")]),
        );
        assert_eq!(config.data_dir, PathBuf::from("/tmp/focusup-test"));
    }
}
