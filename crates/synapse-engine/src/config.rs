//! Configuration types for the Synapse lesson engine.
//!
//! Configuration lives in `synapse.json`. Every key is optional; a missing
//! file yields the defaults documented on each field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynapseError};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "synapse.json";

/// Upper bound for the progress writer's debounce window.
const MAX_SAVE_DEBOUNCE_MS: u64 = 60_000;

fn default_lesson() -> String {
    "lesson.json".to_string()
}

fn default_state_dir() -> String {
    ".synapse/state".to_string()
}

fn default_output_dir() -> String {
    ".".to_string()
}

const fn default_save_debounce_ms() -> u64 {
    500
}

const fn default_event_buffer_size() -> usize {
    100
}

fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

const fn default_service_timeout() -> u64 {
    60
}

/// Main configuration for a Synapse lesson session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the lesson structure file.
    #[serde(default = "default_lesson")]
    pub lesson: String,

    /// Directory holding persisted progress and mastery records.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Output directory for generated reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Debounce window for progress saves, in milliseconds.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Capacity of the session event broadcast channel.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Remote content, evaluation and tutor services.
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lesson: default_lesson(),
            state_dir: default_state_dir(),
            output_dir: default_output_dir(),
            save_debounce_ms: default_save_debounce_ms(),
            event_buffer_size: default_event_buffer_size(),
            services: ServicesConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `synapse.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            SynapseError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `synapse.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::ConfigParseError` if the file exists but cannot
    /// be read or parsed, and `SynapseError::ConfigValidationError` if the
    /// values are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(SynapseError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| SynapseError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.save_debounce_ms == 0 || self.save_debounce_ms > MAX_SAVE_DEBOUNCE_MS {
            return Err(SynapseError::config_validation(
                format!("saveDebounceMs must be between 1 and {MAX_SAVE_DEBOUNCE_MS}"),
                "Set saveDebounceMs to a value like 500 in your synapse.json",
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(SynapseError::config_validation(
                "eventBufferSize must be greater than 0",
                "Set eventBufferSize to at least 1 in your synapse.json",
            ));
        }

        if self.services.timeout_seconds == 0 {
            return Err(SynapseError::config_validation(
                "services.timeoutSeconds must be greater than 0",
                "Set services.timeoutSeconds to at least 1 second in your synapse.json",
            ));
        }

        for (key, value) in [
            ("lesson", &self.lesson),
            ("stateDir", &self.state_dir),
            ("outputDir", &self.output_dir),
        ] {
            if value.trim().is_empty() {
                return Err(SynapseError::config_validation(
                    format!("{key} must not be empty"),
                    format!("Provide a valid {key} path in your synapse.json"),
                ));
            }
        }

        let base_url = self.services.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SynapseError::config_validation(
                format!("services.baseUrl '{base_url}' is not an http(s) URL"),
                "Set services.baseUrl to something like http://127.0.0.1:8787",
            ));
        }

        Ok(())
    }

    /// The debounce window as a `Duration`.
    #[must_use]
    pub const fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// The state directory as a path.
    #[must_use]
    pub fn state_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }
}

/// Connection settings for the remote services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesConfig {
    /// Root URL of the content, evaluation and tutor endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,

    /// Name of an environment variable holding a bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_service_timeout(),
            api_key_env: None,
        }
    }
}

impl ServicesConfig {
    /// Reads the bearer token from the configured environment variable.
    ///
    /// Returns `None` when no variable is configured or it is unset.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// The request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.lesson, "lesson.json");
        assert_eq!(config.state_dir, ".synapse/state");
        assert_eq!(config.output_dir, ".");
        assert_eq!(config.save_debounce_ms, 500);
        assert_eq!(config.event_buffer_size, 100);
        assert_eq!(config.services.base_url, "http://127.0.0.1:8787");
        assert_eq!(config.services.timeout_seconds, 60);
        assert!(config.services.api_key_env.is_none());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.lesson, "lesson.json");
        assert_eq!(config.save_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "lesson": "photosynthesis.json",
            "stateDir": "/var/lib/synapse",
            "saveDebounceMs": 250,
            "services": {
                "baseUrl": "https://tutor.example.com",
                "timeoutSeconds": 15,
                "apiKeyEnv": "SYNAPSE_API_KEY"
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.lesson, "photosynthesis.json");
        assert_eq!(config.state_dir_path(), PathBuf::from("/var/lib/synapse"));
        assert_eq!(config.save_debounce_ms, 250);
        assert_eq!(config.services.base_url, "https://tutor.example.com");
        assert_eq!(config.services.timeout(), Duration::from_secs(15));
        assert_eq!(config.services.api_key_env.as_deref(), Some("SYNAPSE_API_KEY"));
        assert_eq!(config.output_dir, ".");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"lesson": "x.json", "theme": "dark"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.lesson, "x.json");
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let path = std::env::temp_dir().join("synapse_config_does_not_exist.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.lesson, "lesson.json");
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let path = std::env::temp_dir().join("test_synapse_invalid.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = Config::load_from_file(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(SynapseError::ConfigParseError { .. })));
    }

    #[test]
    fn test_load_from_dir_finds_synapse_json() {
        let dir = std::env::temp_dir().join("test_synapse_config_dir");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE_NAME), r#"{"eventBufferSize": 16}"#).unwrap();

        let config = Config::load_from_dir(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(config.event_buffer_size, 16);
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let path = std::env::temp_dir().join("test_synapse_validation.json");
        std::fs::write(&path, r#"{"saveDebounceMs": 0}"#).unwrap();

        let result = Config::load_from_file(&path);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(SynapseError::ConfigValidationError { .. })
        ));
    }

    #[test]
    fn test_config_validation_debounce_bounds() {
        let too_long = Config {
            save_debounce_ms: 60_001,
            ..Default::default()
        };
        let err = too_long.validate().unwrap_err();
        assert!(
            matches!(&err, SynapseError::ConfigValidationError { message, .. }
                if message.contains("saveDebounceMs")),
            "Expected ConfigValidationError about saveDebounceMs, got: {err:?}"
        );

        let at_limit = Config {
            save_debounce_ms: 60_000,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_event_buffer() {
        let config = Config {
            event_buffer_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eventBufferSize"));
    }

    #[test]
    fn test_config_validation_zero_service_timeout() {
        let config = Config {
            services: ServicesConfig {
                timeout_seconds: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("services.timeoutSeconds"));
    }

    #[test]
    fn test_config_validation_empty_paths() {
        let config = Config {
            state_dir: "   ".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stateDir"));

        let config = Config {
            lesson: String::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lesson"));
    }

    #[test]
    fn test_config_validation_rejects_non_http_base_url() {
        let config = Config {
            services: ServicesConfig {
                base_url: "ftp://example.com".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("services.baseUrl"));
    }

    #[test]
    fn test_api_key_unset_variable_is_none() {
        let services = ServicesConfig {
            api_key_env: Some("SYNAPSE_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..Default::default()
        };
        assert!(services.api_key().is_none());
        assert!(ServicesConfig::default().api_key().is_none());
    }
}
