//! Configuration management

use crate::error::{ErrorContext, PlutoError, PlutoResult};
use crate::validation_error;
use crate::types::{
    ApiConfig, InvalidationMode, PlutoConfig, SessionConfig, StorageBackend, StorageConfig,
};

use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable overriding `api.base_url`
pub const ENV_API_URL: &str = "PLUTO_API_URL";
/// Environment variable overriding `storage.data_dir`
pub const ENV_DATA_DIR: &str = "PLUTO_DATA_DIR";

impl Default for PlutoConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_API_URL.to_string(),
                timeout_seconds: 30,
                user_agent: format!("pluto/{}", env!("CARGO_PKG_VERSION")),
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                data_dir: "~/.pluto/session".to_string(),
            },
            session: SessionConfig {
                invalidation: InvalidationMode::FailClosed,
            },
        }
    }
}

impl PlutoConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PlutoResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PlutoError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: PlutoConfig = toml::from_str(&content).map_err(|e| PlutoError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> PlutoResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| PlutoError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| PlutoError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Apply `PLUTO_API_URL` / `PLUTO_DATA_DIR` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.storage.data_dir = dir;
        }
    }

    /// Storage directory with a leading `~` expanded to the home directory
    pub fn resolved_data_dir(&self) -> PathBuf {
        expand_home(&self.storage.data_dir)
    }

    /// Validate configuration
    pub fn validate(&self) -> PlutoResult<()> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| PlutoError::Config {
            message: format!("Invalid api.base_url '{}': {}", self.api.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("validate")
                .with_suggestion("Use an absolute URL such as http://localhost:8000"),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(validation_error!(
                format!("Unsupported scheme '{}', use http or https", url.scheme()),
                "api.base_url",
                "config"
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(validation_error!(
                "must be greater than 0",
                "api.timeout_seconds",
                "config"
            ));
        }

        if self.storage.backend == StorageBackend::File && self.storage.data_dir.trim().is_empty()
        {
            return Err(validation_error!(
                "required for the file backend",
                "storage.data_dir",
                "config"
            ));
        }

        Ok(())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlutoConfig::default();
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(config.session.invalidation, InvalidationMode::FailClosed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let mut config = PlutoConfig::default();
        config.apply_overrides_from(|key| match key {
            ENV_API_URL => Some("https://gateway.example.com".to_string()),
            ENV_DATA_DIR => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.api.base_url, "https://gateway.example.com");
        assert_eq!(config.storage.data_dir, "~/.pluto/session");
    }

    #[test]
    fn test_relative_data_dir_is_untouched() {
        let mut config = PlutoConfig::default();
        config.storage.data_dir = "state/session".to_string();
        assert_eq!(config.resolved_data_dir(), PathBuf::from("state/session"));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = PlutoConfig::default();
        config.api.base_url = "ftp://example.com".to_string();
        match config.validate() {
            Err(PlutoError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("api.base_url"))
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }
}
