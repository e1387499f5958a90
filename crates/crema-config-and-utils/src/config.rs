//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default API base URL (can be overridden at compile time via CREMA_API_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("CREMA_API_URL") {
    Some(url) => url,
    None => "https://api.crema.app/api/v1/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default UI language sent in the `X-Language` header.
pub const DEFAULT_LANGUAGE: &str = "tr";

/// Default transport timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Business error code the backend returns when the session cannot be refreshed.
pub const DEFAULT_SESSION_EXPIRED_CODE: &str = "Business.SessionExpired.Error";

/// Namespace under which session keys are persisted.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "com.crema.client";

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base address every API path is resolved against.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Active UI language code.
    #[serde(default = "default_language")]
    pub language: String,
    /// Transport timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sentinel error code meaning "re-login required".
    #[serde(default = "default_session_expired_code")]
    pub session_expired_code: String,
    /// Storage namespace for the persisted session.
    #[serde(default = "default_storage_namespace")]
    pub storage_namespace: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_session_expired_code() -> String {
    DEFAULT_SESSION_EXPIRED_CODE.to_string()
}

fn default_storage_namespace() -> String {
    DEFAULT_STORAGE_NAMESPACE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            language: default_language(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            session_expired_code: default_session_expired_code(),
            storage_namespace: default_storage_namespace(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables win over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `CREMA_*` overrides from an arbitrary lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(level) = non_empty("CREMA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = non_empty("CREMA_API_URL") {
            self.api_base_url = url;
        }
        if let Some(language) = non_empty("CREMA_LANGUAGE") {
            self.language = language;
        }
    }

    /// Get the API base URL as a parsed URL.
    ///
    /// A trailing slash is appended when missing so relative paths join
    /// underneath the base instead of replacing its last segment.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)?;
        if url.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "API base URL cannot be a base: {}",
                self.api_base_url
            )));
        }
        Ok(url)
    }

    /// Transport timeout as a duration.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.language, "tr");
        assert_eq!(config.session_expired_code, "Business.SessionExpired.Error");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "log_level": "debug", "language": "en" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.language, "en");
        assert_eq!(config.storage_namespace, DEFAULT_STORAGE_NAMESPACE);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            request_timeout_secs: 5,
            api_base_url: "https://staging.crema.app/api/v1/".to_string(),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let env: HashMap<&str, &str> = [
            ("CREMA_LOG_LEVEL", "trace"),
            ("CREMA_API_URL", "  "),
            ("CREMA_LANGUAGE", "en"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.language, "en");
    }

    #[test]
    fn test_api_base_url_gets_trailing_slash() {
        let config = Config {
            api_base_url: "https://api.example.com/v1".to_string(),
            ..Config::default()
        };
        let url = config.api_base_url().unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/");
        assert_eq!(
            url.join("auth/login").unwrap().as_str(),
            "https://api.example.com/v1/auth/login"
        );
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            api_base_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.api_base_url().is_err());
    }

    #[test]
    fn test_request_timeout_never_zero() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), std::time::Duration::from_secs(1));
    }
}
