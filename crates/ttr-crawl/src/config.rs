//! Crawl configuration stored in `.ttr/config.json`.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory holding TTR state inside a working directory.
pub const STATE_DIR: &str = ".ttr";
const CONFIG_FILE: &str = "config.json";
/// Overrides the configured provider API key.
pub const API_KEY_ENV: &str = "TTR_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("max_concurrent_requests must be at least 1")]
    ZeroConcurrency,
}

/// Settings for talking to the transaction history provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Provider endpoint, e.g. `https://api.etherscan.io/api`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Upper bound on fetches in flight across all tasks.
    pub max_concurrent_requests: usize,
    /// Delay before re-sending a rate-limited fetch.
    pub rate_limit_backoff_ms: u64,
    /// Keep successful provider responses in memory for the run.
    pub cache_responses: bool,
    /// JSON price table used by the price strategy.
    pub price_table: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.etherscan.io/api".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            max_concurrent_requests: 8,
            rate_limit_backoff_ms: 250,
            cache_responses: true,
            price_table: None,
        }
    }
}

impl CrawlConfig {
    /// Path of the config file under `root`.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Reads a config file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.with_env_overrides().validated()
    }

    /// Loads `root/.ttr/config.json`, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(root);
        if path.exists() {
            Self::load(&path)
        } else {
            Self::default().with_env_overrides().validated()
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(write_err)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        self
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"base_url": "http://localhost:9000/api"}"#).unwrap();

        let config = CrawlConfig::load(&path).unwrap();
        assert_eq!(config.base_url, "http://localhost:9000/api");
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.rate_limit_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_save_then_load_in_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlConfig {
            request_timeout_secs: 5,
            cache_responses: false,
            ..CrawlConfig::default()
        };
        let path = CrawlConfig::path_in(dir.path());
        config.save(&path).unwrap();

        assert!(dir.path().join(".ttr/config.json").exists());
        let loaded = CrawlConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.request_timeout_secs, 5);
        assert!(!loaded.cache_responses);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_concurrent_requests": 0}"#).unwrap();

        assert!(matches!(
            CrawlConfig::load(&path),
            Err(ConfigError::ZeroConcurrency)
        ));
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = CrawlConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }
}
