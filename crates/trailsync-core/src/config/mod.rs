//! Engine configuration.
//!
//! Provides `EngineConfig`, loaded from a JSON file with environment
//! overrides, used by the engine and by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

/// Delivery attempts before an item is parked as failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Periodic drain interval.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
/// Delay between connectivity regained and the triggered drain.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_BASE_URL: &str = "TRAILSYNC_API_BASE_URL";
const ENV_ACCESS_TOKEN: &str = "TRAILSYNC_ACCESS_TOKEN";
const ENV_DB_PATH: &str = "TRAILSYNC_DB_PATH";

/// Runtime configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Fast-cache file the in-memory queue is written to on shutdown
    #[serde(default)]
    pub queue_snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Bearer token; only ever taken from the environment
    #[serde(skip)]
    pub access_token: Option<String>,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            api_base_url: None,
            queue_snapshot_path: None,
            database_path: None,
            access_token: None,
        }
    }
}

impl EngineConfig {
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load from a JSON file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalized()
    }

    /// Apply `TRAILSYNC_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_API_BASE_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_ACCESS_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(path) = normalize_text_option(lookup(ENV_DB_PATH)) {
            self.database_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Validate and trim fields.
    pub fn normalized(mut self) -> Result<Self, String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.sync_interval_secs == 0 {
            return Err("sync_interval_secs must be at least 1".to_string());
        }
        self.api_base_url = normalize_text_option(self.api_base_url);
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err("api_base_url must include http:// or https://".to_string());
            }
            self.api_base_url = Some(url.trim_end_matches('/').to_string());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let config = EngineConfig::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
    }

    #[test]
    fn load_applies_partial_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "sync_interval_secs": 60, "api_base_url": " https://api.example.com/ " }"#,
        )
        .unwrap();

        let config = EngineConfig::load_from_path(&path).unwrap();
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{ "retries": 9 }"#).unwrap();

        let error = EngineConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("unknown field"));
    }

    #[test]
    fn normalized_rejects_bad_values() {
        let zero_attempts = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(zero_attempts.normalized().is_err());

        let bad_url = EngineConfig {
            api_base_url: Some("api.example.com".to_string()),
            ..EngineConfig::default()
        };
        assert!(bad_url.normalized().is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let config = EngineConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..EngineConfig::default()
        }
        .with_overrides(|key| match key {
            ENV_API_BASE_URL => Some("https://env.example.com".to_string()),
            ENV_ACCESS_TOKEN => Some("  token  ".to_string()),
            _ => None,
        });

        assert_eq!(config.api_base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.access_token.as_deref(), Some("token"));
        assert_eq!(config.database_path, None);
    }
}
