//! Configuration file parser for ~/.config/feedloom/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted and logged as warnings.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FeedClientOptions, DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT};
use crate::ingest::{DEFAULT_INTER_FEED_DELAY, DEFAULT_POLL_INTERVAL};
use crate::util::HostPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; `None` means `<config dir>/feedloom.db`.
    pub database_path: Option<PathBuf>,

    /// Minutes between scheduler passes. Must be at least 1.
    pub poll_interval_minutes: u64,

    /// Pause between feeds within one pass.
    pub inter_feed_delay_ms: u64,

    pub request_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    pub user_agent: String,

    /// Allow feeds on localhost and private networks (disables the SSRF guard).
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            poll_interval_minutes: DEFAULT_POLL_INTERVAL.as_secs() / 60,
            inter_feed_delay_ms: u64::try_from(DEFAULT_INTER_FEED_DELAY.as_millis()).unwrap_or(1000),
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_feed_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: concat!("feedloom/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "poll_interval_minutes",
        "inter_feed_delay_ms",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero interval or timeout → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            poll_interval_minutes = config.poll_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_minutes == 0 {
            return Err(ConfigError::Invalid("poll_interval_minutes must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.saturating_mul(60))
    }

    pub fn inter_feed_delay(&self) -> Duration {
        Duration::from_millis(self.inter_feed_delay_ms)
    }

    /// The database file, defaulting to `feedloom.db` inside `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedloom.db"))
    }

    pub fn client_options(&self) -> FeedClientOptions {
        FeedClientOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            max_body_bytes: self.max_feed_bytes,
            host_policy: if self.allow_private_hosts {
                HostPolicy::AllowPrivate
            } else {
                HostPolicy::PublicOnly
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.poll_interval_minutes, 30);
        assert_eq!(config.inter_feed_delay_ms, 1000);
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert!(config.user_agent.starts_with("feedloom/"));
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_and_whitespace_files_return_default() {
        let (_dir, path) = write_config("");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("poll_interval_minutes = 5\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poll_interval_minutes, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
database_path = "/var/lib/feedloom/store.db"
poll_interval_minutes = 60
inter_feed_delay_ms = 250
request_timeout_secs = 20
max_feed_bytes = 2048
user_agent = "custom/1.0"
allow_private_hosts = true
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path_in(Path::new("/ignored")),
            PathBuf::from("/var/lib/feedloom/store.db")
        );
        assert_eq!(config.inter_feed_delay(), Duration::from_millis(250));

        let options = config.client_options();
        assert_eq!(options.timeout, Duration::from_secs(20));
        assert_eq!(options.max_body_bytes, 2048);
        assert_eq!(options.user_agent, "custom/1.0");
        assert_eq!(options.host_policy, HostPolicy::AllowPrivate);
    }

    #[test]
    fn test_default_database_path_is_in_config_dir() {
        let config = Config::default();
        assert_eq!(
            config.database_path_in(Path::new("/home/u/.config/feedloom")),
            PathBuf::from("/home/u/.config/feedloom/feedloom.db")
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let (_dir, path) = write_config("poll_interval_minutes = 0\n");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("poll_interval_minutes"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("poll_interval_minutes = 15\ntotally_fake_key = \"x\"\n");
        assert_eq!(Config::load(&path).unwrap().poll_interval_minutes, 15);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("poll_interval_minutes = \"soon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
