//! Configuration file parser for ~/.config/feedkeeper/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged, since they are usually typos.
//! Refresh cadence and retention live in the database (`Settings`), not here.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchOptions;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is out of range.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Process-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `feeds.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Per-request HTTP timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    pub user_agent: String,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per retry.
    pub retry_base_delay_ms: u64,

    /// Events buffered per notification subscriber.
    pub notification_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            database_path: None,
            fetch_timeout_secs: fetch.timeout.as_secs(),
            max_feed_bytes: fetch.max_bytes,
            user_agent: fetch.user_agent,
            max_retries: fetch.max_retries,
            retry_base_delay_ms: fetch.retry_base_delay.as_millis() as u64,
            notification_capacity: crate::sync::DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "fetch_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "max_retries",
        "retry_base_delay_ms",
        "notification_capacity",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero timeout, body limit or capacity → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never buffered.
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
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be > 0".into()));
        }
        if self.max_feed_bytes == 0 {
            return Err(ConfigError::Invalid("max_feed_bytes must be > 0".into()));
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the database location, defaulting to `feeds.db` under `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feeds.db"))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_bytes: self.max_feed_bytes,
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Engine-level bound on one source fetch: every attempt may time out,
    /// plus the backoff between attempts.
    pub fn sync_fetch_timeout(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let requests = Duration::from_secs(self.fetch_timeout_secs).saturating_mul(attempts);
        let backoff = Duration::from_millis(self.retry_base_delay_ms)
            .saturating_mul(2u32.saturating_pow(self.max_retries));
        requests.saturating_add(backoff)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "feedkeeper_config_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.notification_capacity, 64);
        assert!(config.user_agent.starts_with("feedkeeper/"));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedkeeper_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  \n");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "fetch_timeout_secs = 10\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.max_retries, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedkeeper/feeds.db"
fetch_timeout_secs = 15
max_feed_bytes = 1048576
user_agent = "custom/1.0"
max_retries = 1
retry_base_delay_ms = 250
notification_capacity = 8
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/feedkeeper/feeds.db"))
        );
        assert_eq!(config.user_agent, "custom/1.0");
        assert_eq!(config.notification_capacity, 8);

        let fetch = config.fetch_options();
        assert_eq!(fetch.timeout, Duration::from_secs(15));
        assert_eq!(fetch.max_bytes, 1_048_576);
        assert_eq!(fetch.retry_base_delay, Duration::from_millis(250));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "max_retries = 2\ntotally_fake_key = 1\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = write_config("wrongtype", "fetch_timeout_secs = \"soon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_values_rejected() {
        for content in [
            "fetch_timeout_secs = 0\n",
            "max_feed_bytes = 0\n",
            "notification_capacity = 0\n",
        ] {
            let (dir, path) = write_config("zero", content);
            assert!(
                matches!(Config::load(&path), Err(ConfigError::Invalid(_))),
                "{content}"
            );
            std::fs::remove_dir_all(&dir).ok();
        }
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert_eq!(
            config.database_path_in(Path::new("/home/u/.config/feedkeeper")),
            PathBuf::from("/home/u/.config/feedkeeper/feeds.db")
        );
    }

    #[test]
    fn test_sync_fetch_timeout_covers_retries() {
        let config = Config {
            fetch_timeout_secs: 10,
            max_retries: 2,
            retry_base_delay_ms: 1000,
            ..Config::default()
        };
        // 3 attempts of 10s plus 1s * 2^2 of backoff
        assert_eq!(config.sync_fetch_timeout(), Duration::from_secs(34));
    }
}
