//! Configuration file parser for ~/.config/vnclub/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::browse::DEFAULT_PREFETCH_CAPACITY;
use crate::lifecycle::{RetryPolicy, Timeouts};
use crate::preferences::TitleLanguage;
use crate::snapshot::DEFAULT_FRESHNESS_WINDOW;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

pub const DEFAULT_API_BASE_URL: &str = "https://api.vnclub.org/";

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the stats API. Must be HTTPS (localhost excepted).
    pub api_base_url: String,

    /// `[timeouts]` table: `lookup` and `aggregate`, in seconds.
    pub timeouts: Timeouts,

    /// `[retry]` table: `max_retries` and `delay_secs`.
    pub retry: RetryPolicy,

    /// Age below which a session snapshot is rendered without revalidating.
    pub freshness_window_secs: u64,

    /// Pages kept in each list's prefetch cache.
    pub prefetch_capacity: usize,

    /// Default title language until the user picks one.
    pub title_language: TitleLanguage,

    /// Default for revealing NSFW images until the user picks.
    pub nsfw_reveal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW.as_secs(),
            prefetch_capacity: DEFAULT_PREFETCH_CAPACITY,
            title_language: TitleLanguage::default(),
            nsfw_reveal: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a corrupted file cannot exhaust memory.
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
                // Deleted between metadata and read.
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
            let known_keys = [
                "api_base_url",
                "timeouts",
                "retry",
                "freshness_window_secs",
                "prefetch_capacity",
                "title_language",
                "nsfw_reveal",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            api = %config.api_base_url,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    /// Prefetch capacity, never zero.
    pub fn prefetch_capacity(&self) -> usize {
        self.prefetch_capacity.max(1)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vnclub_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.timeouts.lookup, Duration::from_secs(10));
        assert_eq!(config.timeouts.aggregate, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.delay, Duration::from_secs(10));
        assert_eq!(config.freshness_window(), Duration::from_secs(300));
        assert_eq!(config.prefetch_capacity(), 8);
        assert_eq!(config.title_language, TitleLanguage::Romaji);
        assert!(!config.nsfw_reveal);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/vnclub_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.prefetch_capacity, DEFAULT_PREFETCH_CAPACITY);
        cleanup(&path);
    }

    #[test]
    fn test_partial_tables_use_defaults_for_missing() {
        let path = write_config(
            "partial",
            "[timeouts]\naggregate = 120\n\n[retry]\nmax_retries = 5\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.timeouts.aggregate, Duration::from_secs(120));
        assert_eq!(config.timeouts.lookup, Duration::from_secs(10));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay, Duration::from_secs(10));
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
api_base_url = "http://localhost:8080/"
freshness_window_secs = 60
prefetch_capacity = 0
title_language = "japanese"
nsfw_reveal = true

[timeouts]
lookup = 5
aggregate = 90

[retry]
max_retries = 0
delay_secs = 3
"#;
        let path = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/");
        assert_eq!(config.freshness_window(), Duration::from_secs(60));
        assert_eq!(config.prefetch_capacity(), 1);
        assert_eq!(config.title_language, TitleLanguage::Japanese);
        assert!(config.nsfw_reveal);
        assert_eq!(config.timeouts.lookup, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.delay, Duration::from_secs(3));
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "nsfw_reveal = true\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert!(config.nsfw_reveal);
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "prefetch_capacity = \"many\"\n");
        assert!(Config::load(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_unknown_title_language_rejected() {
        let path = write_config("badlang", "title_language = \"klingon\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }
}
