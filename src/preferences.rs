//! Preference manager that merges config.toml defaults with DB overrides.
//!
//! Config values serve as defaults; DB values (user_preferences table) override them.
//! Writes always go to the DB, never to the config file.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::config::Config;
use crate::storage::Database;

pub const TITLE_LANGUAGE_KEY: &str = "display.title_language";
pub const NSFW_REVEAL_KEY: &str = "display.nsfw_reveal";

/// Which form of a title to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleLanguage {
    #[default]
    Romaji,
    Japanese,
    English,
}

impl TitleLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Romaji => "romaji",
            Self::Japanese => "japanese",
            Self::English => "english",
        }
    }

    /// Pick between a romanized title and the original-script one.
    pub fn pick<'a>(self, title: &'a str, original: Option<&'a str>) -> &'a str {
        match (self, original) {
            (Self::Japanese, Some(original)) if !original.is_empty() => original,
            _ => title,
        }
    }
}

impl fmt::Display for TitleLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TitleLanguage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "romaji" => Ok(Self::Romaji),
            "japanese" => Ok(Self::Japanese),
            "english" => Ok(Self::English),
            other => bail!("Unknown title language: {other}"),
        }
    }
}

// ============================================================================
// PreferenceManager
// ============================================================================

/// Merged preference store: config.toml defaults + DB overrides.
///
/// On load, config values are flattened into a `HashMap<String, String>`, then
/// all DB preferences are layered on top. Reads are in-memory.
pub struct PreferenceManager {
    prefs: HashMap<String, String>,
}

impl PreferenceManager {
    /// Load preferences by merging config defaults with DB overrides.
    pub async fn load(config: &Config, db: &Database) -> Result<Self> {
        let mut prefs = Self::flatten_config(config);

        // DB wins over config
        let db_prefs = db.get_preferences_by_prefix("").await?;
        for (key, value) in db_prefs {
            prefs.insert(key, value);
        }

        Ok(Self { prefs })
    }

    /// Create from config only (no DB). Fallback for when DB load fails.
    pub fn from_config(config: &Config) -> Self {
        Self {
            prefs: Self::flatten_config(config),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prefs.get(key).map(String::as_str)
    }

    /// Set a preference: writes to DB and updates in-memory map.
    pub async fn set(&mut self, db: &Database, key: &str, value: &str) -> Result<()> {
        db.set_preference(key, value).await?;
        self.prefs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    // ========================================================================
    // Type-safe Accessors
    // ========================================================================

    /// Falls back to romaji when the stored value is unrecognized.
    pub fn title_language(&self) -> TitleLanguage {
        self.get(TITLE_LANGUAGE_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub async fn set_title_language(&mut self, db: &Database, lang: TitleLanguage) -> Result<()> {
        self.set(db, TITLE_LANGUAGE_KEY, lang.as_str()).await
    }

    pub fn nsfw_reveal(&self) -> bool {
        self.get(NSFW_REVEAL_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }

    pub async fn set_nsfw_reveal(&mut self, db: &Database, reveal: bool) -> Result<()> {
        self.set(db, NSFW_REVEAL_KEY, if reveal { "true" } else { "false" })
            .await
    }

    fn flatten_config(config: &Config) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            TITLE_LANGUAGE_KEY.to_string(),
            config.title_language.as_str().to_string(),
        );
        map.insert(NSFW_REVEAL_KEY.to_string(), config.nsfw_reveal.to_string());
        map
    }
}

// ============================================================================
// Tests
// ============================================================================
