//! Entity identifiers (`u12345`, `v999`, `c42`, ...).
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of addressable object, derived from the id's prefix letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    VisualNovel,
    Character,
    Trait,
    Tag,
    Staff,
    Producer,
}

impl EntityKind {
    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'u' => Some(Self::User),
            'v' => Some(Self::VisualNovel),
            'c' => Some(Self::Character),
            'i' => Some(Self::Trait),
            'g' => Some(Self::Tag),
            's' => Some(Self::Staff),
            'p' => Some(Self::Producer),
            _ => None,
        }
    }

    /// Path segment used by the stats API for this kind.
    pub fn api_segment(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::VisualNovel => "vn",
            Self::Character => "character",
            Self::Trait => "trait",
            Self::Tag => "tag",
            Self::Staff => "staff",
            Self::Producer => "producer",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("Empty entity id")]
    Empty,
    #[error("Unknown entity prefix in {0:?}")]
    UnknownPrefix(String),
    #[error("Entity id {0:?} must be a prefix letter followed by digits")]
    Malformed(String),
}

/// Opaque, immutable identifier for a user, VN, character, trait, tag, staff
/// member or producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn parse(raw: &str) -> Result<Self, EntityIdError> {
        let raw = raw.trim();
        let mut chars = raw.chars();
        let Some(prefix) = chars.next() else {
            return Err(EntityIdError::Empty);
        };
        if EntityKind::from_prefix(prefix).is_none() {
            return Err(EntityIdError::UnknownPrefix(raw.to_string()));
        }
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EntityIdError::Malformed(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn kind(&self) -> EntityKind {
        // Construction guarantees a known prefix.
        self.0
            .chars()
            .next()
            .and_then(EntityKind::from_prefix)
            .unwrap_or(EntityKind::User)
    }

    /// Numeric part of the id (`"v17"` → `17`).
    pub fn number(&self) -> u64 {
        self.0[1..].parse().unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Authoritative VNDB page for this entity, shown as a fallback link on
    /// error panels.
    pub fn upstream_url(&self) -> String {
        format!("https://vndb.org/{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EntityId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
