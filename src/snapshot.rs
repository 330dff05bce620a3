//! Session-persisted snapshots of an entity's aggregates.
//!
//! A snapshot lets a revisited page render instantly. Entries are parsed into
//! a typed schema and run through [`SnapshotSchema::validate`] before use;
//! anything that fails either step is removed and reported as
//! [`SnapshotRead::Absent`]. Storage failures never surface to the caller:
//! the cache is an optimization, so a failed read is a miss and a failed
//! write is logged and dropped.
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::api::{NovelEntry, PageResult, TagAnalytics, UserStats};
use crate::entity::EntityId;
use crate::storage::SessionStore;

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Which aggregate a snapshot holds. Each kind has its own key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Stats,
    Novels,
}

impl SnapshotKind {
    pub fn key(self, entity: &EntityId) -> String {
        match self {
            Self::Stats => format!("stats-cache-{entity}"),
            Self::Novels => format!("novels-cache-{entity}"),
        }
    }
}

/// Structural check run on a snapshot section after it parses.
pub trait SnapshotSchema {
    /// Whether this value is usable as a snapshot of `owner`.
    fn validate(&self, owner: &EntityId) -> bool;
}

impl SnapshotSchema for () {
    fn validate(&self, _owner: &EntityId) -> bool {
        true
    }
}

impl SnapshotSchema for UserStats {
    fn validate(&self, owner: &EntityId) -> bool {
        self.user.uid == *owner
    }
}

impl SnapshotSchema for TagAnalytics {
    fn validate(&self, _owner: &EntityId) -> bool {
        true
    }
}

impl<T> SnapshotSchema for PageResult<T> {
    fn validate(&self, _owner: &EntityId) -> bool {
        self.page >= 1 && (self.total_pages == 0 || self.page <= self.total_pages)
    }
}

/// A primary aggregate, an optional secondary one, and when they were taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<P, S = ()> {
    pub primary: P,
    pub secondary: Option<S>,
    /// Milliseconds since the Unix epoch. Older entries may lack it.
    pub cached_at: Option<i64>,
}

pub type StatsSnapshot = Snapshot<UserStats, TagAnalytics>;
pub type NovelsSnapshot = Snapshot<PageResult<NovelEntry>>;

impl<P, S> Snapshot<P, S> {
    /// A snapshot stamped with the current time.
    pub fn new(primary: P, secondary: Option<S>) -> Self {
        Self {
            primary,
            secondary,
            cached_at: Some(Utc::now().timestamp_millis()),
        }
    }

    /// Age at `now_ms`, or `None` for an unstamped snapshot (infinitely old).
    pub fn age_at(&self, now_ms: i64) -> Option<Duration> {
        let cached_at = self.cached_at?;
        let millis = now_ms.saturating_sub(cached_at).max(0);
        Some(Duration::from_millis(millis as u64))
    }
}

impl<P: SnapshotSchema, S: SnapshotSchema> Snapshot<P, S> {
    fn is_valid(&self, owner: &EntityId) -> bool {
        self.primary.validate(owner)
            && self
                .secondary
                .as_ref()
                .map_or(true, |secondary| secondary.validate(owner))
    }
}

/// Result of a snapshot lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotRead<T> {
    /// Younger than the freshness window: render, no refetch.
    Fresh(T),
    /// Valid but old: render, then revalidate in the background.
    Stale(T),
    Absent,
}

impl<T> SnapshotRead<T> {
    pub fn into_snapshot(self) -> Option<T> {
        match self {
            Self::Fresh(s) | Self::Stale(s) => Some(s),
            Self::Absent => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Snapshot reads and writes over a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SnapshotCache<St> {
    store: St,
    freshness: Duration,
}

impl<St: SessionStore> SnapshotCache<St> {
    pub fn new(store: St) -> Self {
        Self::with_freshness(store, DEFAULT_FRESHNESS_WINDOW)
    }

    pub fn with_freshness(store: St, freshness: Duration) -> Self {
        Self { store, freshness }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    pub async fn read<P, S>(
        &self,
        kind: SnapshotKind,
        entity: &EntityId,
    ) -> SnapshotRead<Snapshot<P, S>>
    where
        P: DeserializeOwned + SnapshotSchema,
        S: DeserializeOwned + SnapshotSchema,
    {
        self.read_at(kind, entity, Utc::now().timestamp_millis())
            .await
    }

    /// [`read`](Self::read) with an explicit clock.
    pub async fn read_at<P, S>(
        &self,
        kind: SnapshotKind,
        entity: &EntityId,
        now_ms: i64,
    ) -> SnapshotRead<Snapshot<P, S>>
    where
        P: DeserializeOwned + SnapshotSchema,
        S: DeserializeOwned + SnapshotSchema,
    {
        let key = kind.key(entity);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SnapshotRead::Absent,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Snapshot read failed, treating as miss");
                return SnapshotRead::Absent;
            }
        };

        let snapshot = match serde_json::from_str::<Snapshot<P, S>>(&raw) {
            Ok(s) if s.is_valid(entity) => s,
            Ok(_) => {
                tracing::warn!(key = %key, "Snapshot belongs to another entity, discarding");
                self.discard(&key).await;
                return SnapshotRead::Absent;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Corrupt snapshot, discarding");
                self.discard(&key).await;
                return SnapshotRead::Absent;
            }
        };

        match snapshot.age_at(now_ms) {
            Some(age) if age < self.freshness => {
                tracing::debug!(key = %key, age_ms = age.as_millis() as u64, "Fresh snapshot");
                SnapshotRead::Fresh(snapshot)
            }
            age => {
                tracing::debug!(
                    key = %key,
                    age_ms = age.map(|a| a.as_millis() as u64),
                    "Stale snapshot"
                );
                SnapshotRead::Stale(snapshot)
            }
        }
    }

    /// Store `snapshot` for `entity`. Failures are logged, never returned.
    pub async fn write<P, S>(&self, kind: SnapshotKind, entity: &EntityId, snapshot: &Snapshot<P, S>)
    where
        P: Serialize,
        S: Serialize,
    {
        let key = kind.key(entity);
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Snapshot serialization failed");
                return;
            }
        };
        match self.store.set(&key, &raw).await {
            Ok(()) => tracing::debug!(key = %key, bytes = raw.len(), "Snapshot written"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Snapshot write failed"),
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove corrupt snapshot");
        }
    }
}
