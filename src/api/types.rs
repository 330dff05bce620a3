//! Wire types returned by the stats API.
//!
//! Optional sections use `#[serde(default)]` so older backends that omit them
//! still decode; required sections do not, so a payload missing them is
//! rejected at the boundary.
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// One page of a paginated list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub page: u32,
    #[serde(alias = "totalPages")]
    pub total_pages: u32,
    #[serde(alias = "totalItems")]
    pub total_items: u64,
}

impl<T> PageResult<T> {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: EntityId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_vns: u32,
    pub completed: u32,
    pub playing: u32,
    pub dropped: u32,
    pub wishlist: u32,
    pub average_score: Option<f32>,
    #[serde(default)]
    pub total_play_hours: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub score: u8,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyActivity {
    /// `YYYY-MM`
    pub month: String,
    pub finished: u32,
}

/// Primary aggregate for a user's stats page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user: UserInfo,
    pub summary: StatsSummary,
    #[serde(default)]
    pub score_distribution: Vec<ScoreBucket>,
    #[serde(default)]
    pub monthly_activity: Vec<MonthlyActivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagStat {
    pub id: u32,
    pub name: String,
    pub count: u32,
    #[serde(default)]
    pub average_score: Option<f32>,
}

/// Secondary aggregate: tag and trait analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAnalytics {
    pub top_tags: Vec<TagStat>,
    #[serde(default)]
    pub top_traits: Vec<TagStat>,
}

/// A row in a user's visual novel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelEntry {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub alt_title: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub user_score: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Compact entity card used by browse lists and similarity results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDetail {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub source: String,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub vn: EntitySummary,
    pub score: f32,
    #[serde(default)]
    pub breakdown: Vec<ScoreComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub items: Vec<Recommendation>,
}
