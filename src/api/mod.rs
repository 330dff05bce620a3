//! Client for the VN Club stats backend.
//!
//! The backend does all of the heavy lifting (stats aggregation,
//! recommendation scoring, similarity search); this module only issues
//! `GET` requests with per-operation timeouts and decodes the JSON.

mod client;
mod types;

pub use client::{optional, ApiClient, ApiError, DEFAULT_PAGE_SIZE};
pub use types::{
    EntityDetail, EntitySummary, MonthlyActivity, NovelEntry, PageResult, Recommendation,
    Recommendations, ScoreBucket, ScoreComponent, StatsSummary, TagAnalytics, TagStat, UserInfo,
    UserStats,
};
