use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::types::{
    EntityDetail, EntitySummary, NovelEntry, PageResult, Recommendations, TagAnalytics, UserInfo,
    UserStats,
};
use crate::entity::{EntityId, EntityKind};
use crate::filters::BrowseFilters;
use crate::lifecycle::{run_with_timeout, Timeouts};

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Default number of rows per list page.
pub const DEFAULT_PAGE_SIZE: u32 = 24;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Not found")]
    NotFound,
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

impl ApiError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::HttpStatus(status) => *status >= 500,
            ApiError::Cancelled
            | ApiError::NotFound
            | ApiError::ResponseTooLarge(_)
            | ApiError::Decode(_)
            | ApiError::InvalidUrl
            | ApiError::InsecureBaseUrl => false,
        }
    }
}

/// Swallow a failure of secondary data (similar items, tag analytics,
/// credits) so the page renders without that section.
pub fn optional<T>(section: &'static str, result: Result<T, ApiError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(ApiError::Cancelled) => None,
        Err(e) => {
            tracing::debug!(section, error = %e, "Optional section failed, rendering without it");
            None
        }
    }
}

/// Typed client for the stats backend.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    timeouts: Timeouts,
}

impl ApiClient {
    pub fn new(base_url: &str, timeouts: Timeouts) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vnclub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(http, base_url, timeouts)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        timeouts: Timeouts,
    ) -> Result<Self, ApiError> {
        let base = validate_base_url(base_url)?;
        Ok(Self {
            http,
            base,
            timeouts,
        })
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub async fn lookup_user(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<UserInfo, ApiError> {
        let params = [("q", query.to_string())];
        self.get_json("user/lookup", &params, self.timeouts.lookup, token)
            .await
    }

    /// `nocache` asks the backend to recompute instead of serving its own
    /// cached aggregate (manual refresh).
    pub async fn user_stats(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> Result<UserStats, ApiError> {
        self.get_json(
            &format!("stats/{uid}"),
            &nocache_params(nocache),
            self.timeouts.aggregate,
            token,
        )
        .await
    }

    pub async fn tag_analytics(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> Result<TagAnalytics, ApiError> {
        self.get_json(
            &format!("stats/{uid}/tags"),
            &nocache_params(nocache),
            self.timeouts.aggregate,
            token,
        )
        .await
    }

    pub async fn user_novels(
        &self,
        uid: &EntityId,
        page: u32,
        filters: &BrowseFilters,
        token: &CancellationToken,
    ) -> Result<PageResult<NovelEntry>, ApiError> {
        let params = page_params(page, filters);
        self.get_json(
            &format!("stats/{uid}/novels"),
            &params,
            self.timeouts.lookup,
            token,
        )
        .await
    }

    pub async fn browse(
        &self,
        kind: EntityKind,
        page: u32,
        filters: &BrowseFilters,
        token: &CancellationToken,
    ) -> Result<PageResult<EntitySummary>, ApiError> {
        let params = page_params(page, filters);
        self.get_json(
            &format!("browse/{}", kind.api_segment()),
            &params,
            self.timeouts.lookup,
            token,
        )
        .await
    }

    pub async fn entity(
        &self,
        id: &EntityId,
        token: &CancellationToken,
    ) -> Result<EntityDetail, ApiError> {
        self.get_json(
            &format!("{}/{id}", id.kind().api_segment()),
            &[],
            self.timeouts.lookup,
            token,
        )
        .await
    }

    pub async fn recommendations(
        &self,
        uid: &EntityId,
        filters: &BrowseFilters,
        token: &CancellationToken,
    ) -> Result<Recommendations, ApiError> {
        let params = filters.to_api_params();
        self.get_json(
            &format!("recommendations/{uid}"),
            &params,
            self.timeouts.aggregate,
            token,
        )
        .await
    }

    pub async fn similar(
        &self,
        vid: &EntityId,
        token: &CancellationToken,
    ) -> Result<Vec<EntitySummary>, ApiError> {
        self.get_json(
            &format!("vn/{vid}/similar"),
            &[],
            self.timeouts.lookup,
            token,
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<T, ApiError> {
        let mut url = self.base.join(path).map_err(|_| ApiError::InvalidUrl)?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }

        tracing::debug!(url = %url, timeout_secs = timeout.as_secs(), "API request");
        let bytes = run_with_timeout(timeout, token, async {
            let response = self.http.get(url.clone()).send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound);
            }
            if !status.is_success() {
                return Err(ApiError::HttpStatus(status.as_u16()));
            }
            read_limited_bytes(response, MAX_RESPONSE_SIZE).await
        })
        .await?;

        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn nocache_params(nocache: bool) -> Vec<(&'static str, String)> {
    if nocache {
        vec![("nocache", "true".to_string())]
    } else {
        Vec::new()
    }
}

fn page_params(page: u32, filters: &BrowseFilters) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", page.max(1).to_string()),
        ("limit", DEFAULT_PAGE_SIZE.to_string()),
    ];
    params.extend(filters.to_api_params());
    params
}

/// Parse the configured base URL, enforcing HTTPS except for localhost.
///
/// The returned URL always ends in `/` so relative joins append to it.
fn validate_base_url(raw: &str) -> Result<Url, ApiError> {
    let mut base = Url::parse(raw).map_err(|_| ApiError::InvalidUrl)?;
    match base.scheme() {
        "https" => {}
        "http" => {
            let is_localhost = matches!(base.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
            if !is_localhost {
                tracing::error!(base_url = %raw, "Rejecting non-HTTPS base URL (HTTPS required except for localhost)");
                return Err(ApiError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %raw, "Using non-HTTPS API base URL (localhost only)");
        }
        _ => return Err(ApiError::InvalidUrl),
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
