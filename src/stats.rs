//! Loaders for a user's stats page.
//!
//! [`StatsLoader`] renders from the session snapshot when it can and only
//! goes to the network when the snapshot is missing or stale.
//! [`RecommendationLoader`] retries transient failures of the (slow)
//! recommendation endpoint. Both follow the same shape as the browse driver:
//! requests run as spawned tasks and their responses come back over `mpsc`
//! to be applied by the owner, after a ticket check.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{optional, ApiClient, ApiError, Recommendations, TagAnalytics, UserStats};
use crate::entity::EntityId;
use crate::filters::BrowseFilters;
use crate::lifecycle::{retry, LoadFailure, RequestSlot, RetryPolicy, Ticket};
use crate::snapshot::{SnapshotCache, SnapshotKind, SnapshotRead, StatsSnapshot};
use crate::storage::SessionStore;

/// Network side of the stats page.
pub trait StatsSource: Send + Sync + 'static {
    fn user_stats(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<UserStats, ApiError>> + Send;

    fn tag_analytics(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<TagAnalytics, ApiError>> + Send;

    fn recommendations(
        &self,
        uid: &EntityId,
        filters: &BrowseFilters,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Recommendations, ApiError>> + Send;
}

impl StatsSource for ApiClient {
    async fn user_stats(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> Result<UserStats, ApiError> {
        ApiClient::user_stats(self, uid, nocache, token).await
    }

    async fn tag_analytics(
        &self,
        uid: &EntityId,
        nocache: bool,
        token: &CancellationToken,
    ) -> Result<TagAnalytics, ApiError> {
        ApiClient::tag_analytics(self, uid, nocache, token).await
    }

    async fn recommendations(
        &self,
        uid: &EntityId,
        filters: &BrowseFilters,
        token: &CancellationToken,
    ) -> Result<Recommendations, ApiError> {
        ApiClient::recommendations(self, uid, filters, token).await
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Why a stats request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Nothing to show yet; the loading screen is up.
    Initial,
    /// Manual refresh, bypassing the backend's own cache.
    Refresh,
    /// Silent refresh of a stale snapshot that is already on screen.
    Revalidate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsState {
    Idle,
    Loading,
    Ready(StatsSnapshot),
    Failed(LoadFailure),
}

/// A settled stats request, sent back to the loader's owner.
#[derive(Debug)]
pub struct StatsResponse {
    pub uid: EntityId,
    pub mode: LoadMode,
    ticket: Ticket,
    result: Result<(UserStats, Option<TagAnalytics>), ApiError>,
}

/// What applying a [`StatsResponse`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    Loaded,
    Revalidated,
    Failed(LoadFailure),
    /// Background revalidation failed; the stale view stays.
    RevalidationDropped,
    /// Superseded by a later request or a navigation away.
    Discarded,
}

/// Drives the stats page for one user at a time.
pub struct StatsLoader<Src, St> {
    source: Arc<Src>,
    cache: SnapshotCache<St>,
    slot: RequestSlot,
    uid: Option<EntityId>,
    state: StatsState,
    tx: mpsc::Sender<StatsResponse>,
}

impl<Src, St> StatsLoader<Src, St>
where
    Src: StatsSource,
    St: SessionStore,
{
    pub fn new(source: Src, cache: SnapshotCache<St>, tx: mpsc::Sender<StatsResponse>) -> Self {
        Self {
            source: Arc::new(source),
            cache,
            slot: RequestSlot::new("stats"),
            uid: None,
            state: StatsState::Idle,
            tx,
        }
    }

    pub fn state(&self) -> &StatsState {
        &self.state
    }

    pub fn uid(&self) -> Option<&EntityId> {
        self.uid.as_ref()
    }

    /// A request (foreground or background) is outstanding.
    pub fn in_flight(&self) -> bool {
        self.slot.in_flight()
    }

    /// Show `uid`'s stats, from the snapshot when possible.
    pub async fn open(&mut self, uid: EntityId) -> &StatsState {
        // Anything still loading for the previous page is now irrelevant.
        self.slot.cancel();
        self.uid = Some(uid.clone());

        match self
            .cache
            .read::<UserStats, TagAnalytics>(SnapshotKind::Stats, &uid)
            .await
        {
            SnapshotRead::Fresh(snapshot) => {
                tracing::debug!(uid = %uid, "Rendering fresh snapshot");
                self.state = StatsState::Ready(snapshot);
            }
            SnapshotRead::Stale(snapshot) => {
                tracing::debug!(uid = %uid, "Rendering stale snapshot, revalidating");
                self.state = StatsState::Ready(snapshot);
                self.spawn_load(uid, LoadMode::Revalidate);
            }
            SnapshotRead::Absent => {
                self.state = StatsState::Loading;
                self.spawn_load(uid, LoadMode::Initial);
            }
        }
        &self.state
    }

    /// Force a recomputation on the backend.
    pub fn refresh(&mut self) {
        let Some(uid) = self.uid.clone() else {
            return;
        };
        self.state = StatsState::Loading;
        self.spawn_load(uid, LoadMode::Refresh);
    }

    /// Retry after a failed load. Same request as the original, fresh ticket.
    pub fn retry(&mut self) {
        let Some(uid) = self.uid.clone() else {
            return;
        };
        self.state = StatsState::Loading;
        self.spawn_load(uid, LoadMode::Initial);
    }

    /// Leave the page: cancel whatever is in flight.
    pub fn close(&mut self) {
        self.slot.cancel();
        self.uid = None;
        self.state = StatsState::Idle;
    }

    pub async fn handle_response(&mut self, response: StatsResponse) -> StatsEvent {
        if !self.slot.settle(&response.ticket) || self.uid.as_ref() != Some(&response.uid) {
            tracing::debug!(
                uid = %response.uid,
                generation = response.ticket.generation(),
                "Discarding superseded stats response"
            );
            return StatsEvent::Discarded;
        }

        match (response.result, response.mode) {
            (Ok((stats, tags)), mode) => {
                let snapshot = StatsSnapshot::new(stats, tags);
                self.cache
                    .write(SnapshotKind::Stats, &response.uid, &snapshot)
                    .await;
                self.state = StatsState::Ready(snapshot);
                tracing::info!(uid = %response.uid, ?mode, "Stats loaded");
                if mode == LoadMode::Revalidate {
                    StatsEvent::Revalidated
                } else {
                    StatsEvent::Loaded
                }
            }
            (Err(e), LoadMode::Revalidate) => {
                tracing::debug!(uid = %response.uid, error = %e, "Background revalidation failed");
                StatsEvent::RevalidationDropped
            }
            (Err(e), mode) => {
                tracing::warn!(uid = %response.uid, ?mode, error = %e, "Stats load failed");
                let failure = LoadFailure::new(&response.uid, &e);
                self.state = StatsState::Failed(failure.clone());
                StatsEvent::Failed(failure)
            }
        }
    }

    fn spawn_load(&mut self, uid: EntityId, mode: LoadMode) {
        let ticket = self.slot.begin();
        let source = self.source.clone();
        let tx = self.tx.clone();
        let nocache = mode == LoadMode::Refresh;
        tracing::debug!(uid = %uid, ?mode, generation = ticket.generation(), "Loading stats");

        tokio::spawn(async move {
            let token = ticket.token().clone();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ApiError::Cancelled),
                res = load_stats(source.as_ref(), &uid, nocache, &token) => res,
            };
            let response = StatsResponse {
                uid,
                mode,
                ticket,
                result,
            };
            if let Err(e) = tx.send(response).await {
                tracing::warn!(error = %e, event = "StatsResponse", "Channel send failed (receiver dropped)");
            }
        });
    }
}

/// Primary and secondary aggregates, fetched concurrently. Only the primary
/// can fail the load.
async fn load_stats<Src: StatsSource>(
    source: &Src,
    uid: &EntityId,
    nocache: bool,
    token: &CancellationToken,
) -> Result<(UserStats, Option<TagAnalytics>), ApiError> {
    let (stats, tags) = tokio::join!(
        source.user_stats(uid, nocache, token),
        source.tag_analytics(uid, nocache, token)
    );
    Ok((stats?, optional("tag_analytics", tags)))
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationState {
    Idle,
    /// Stays set across automatic retries until a final result arrives.
    Loading,
    Ready(Recommendations),
    Failed(LoadFailure),
}

#[derive(Debug)]
pub struct RecommendationResponse {
    pub uid: EntityId,
    ticket: Ticket,
    result: Result<Recommendations, ApiError>,
}

/// Loads recommendations under a [`RetryPolicy`].
pub struct RecommendationLoader<Src> {
    source: Arc<Src>,
    policy: RetryPolicy,
    slot: RequestSlot,
    state: RecommendationState,
    tx: mpsc::Sender<RecommendationResponse>,
}

impl<Src: StatsSource> RecommendationLoader<Src> {
    pub fn new(source: Src, policy: RetryPolicy, tx: mpsc::Sender<RecommendationResponse>) -> Self {
        Self::with_shared(Arc::new(source), policy, tx)
    }

    /// Share one source with a [`StatsLoader`] or another loader.
    pub fn with_shared(
        source: Arc<Src>,
        policy: RetryPolicy,
        tx: mpsc::Sender<RecommendationResponse>,
    ) -> Self {
        Self {
            source,
            policy,
            slot: RequestSlot::new("recommendations"),
            state: RecommendationState::Idle,
            tx,
        }
    }

    pub fn state(&self) -> &RecommendationState {
        &self.state
    }

    /// Start loading. Any previous load (and its retry budget) is abandoned.
    pub fn load(&mut self, uid: EntityId, filters: BrowseFilters) {
        let ticket = self.slot.begin();
        self.state = RecommendationState::Loading;

        let source = self.source.clone();
        let policy = self.policy;
        let tx = self.tx.clone();
        tracing::debug!(uid = %uid, generation = ticket.generation(), "Loading recommendations");

        tokio::spawn(async move {
            let token = ticket.token().clone();
            let result = retry(&policy, &token, |attempt| {
                let source = source.clone();
                let uid = uid.clone();
                let filters = filters.clone();
                let token = token.clone();
                async move {
                    if attempt > 0 {
                        tracing::info!(uid = %uid, attempt, "Retrying recommendations");
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(ApiError::Cancelled),
                        res = source.recommendations(&uid, &filters, &token) => res,
                    }
                }
            })
            .await;
            let response = RecommendationResponse { uid, ticket, result };
            if let Err(e) = tx.send(response).await {
                tracing::warn!(error = %e, event = "RecommendationResponse", "Channel send failed (receiver dropped)");
            }
        });
    }

    pub fn cancel(&mut self) {
        self.slot.cancel();
        if self.state == RecommendationState::Loading {
            self.state = RecommendationState::Idle;
        }
    }

    /// Apply a settled load. Returns `false` if it was superseded.
    pub fn handle_response(&mut self, response: RecommendationResponse) -> bool {
        if !self.slot.settle(&response.ticket) {
            tracing::debug!(uid = %response.uid, "Discarding superseded recommendations");
            return false;
        }
        self.state = match response.result {
            Ok(recs) => {
                tracing::info!(uid = %response.uid, count = recs.items.len(), "Recommendations loaded");
                RecommendationState::Ready(recs)
            }
            Err(e) => {
                tracing::warn!(uid = %response.uid, error = %e, "Recommendations failed");
                RecommendationState::Failed(LoadFailure::new(&response.uid, &e))
            }
        };
        true
    }
}
