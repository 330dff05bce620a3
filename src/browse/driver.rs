use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::browser::{FetchRequest, Outcome, PageBrowser};
use crate::api::{ApiClient, ApiError, EntitySummary, NovelEntry, PageResult};
use crate::entity::EntityKind;
use crate::filters::BrowseFilters;

/// Something that can fetch one page for a [`PageBrowser`].
pub trait PageSource<T>: Send + Sync + 'static {
    fn fetch_page(
        &self,
        request: &FetchRequest,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<PageResult<T>, ApiError>> + Send;
}

/// A user's visual novel list.
pub struct NovelListSource {
    client: ApiClient,
}

impl NovelListSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

impl PageSource<NovelEntry> for NovelListSource {
    async fn fetch_page(
        &self,
        request: &FetchRequest,
        token: &CancellationToken,
    ) -> Result<PageResult<NovelEntry>, ApiError> {
        self.client
            .user_novels(&request.key.entity, request.key.page, &request.filters, token)
            .await
    }
}

/// A catalog listing (VNs, characters, staff, ...).
pub struct CatalogSource {
    client: ApiClient,
    kind: EntityKind,
}

impl CatalogSource {
    pub fn new(client: ApiClient, kind: EntityKind) -> Self {
        Self { client, kind }
    }
}

impl PageSource<EntitySummary> for CatalogSource {
    async fn fetch_page(
        &self,
        request: &FetchRequest,
        token: &CancellationToken,
    ) -> Result<PageResult<EntitySummary>, ApiError> {
        self.client
            .browse(self.kind, request.key.page, &request.filters, token)
            .await
    }
}

/// A fetch that settled in the background.
#[derive(Debug)]
pub struct BrowseEvent<T> {
    pub request: FetchRequest,
    pub result: Result<PageResult<T>, ApiError>,
}

/// Runs a [`PageBrowser`]'s fetches on the tokio runtime.
///
/// Fetches are spawned as tasks that report back over an `mpsc` channel; the
/// owner feeds each [`BrowseEvent`] to [`handle_event`](Self::handle_event)
/// from the single task that owns the driver, so state is only ever mutated
/// in one place.
pub struct BrowseDriver<T, S> {
    browser: PageBrowser<T>,
    source: Arc<S>,
    tx: mpsc::Sender<BrowseEvent<T>>,
}

impl<T, S> BrowseDriver<T, S>
where
    T: Clone + Send + 'static,
    S: PageSource<T>,
{
    pub fn new(browser: PageBrowser<T>, source: S, tx: mpsc::Sender<BrowseEvent<T>>) -> Self {
        Self {
            browser,
            source: Arc::new(source),
            tx,
        }
    }

    pub fn browser(&self) -> &PageBrowser<T> {
        &self.browser
    }

    pub fn request_page(&mut self, page: u32) {
        let requests = self.browser.request_page(page);
        self.dispatch(requests);
    }

    pub fn set_filters(&mut self, filters: BrowseFilters) {
        let requests = self.browser.set_filters(filters);
        self.dispatch(requests);
    }

    pub fn set_filters_at(&mut self, filters: BrowseFilters, page: u32) {
        let requests = self.browser.set_filters_at(filters, page);
        self.dispatch(requests);
    }

    pub fn hover_page(&mut self, page: u32) {
        let request = self.browser.hover_page(page);
        self.dispatch(request.into_iter().collect());
    }

    pub fn retry(&mut self) {
        let requests = self.browser.retry();
        self.dispatch(requests);
    }

    pub fn reset(&mut self) {
        self.browser.reset();
    }

    pub fn handle_event(&mut self, event: BrowseEvent<T>) -> Outcome {
        let applied = self.browser.apply(&event.request, event.result);
        self.dispatch(applied.follow_up);
        applied.outcome
    }

    fn dispatch(&self, requests: Vec<FetchRequest>) {
        for request in requests {
            spawn_fetch(self.source.clone(), request, self.tx.clone());
        }
    }
}

fn spawn_fetch<T, S>(source: Arc<S>, request: FetchRequest, tx: mpsc::Sender<BrowseEvent<T>>)
where
    T: Send + 'static,
    S: PageSource<T>,
{
    tokio::spawn(async move {
        let token = request.ticket.token().clone();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApiError::Cancelled),
            res = source.fetch_page(&request, &token) => res,
        };
        if matches!(result, Err(ApiError::Cancelled)) {
            tracing::debug!(page = request.key.page, "Fetch cancelled");
        }
        if let Err(e) = tx.send(BrowseEvent { request, result }).await {
            tracing::warn!(error = %e, event = "BrowseEvent", "Channel send failed (receiver dropped)");
        }
    });
}
