use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::api::{ApiError, PageResult};
use crate::entity::EntityId;
use crate::filters::BrowseFilters;
use crate::lifecycle::{LoadFailure, RequestSlot, Ticket};
use crate::url_state::Tab;

/// Default number of not-yet-displayed pages kept per tab.
pub const DEFAULT_PREFETCH_CAPACITY: usize = 8;

/// Identifies one requested page: (entity, tab, page, filter signature).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub entity: EntityId,
    pub tab: Tab,
    pub page: u32,
    pub filters: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// The user asked to see this page.
    Display,
    /// Speculative fetch ahead of need.
    Prefetch,
}

/// A network fetch the owner must perform and report back through
/// [`PageBrowser::apply`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub key: QueryKey,
    pub filters: BrowseFilters,
    pub purpose: FetchPurpose,
    pub ticket: Ticket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed(LoadFailure),
}

/// What happened to a settled fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Became the visible page.
    Displayed,
    /// Stored in the prefetch cache.
    Prefetched,
    /// Primary load failed; previous items stay visible.
    Failed,
    /// Superseded, cancelled or no longer relevant.
    Discarded,
}

#[derive(Debug)]
pub struct Applied {
    pub outcome: Outcome,
    /// Follow-up fetches (next-page prefetch) to dispatch.
    pub follow_up: Vec<FetchRequest>,
}

impl Applied {
    fn discarded() -> Self {
        Self {
            outcome: Outcome::Discarded,
            follow_up: Vec::new(),
        }
    }
}

/// Page cache and prefetcher for one (entity, tab).
///
/// The browser never performs I/O itself: every transition returns the
/// [`FetchRequest`]s to issue, and settled fetches come back through
/// [`apply`](Self::apply), which checks the request's ticket before touching
/// any state.
pub struct PageBrowser<T> {
    entity: EntityId,
    tab: Tab,
    filters: BrowseFilters,
    signature: String,
    page: u32,
    current: Option<PageResult<T>>,
    current_key: Option<QueryKey>,
    state: LoadState,
    display: RequestSlot,
    pending_display: Option<QueryKey>,
    /// `pending_display` is waiting on a prefetch already in flight.
    awaiting_prefetch: bool,
    prefetch_epoch: RequestSlot,
    prefetch_ticket: Ticket,
    prefetched: LruCache<QueryKey, PageResult<T>>,
    prefetch_in_flight: HashSet<QueryKey>,
}

impl<T: Clone> PageBrowser<T> {
    pub fn new(entity: EntityId, tab: Tab, filters: BrowseFilters, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let mut prefetch_epoch = RequestSlot::new("prefetch");
        let prefetch_ticket = prefetch_epoch.begin();
        let signature = filters.signature();
        Self {
            entity,
            tab,
            filters,
            signature,
            page: 1,
            current: None,
            current_key: None,
            state: LoadState::Idle,
            display: RequestSlot::new("page"),
            pending_display: None,
            awaiting_prefetch: false,
            prefetch_epoch,
            prefetch_ticket,
            prefetched: LruCache::new(capacity),
            prefetch_in_flight: HashSet::new(),
        }
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn filters(&self) -> &BrowseFilters {
        &self.filters
    }

    /// Page the user is on (or navigating to).
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Last successfully displayed page. Kept while a new page loads or
    /// after a failure so the view never flashes empty.
    pub fn current(&self) -> Option<&PageResult<T>> {
        self.current.as_ref()
    }

    pub fn items(&self) -> &[T] {
        self.current.as_ref().map_or(&[], |p| p.items.as_slice())
    }

    /// Controls are disabled while a page is loading.
    pub fn is_interactive(&self) -> bool {
        self.state != LoadState::Loading
    }

    pub fn is_prefetched(&self, page: u32) -> bool {
        self.prefetched.contains(&self.key_for(page))
    }

    pub fn key_for(&self, page: u32) -> QueryKey {
        QueryKey {
            entity: self.entity.clone(),
            tab: self.tab,
            page,
            filters: self.signature.clone(),
        }
    }

    /// Show page `page` under the current filters.
    pub fn request_page(&mut self, page: u32) -> Vec<FetchRequest> {
        let page = page.max(1);
        let key = self.key_for(page);
        self.page = page;

        if let Some(result) = self.prefetched.pop(&key) {
            tracing::debug!(page, tab = %self.tab, "Serving page from prefetch cache");
            self.display.cancel();
            self.pending_display = None;
            self.awaiting_prefetch = false;
            self.show(key, result);
            return self.schedule_next().into_iter().collect();
        }

        if self.pending_display.as_ref() == Some(&key) {
            tracing::debug!(page, "Page already loading, not issuing a duplicate request");
            return Vec::new();
        }

        if self.current_key.as_ref() == Some(&key) {
            // Already on screen: abandon whatever was loading and stay put.
            self.display.cancel();
            self.pending_display = None;
            self.awaiting_prefetch = false;
            self.state = LoadState::Loaded;
            return Vec::new();
        }

        self.state = LoadState::Loading;
        self.pending_display = Some(key.clone());

        if self.prefetch_in_flight.contains(&key) {
            tracing::debug!(page, "Waiting on in-flight prefetch instead of refetching");
            self.display.cancel();
            self.awaiting_prefetch = true;
            return Vec::new();
        }

        self.awaiting_prefetch = false;
        let ticket = self.display.begin();
        tracing::debug!(page, generation = ticket.generation(), tab = %self.tab, "Fetching page");
        vec![FetchRequest {
            key,
            filters: self.filters.clone(),
            purpose: FetchPurpose::Display,
            ticket,
        }]
    }

    /// Re-issue the current page (manual retry after a failure).
    pub fn retry(&mut self) -> Vec<FetchRequest> {
        self.pending_display = None;
        self.awaiting_prefetch = false;
        if let LoadState::Failed(_) = self.state {
            self.current_key = None;
        }
        self.request_page(self.page)
    }

    /// Replace the filters: drops every prefetched page, returns to page 1.
    pub fn set_filters(&mut self, filters: BrowseFilters) -> Vec<FetchRequest> {
        self.set_filters_at(filters, 1)
    }

    /// Replace the filters and land on `page` (history navigation can carry
    /// both at once).
    pub fn set_filters_at(&mut self, filters: BrowseFilters, page: u32) -> Vec<FetchRequest> {
        let signature = filters.signature();
        if signature == self.signature {
            self.filters = filters;
            return self.request_page(page);
        }
        tracing::debug!(tab = %self.tab, "Filters changed, clearing prefetch cache");
        self.signature = signature;
        self.filters = filters;
        self.invalidate_prefetch();
        self.request_page(page)
    }

    /// Opportunistic prefetch when the user hovers a "go to page" control.
    pub fn hover_page(&mut self, page: u32) -> Option<FetchRequest> {
        if page == 0 {
            return None;
        }
        if let Some(current) = &self.current {
            if self.current_key.as_ref().map(|k| &k.filters) == Some(&self.signature)
                && page > current.total_pages
            {
                return None;
            }
        }
        self.prefetch(page)
    }

    /// Drop everything page-scoped (tab switch or unmount of the list).
    pub fn reset(&mut self) {
        self.display.cancel();
        self.invalidate_prefetch();
        self.page = 1;
        self.current = None;
        self.current_key = None;
        self.pending_display = None;
        self.awaiting_prefetch = false;
        self.state = LoadState::Idle;
    }

    /// Apply a settled fetch. Results for superseded tickets are discarded
    /// without touching state.
    pub fn apply(
        &mut self,
        request: &FetchRequest,
        result: Result<PageResult<T>, ApiError>,
    ) -> Applied {
        match request.purpose {
            FetchPurpose::Display => self.apply_display(request, result),
            FetchPurpose::Prefetch => self.apply_prefetch(request, result),
        }
    }

    fn apply_display(
        &mut self,
        request: &FetchRequest,
        result: Result<PageResult<T>, ApiError>,
    ) -> Applied {
        if self.pending_display.as_ref() != Some(&request.key)
            || !self.display.settle(&request.ticket)
        {
            tracing::debug!(
                page = request.key.page,
                generation = request.ticket.generation(),
                current = self.display.generation(),
                "Ignoring stale page result"
            );
            return Applied::discarded();
        }
        self.pending_display = None;
        self.settle_display(request.key.clone(), result)
    }

    fn apply_prefetch(
        &mut self,
        request: &FetchRequest,
        result: Result<PageResult<T>, ApiError>,
    ) -> Applied {
        if !self.prefetch_epoch.is_current(&request.ticket) {
            tracing::debug!(page = request.key.page, "Dropping prefetch from old filters");
            return Applied::discarded();
        }
        self.prefetch_in_flight.remove(&request.key);

        if self.awaiting_prefetch && self.pending_display.as_ref() == Some(&request.key) {
            self.awaiting_prefetch = false;
            self.pending_display = None;
            return self.settle_display(request.key.clone(), result);
        }

        match result {
            Ok(page) if self.current_key.as_ref() != Some(&request.key) => {
                tracing::debug!(page = request.key.page, "Prefetched page");
                self.prefetched.put(request.key.clone(), page);
                Applied {
                    outcome: Outcome::Prefetched,
                    follow_up: Vec::new(),
                }
            }
            Ok(_) => Applied::discarded(),
            Err(e) => {
                tracing::debug!(page = request.key.page, error = %e, "Prefetch failed");
                Applied::discarded()
            }
        }
    }

    fn settle_display(
        &mut self,
        key: QueryKey,
        result: Result<PageResult<T>, ApiError>,
    ) -> Applied {
        match result {
            Ok(page) => {
                self.show(key, page);
                Applied {
                    outcome: Outcome::Displayed,
                    follow_up: self.schedule_next().into_iter().collect(),
                }
            }
            Err(ApiError::Cancelled) => {
                self.state = self.settled_state();
                Applied::discarded()
            }
            Err(e) => {
                tracing::warn!(page = key.page, tab = %self.tab, error = %e, "Page load failed");
                self.state = LoadState::Failed(LoadFailure::new(&self.entity, &e));
                Applied {
                    outcome: Outcome::Failed,
                    follow_up: Vec::new(),
                }
            }
        }
    }

    fn settled_state(&self) -> LoadState {
        if self.current.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Idle
        }
    }

    fn show(&mut self, key: QueryKey, page: PageResult<T>) {
        self.page = key.page;
        self.current = Some(page);
        self.current_key = Some(key);
        self.state = LoadState::Loaded;
    }

    /// Prefetch the page after the current one, if there is one.
    fn schedule_next(&mut self) -> Option<FetchRequest> {
        let current = self.current.as_ref()?;
        let next = current.page.checked_add(1)?;
        if next > current.total_pages {
            return None;
        }
        self.prefetch(next)
    }

    fn prefetch(&mut self, page: u32) -> Option<FetchRequest> {
        let key = self.key_for(page);
        if self.current_key.as_ref() == Some(&key)
            || self.pending_display.as_ref() == Some(&key)
            || self.prefetched.contains(&key)
            || self.prefetch_in_flight.contains(&key)
        {
            return None;
        }
        self.prefetch_in_flight.insert(key.clone());
        Some(FetchRequest {
            key,
            filters: self.filters.clone(),
            purpose: FetchPurpose::Prefetch,
            ticket: self.prefetch_ticket.clone(),
        })
    }

    fn invalidate_prefetch(&mut self) {
        self.prefetched.clear();
        self.prefetch_in_flight.clear();
        self.prefetch_ticket = self.prefetch_epoch.begin();
        if self.awaiting_prefetch {
            self.awaiting_prefetch = false;
            self.pending_display = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn browser() -> PageBrowser<u32> {
        PageBrowser::new(
            EntityId::parse("u12345").unwrap(),
            Tab::Novels,
            BrowseFilters::default(),
            DEFAULT_PREFETCH_CAPACITY,
        )
    }

    fn page(n: u32, total: u32) -> PageResult<u32> {
        PageResult {
            items: vec![n * 10, n * 10 + 1],
            page: n,
            total_pages: total,
            total_items: u64::from(total) * 2,
        }
    }

    fn japanese_only() -> BrowseFilters {
        BrowseFilters {
            japanese_only: true,
            ..Default::default()
        }
    }

    fn single(mut reqs: Vec<FetchRequest>) -> FetchRequest {
        assert_eq!(reqs.len(), 1, "expected exactly one request");
        reqs.remove(0)
    }

    #[test]
    fn test_load_then_prefetch_next() {
        let mut b = browser();
        let req = single(b.request_page(1));
        assert_eq!(req.purpose, FetchPurpose::Display);
        assert_eq!(b.state(), &LoadState::Loading);
        assert!(!b.is_interactive());

        let applied = b.apply(&req, Ok(page(1, 3)));
        assert_eq!(applied.outcome, Outcome::Displayed);
        assert_eq!(b.items(), &[10, 11]);
        let next = single(applied.follow_up);
        assert_eq!(next.purpose, FetchPurpose::Prefetch);
        assert_eq!(next.key.page, 2);
        assert_eq!(next.key.filters, "");
    }

    #[test]
    fn test_last_page_does_not_prefetch() {
        let mut b = browser();
        let req = single(b.request_page(1));
        let applied = b.apply(&req, Ok(page(1, 1)));
        assert!(applied.follow_up.is_empty());
    }

    #[test]
    fn test_prefetched_page_served_without_request() {
        let mut b = browser();
        let req = single(b.request_page(1));
        let next = single(b.apply(&req, Ok(page(1, 3))).follow_up);
        assert_eq!(b.apply(&next, Ok(page(2, 3))).outcome, Outcome::Prefetched);
        assert!(b.is_prefetched(2));

        let reqs = b.request_page(2);
        assert_eq!(b.items(), &[20, 21]);
        assert_eq!(b.state(), &LoadState::Loaded);
        assert!(!b.is_prefetched(2), "entry is consumed on use");
        // Only the follow-up prefetch of page 3 goes out.
        let follow = single(reqs);
        assert_eq!(follow.purpose, FetchPurpose::Prefetch);
        assert_eq!(follow.key.page, 3);
    }

    #[test]
    fn test_duplicate_request_is_deduplicated() {
        let mut b = browser();
        assert_eq!(b.request_page(4).len(), 1);
        assert!(b.request_page(4).is_empty());
    }

    #[test]
    fn test_request_during_prefetch_waits_for_it() {
        let mut b = browser();
        let req = single(b.request_page(1));
        let next = single(b.apply(&req, Ok(page(1, 3))).follow_up);

        // User clicks "next" before the prefetch lands: no second request.
        assert!(b.request_page(2).is_empty());
        assert_eq!(b.state(), &LoadState::Loading);

        let applied = b.apply(&next, Ok(page(2, 3)));
        assert_eq!(applied.outcome, Outcome::Displayed);
        assert_eq!(b.items(), &[20, 21]);
        assert_eq!(single(applied.follow_up).key.page, 3);
    }

    #[test]
    fn test_filter_change_race_keeps_latest() {
        let mut b = browser();
        let first = single(b.request_page(1));
        b.apply(&first, Ok(page(1, 5)));
        b.set_filters(japanese_only());

        // A: page 2 under JA.
        let a = single(b.request_page(2));
        assert_eq!(a.key.page, 2);
        // Filters go back to ALL before A resolves: B is page 1 / ALL.
        let b_req = single(b.set_filters(BrowseFilters::default()));
        assert_eq!(b_req.key.page, 1);
        assert_eq!(b_req.key.filters, "");

        assert_eq!(b.apply(&b_req, Ok(page(1, 5))).outcome, Outcome::Displayed);
        assert_eq!(b.apply(&a, Ok(page(2, 3))).outcome, Outcome::Discarded);
        assert_eq!(b.items(), &[10, 11]);
        assert_eq!(b.page(), 1);
        assert_eq!(b.filters(), &BrowseFilters::default());
    }

    #[test]
    fn test_stale_result_discarded_even_if_first_to_return() {
        let mut b = browser();
        let a = single(b.request_page(2));
        let c = single(b.set_filters(japanese_only()));

        assert_eq!(b.apply(&a, Ok(page(2, 4))).outcome, Outcome::Discarded);
        assert!(b.items().is_empty());
        assert_eq!(b.state(), &LoadState::Loading);
        assert_eq!(b.apply(&c, Ok(page(1, 2))).outcome, Outcome::Displayed);
    }

    #[test]
    fn test_filter_change_clears_prefetch() {
        let mut b = browser();
        let req = single(b.request_page(1));
        let next = single(b.apply(&req, Ok(page(1, 3))).follow_up);
        b.apply(&next, Ok(page(2, 3)));
        assert!(b.is_prefetched(2));

        let reqs = b.set_filters(japanese_only());
        assert_eq!(b.page(), 1);
        assert!(!b.is_prefetched(2));
        assert_eq!(single(reqs).purpose, FetchPurpose::Display);
    }

    #[test]
    fn test_prefetch_from_old_filters_dropped() {
        let mut b = browser();
        let req = single(b.request_page(1));
        let next = single(b.apply(&req, Ok(page(1, 3))).follow_up);
        b.set_filters(japanese_only());
        assert_eq!(b.apply(&next, Ok(page(2, 3))).outcome, Outcome::Discarded);
        assert!(next.ticket.is_cancelled());
    }

    #[test]
    fn test_back_to_displayed_page_while_loading_is_noop() {
        let mut b = browser();
        let req = single(b.request_page(1));
        b.apply(&req, Ok(page(1, 5)));

        let pending = single(b.request_page(3));
        assert_eq!(b.state(), &LoadState::Loading);

        assert!(b.request_page(1).is_empty());
        assert_eq!(b.state(), &LoadState::Loaded);
        assert_eq!(b.page(), 1);
        assert!(b.is_interactive());
        assert!(pending.ticket.is_cancelled());
        assert_eq!(b.apply(&pending, Ok(page(3, 5))).outcome, Outcome::Discarded);
        assert_eq!(b.items(), &[10, 11]);
    }

    #[test]
    fn test_renamed_tag_keeps_prefetch() {
        use crate::filters::{FilterMode, TagRef};

        let drama = BrowseFilters::default().with_tag(TagRef::new(5, "Drama"), FilterMode::Include);
        let mut b = browser();
        let req = single(b.set_filters(drama));
        let next = single(b.apply(&req, Ok(page(1, 3))).follow_up);
        b.apply(&next, Ok(page(2, 3)));

        let renamed = BrowseFilters::default().with_tag(TagRef::new(5, "drama"), FilterMode::Include);
        b.set_filters(renamed.clone());
        assert!(b.is_prefetched(2));
        assert_eq!(b.filters(), &renamed);
    }

    #[test]
    fn test_failure_keeps_previous_items() {
        let mut b = browser();
        let req = single(b.request_page(1));
        b.apply(&req, Ok(page(1, 3)));

        let req = single(b.request_page(3));
        let applied = b.apply(&req, Err(ApiError::HttpStatus(500)));
        assert_eq!(applied.outcome, Outcome::Failed);
        assert!(matches!(b.state(), LoadState::Failed(_)));
        assert_eq!(b.items(), &[10, 11]);
        assert!(b.is_interactive());

        let retry = single(b.retry());
        assert_eq!(retry.key.page, 3);
    }

    #[test]
    fn test_hover_prefetch_out_of_order() {
        let mut b = browser();
        let req = single(b.request_page(1));
        b.apply(&req, Ok(page(1, 9)));

        let hovered = b.hover_page(7).unwrap();
        assert_eq!(hovered.purpose, FetchPurpose::Prefetch);
        assert_eq!(hovered.key.page, 7);
        assert!(b.hover_page(7).is_none(), "already in flight");
        assert!(b.hover_page(1).is_none(), "already displayed");
        assert!(b.hover_page(10).is_none(), "beyond last page");

        b.apply(&hovered, Ok(page(7, 9)));
        let reqs = b.request_page(7);
        assert_eq!(b.items(), &[70, 71]);
        assert_eq!(single(reqs).key.page, 8);
    }

    #[test]
    fn test_prefetch_cache_is_bounded() {
        let mut b = PageBrowser::new(
            EntityId::parse("u1").unwrap(),
            Tab::Novels,
            BrowseFilters::default(),
            2,
        );
        let req = single(b.request_page(1));
        // Leave the page-2 prefetch in flight; only hovered pages land.
        let _in_flight = b.apply(&req, Ok(page(1, 20))).follow_up;
        for n in [5, 6, 7] {
            let r = b.hover_page(n).unwrap();
            b.apply(&r, Ok(page(n, 20)));
        }
        assert!(!b.is_prefetched(5));
        assert!(b.is_prefetched(6));
        assert!(b.is_prefetched(7));
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut b = browser();
        let req = single(b.request_page(1));
        b.apply(&req, Ok(page(1, 3)));
        let pending = single(b.request_page(3));
        b.reset();
        assert_eq!(b.state(), &LoadState::Idle);
        assert!(b.items().is_empty());
        assert_eq!(b.apply(&pending, Ok(page(3, 3))).outcome, Outcome::Discarded);
    }
}
