//! Integration tests for paginated browsing: the async driver, prefetching,
//! supersession races and the URL-synced page.
//!
//! The page source is a fake with per-page delays; tests run on paused tokio
//! time so "slow" responses are deterministic.

use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vnclub::api::{ApiError, PageResult};
use vnclub::browse::{
    BrowseDriver, BrowseEvent, BrowsePage, FetchRequest, LoadState, Outcome, PageBrowser,
    PageSource,
};
use vnclub::entity::EntityId;
use vnclub::filters::{BrowseFilters, FilterMode, TagRef};
use vnclub::url_state::{HistoryMode, NavChange, Tab, UrlSync};

#[derive(Clone, Default)]
struct FakeSource {
    calls: Arc<Mutex<Vec<(u32, String)>>>,
    /// Delay keyed by (page, filter signature); default is 100ms.
    delays: HashMap<(u32, String), Duration>,
    total_pages: u32,
}

impl FakeSource {
    fn new(total_pages: u32) -> Self {
        Self {
            total_pages,
            ..Default::default()
        }
    }

    fn slow(mut self, page: u32, signature: &str, delay: Duration) -> Self {
        self.delays.insert((page, signature.to_string()), delay);
        self
    }

    fn calls_for(&self, page: u32) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .count()
    }
}

impl PageSource<String> for FakeSource {
    async fn fetch_page(
        &self,
        request: &FetchRequest,
        _token: &CancellationToken,
    ) -> Result<PageResult<String>, ApiError> {
        let page = request.key.page;
        let signature = request.key.filters.clone();
        self.calls.lock().unwrap().push((page, signature.clone()));
        let delay = self
            .delays
            .get(&(page, signature.clone()))
            .copied()
            .unwrap_or(Duration::from_millis(100));
        tokio::time::sleep(delay).await;
        Ok(PageResult {
            items: vec![format!("{signature}#{page}")],
            page,
            total_pages: self.total_pages,
            total_items: u64::from(self.total_pages) * 24,
        })
    }
}

fn uid() -> EntityId {
    EntityId::parse("u12345").unwrap()
}

type Driver = BrowseDriver<String, FakeSource>;

fn driver(source: FakeSource) -> (Driver, mpsc::Receiver<BrowseEvent<String>>) {
    let (tx, rx) = mpsc::channel(32);
    let browser = PageBrowser::new(uid(), Tab::Novels, BrowseFilters::default(), 8);
    (BrowseDriver::new(browser, source, tx), rx)
}

/// Apply events until one becomes the visible page (or fails).
async fn until_displayed(
    driver: &mut Driver,
    rx: &mut mpsc::Receiver<BrowseEvent<String>>,
) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Some(event) = rx.recv().await {
        let outcome = driver.handle_event(event);
        outcomes.push(outcome);
        if matches!(outcome, Outcome::Displayed | Outcome::Failed) {
            break;
        }
    }
    outcomes
}

async fn until_prefetched(driver: &mut Driver, rx: &mut mpsc::Receiver<BrowseEvent<String>>) {
    while let Some(event) = rx.recv().await {
        if driver.handle_event(event) == Outcome::Prefetched {
            return;
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_next_page_served_from_prefetch() {
    let source = FakeSource::new(5);
    let (mut driver, mut rx) = driver(source.clone());

    driver.request_page(1);
    until_displayed(&mut driver, &mut rx).await;
    until_prefetched(&mut driver, &mut rx).await;
    assert!(driver.browser().is_prefetched(2));

    driver.request_page(2);
    // Shown immediately, with no new request for page 2.
    assert_eq!(driver.browser().state(), &LoadState::Loaded);
    assert_eq!(driver.browser().items(), ["#2".to_string()]);
    assert_eq!(source.calls_for(2), 1);
    assert!(driver.browser().is_interactive());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_request_is_deduplicated() {
    let source = FakeSource::new(5);
    let (mut driver, mut rx) = driver(source.clone());

    driver.request_page(3);
    driver.request_page(3);
    assert!(!driver.browser().is_interactive());
    until_displayed(&mut driver, &mut rx).await;

    driver.request_page(3);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls_for(3), 1);
}

#[tokio::test(start_paused = true)]
async fn test_last_requested_page_wins() {
    // Page 2 takes far longer than page 3.
    let source = FakeSource::new(10).slow(2, "", Duration::from_secs(5));
    let (mut driver, mut rx) = driver(source);

    driver.request_page(2);
    driver.request_page(3);
    let outcomes = until_displayed(&mut driver, &mut rx).await;
    assert_eq!(outcomes.last(), Some(&Outcome::Displayed));
    assert_eq!(driver.browser().page(), 3);

    // Let everything else settle; page 2 must never replace page 3.
    tokio::time::sleep(Duration::from_secs(10)).await;
    while let Ok(event) = rx.try_recv() {
        assert_ne!(driver.handle_event(event), Outcome::Displayed);
    }
    assert_eq!(driver.browser().items(), ["#3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_filter_change_beats_slow_unfiltered_page() {
    let japanese = BrowseFilters {
        japanese_only: true,
        ..Default::default()
    };
    let signature = japanese.signature();
    // Page 2 under the Japanese-only filter is slow; page 1 unfiltered is fast.
    let source = FakeSource::new(4).slow(2, &signature, Duration::from_secs(5));
    let (mut driver, mut rx) = driver(source);

    driver.set_filters_at(japanese, 2);
    driver.set_filters(BrowseFilters::default());
    until_displayed(&mut driver, &mut rx).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    while let Ok(event) = rx.try_recv() {
        driver.handle_event(event);
    }
    assert_eq!(driver.browser().page(), 1);
    assert_eq!(driver.browser().items(), ["#1".to_string()]);
    assert!(driver.browser().filters().is_default());
}

#[tokio::test(start_paused = true)]
async fn test_hover_prefetch_then_click() {
    let source = FakeSource::new(9);
    let (mut driver, mut rx) = driver(source.clone());

    driver.request_page(1);
    until_displayed(&mut driver, &mut rx).await;
    driver.hover_page(7);
    // Page 2 (automatic) and page 7 (hover) both land in the cache.
    until_prefetched(&mut driver, &mut rx).await;
    until_prefetched(&mut driver, &mut rx).await;

    driver.request_page(7);
    assert_eq!(driver.browser().page(), 7);
    assert_eq!(driver.browser().state(), &LoadState::Loaded);
    assert_eq!(source.calls_for(7), 1);
}

// ============================================================================
// URL-synced page
// ============================================================================

fn page_for(
    query: &str,
    source: FakeSource,
) -> (
    BrowsePage<String, FakeSource>,
    mpsc::Receiver<BrowseEvent<String>>,
) {
    let sync = UrlSync::from_query(query);
    let (tx, rx) = mpsc::channel(32);
    let state = sync.state().clone();
    let browser = PageBrowser::new(uid(), Tab::Novels, state.filters, 8);
    (BrowsePage::open(sync, BrowseDriver::new(browser, source, tx)), rx)
}

async fn page_until_displayed(
    page: &mut BrowsePage<String, FakeSource>,
    rx: &mut mpsc::Receiver<BrowseEvent<String>>,
) {
    while let Some(event) = rx.recv().await {
        if page.handle_event(event) == Outcome::Displayed {
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_resets_url_and_refetches() {
    let source = FakeSource::new(6);
    let (mut page, mut rx) = page_for("uid=u12345&username=yuki&tab=novels", source.clone());
    page_until_displayed(&mut page, &mut rx).await;

    let drama = BrowseFilters::default().with_tag(TagRef::new(5, "Drama"), FilterMode::Include);
    let update = page.set_filters(drama).unwrap();
    assert_eq!(update.mode, HistoryMode::Replace);
    assert!(update.query.contains("includeTags=5%3ADrama"));
    page_until_displayed(&mut page, &mut rx).await;

    let update = page.clear_filters().unwrap();
    assert_eq!(update.query, "uid=u12345&username=yuki");
    assert_eq!(update.mode, HistoryMode::Replace);
    assert_eq!(page.query(), "uid=u12345&username=yuki");
    page_until_displayed(&mut page, &mut rx).await;

    let browser = page.driver().browser();
    assert_eq!(browser.page(), 1);
    assert!(browser.filters().is_default());
    assert_eq!(browser.items(), ["#1".to_string()]);
    // Unfiltered page 1 was fetched twice: on open and after clearing.
    let unfiltered: Vec<_> = source
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(p, s)| *p == 1 && s.is_empty())
        .cloned()
        .collect();
    assert_eq!(unfiltered.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_from_deep_link() {
    let source = FakeSource::new(6);
    let (mut page, mut rx) = page_for(
        "uid=u12345&tab=novels&page=3&japanese_only=true",
        source.clone(),
    );
    page_until_displayed(&mut page, &mut rx).await;

    assert_eq!(page.driver().browser().page(), 3);
    assert!(page.driver().browser().filters().japanese_only);
    assert_eq!(page.state().page, 3);
}

#[tokio::test(start_paused = true)]
async fn test_back_navigation_turns_page() {
    let source = FakeSource::new(6);
    let (mut page, mut rx) = page_for("uid=u12345&tab=novels", source);
    page_until_displayed(&mut page, &mut rx).await;

    let update = page.go_to_page(4).unwrap();
    assert_eq!(update.query, "uid=u12345&tab=novels&page=4");
    page_until_displayed(&mut page, &mut rx).await;

    // Browser back to page 1.
    let change = page.navigate("uid=u12345&tab=novels");
    assert_eq!(change, NavChange::PageChange(1));
    page_until_displayed(&mut page, &mut rx).await;
    assert_eq!(page.driver().browser().page(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tab_switch_resets_list() {
    let source = FakeSource::new(6);
    let (mut page, mut rx) = page_for("uid=u12345&tab=novels&page=2", source);
    page_until_displayed(&mut page, &mut rx).await;

    let change = page.navigate("uid=u12345&tab=tags");
    assert_eq!(change, NavChange::TabSwitch(Tab::Tags));
    assert_eq!(page.driver().browser().state(), &LoadState::Idle);
    assert!(page.driver().browser().items().is_empty());
}
