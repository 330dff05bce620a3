use super::browser::Outcome;
use super::driver::{BrowseDriver, BrowseEvent, PageSource};
use crate::filters::BrowseFilters;
use crate::url_state::{NavChange, UrlSync, UrlUpdate, ViewState};

/// A paginated list tab wired to the URL.
///
/// User actions update the URL first and then the page cache; history
/// navigation goes the other way, classifying the URL delta to decide
/// whether the list resets, refilters or just turns the page.
pub struct BrowsePage<T, S> {
    sync: UrlSync,
    driver: BrowseDriver<T, S>,
}

impl<T, S> BrowsePage<T, S>
where
    T: Clone + Send + 'static,
    S: PageSource<T>,
{
    /// Build the page from the URL it was opened with and start loading.
    pub fn open(sync: UrlSync, mut driver: BrowseDriver<T, S>) -> Self {
        let state = sync.state().clone();
        driver.set_filters_at(state.filters, state.page);
        Self { sync, driver }
    }

    pub fn state(&self) -> &ViewState {
        self.sync.state()
    }

    pub fn query(&self) -> &str {
        self.sync.query()
    }

    pub fn driver(&self) -> &BrowseDriver<T, S> {
        &self.driver
    }

    /// URL state for this list, restoring the tab if "clear all" dropped it.
    fn list_state(&self) -> ViewState {
        self.sync.state().clone().with_tab(self.driver.browser().tab())
    }

    pub fn go_to_page(&mut self, page: u32) -> Option<UrlUpdate> {
        let update = self.sync.apply(self.list_state().with_page(page));
        self.driver.request_page(self.sync.state().page);
        update
    }

    pub fn hover_page(&mut self, page: u32) {
        self.driver.hover_page(page);
    }

    pub fn set_filters(&mut self, filters: BrowseFilters) -> Option<UrlUpdate> {
        let update = self.sync.apply(self.list_state().with_filters(filters.clone()));
        self.driver.set_filters(filters);
        update
    }

    /// "Clear all": the URL keeps only the user, and the list reloads its
    /// unfiltered first page.
    pub fn clear_filters(&mut self) -> Option<UrlUpdate> {
        let update = self.sync.clear_all();
        self.driver.set_filters(BrowseFilters::default());
        update
    }

    pub fn retry(&mut self) {
        self.driver.retry();
    }

    /// React to back/forward navigation.
    pub fn navigate(&mut self, query: &str) -> NavChange {
        let change = self.sync.on_navigation(query);
        let state = self.sync.state().clone();
        match &change {
            NavChange::Unchanged => {}
            NavChange::PageChange(page) => self.driver.request_page(*page),
            NavChange::FiltersChanged => self.driver.set_filters_at(state.filters, state.page),
            NavChange::TabSwitch(tab) => {
                self.driver.reset();
                if *tab == self.driver.browser().tab() {
                    self.driver.set_filters_at(state.filters, state.page);
                }
            }
            NavChange::EntityChanged => self.driver.reset(),
        }
        change
    }

    pub fn handle_event(&mut self, event: BrowseEvent<T>) -> Outcome {
        self.driver.handle_event(event)
    }
}
