//! Paginated list loading with a per-tab prefetch cache.
//!
//! - [`PageBrowser`]: pure state machine (current page, prefetch map,
//!   supersession checks). No I/O.
//! - [`BrowseDriver`]: spawns the browser's fetches on tokio and feeds the
//!   results back.
//! - [`BrowsePage`]: keeps a driver and the URL query string in step.

mod browser;
mod driver;
mod page;

pub use browser::{
    Applied, FetchPurpose, FetchRequest, LoadState, Outcome, PageBrowser, QueryKey,
    DEFAULT_PREFETCH_CAPACITY,
};
pub use driver::{BrowseDriver, BrowseEvent, CatalogSource, NovelListSource, PageSource};
pub use page::BrowsePage;
