//! Two-way mapping between view state (tab, page, filters) and the URL query
//! string.
//!
//! Serialization omits every parameter at its default so URLs stay short,
//! and parsing falls back to the defaults for anything it does not
//! understand.
use std::fmt;
use url::form_urlencoded;

use crate::entity::{EntityId, EntityKind};
use crate::filters::BrowseFilters;

/// Tabs on a user's stats page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tab {
    #[default]
    Summary,
    Novels,
    Tags,
    Traits,
    Characters,
    Recommendations,
}

impl Tab {
    pub const ALL: [Tab; 6] = [
        Tab::Summary,
        Tab::Novels,
        Tab::Tags,
        Tab::Traits,
        Tab::Characters,
        Tab::Recommendations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tab::Summary => "summary",
            Tab::Novels => "novels",
            Tab::Tags => "tags",
            Tab::Traits => "traits",
            Tab::Characters => "characters",
            Tab::Recommendations => "recommendations",
        }
    }

    /// Unknown ids map to the summary tab.
    pub fn parse(raw: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .unwrap_or_default()
    }

    /// Whether this tab shows a paginated list.
    pub fn is_paginated(self) -> bool {
        matches!(self, Tab::Novels | Tab::Characters)
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the URL encodes for a stats page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub uid: Option<EntityId>,
    pub username: Option<String>,
    pub tab: Tab,
    pub page: u32,
    pub filters: BrowseFilters,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            uid: None,
            username: None,
            tab: Tab::Summary,
            page: 1,
            filters: BrowseFilters::default(),
        }
    }
}

impl ViewState {
    pub fn for_user(uid: EntityId, username: impl Into<String>) -> Self {
        Self {
            uid: Some(uid),
            username: Some(username.into()),
            ..Default::default()
        }
    }

    /// Switch tab. Page-scoped state resets; filters carry over.
    pub fn with_tab(mut self, tab: Tab) -> Self {
        if tab != self.tab {
            self.tab = tab;
            self.page = 1;
        }
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Replace the filters. Any filter change returns to page 1.
    pub fn with_filters(mut self, filters: BrowseFilters) -> Self {
        if filters != self.filters {
            self.filters = filters;
            self.page = 1;
        }
        self
    }

    /// "Clear all": back to the bare stats page for the same user.
    pub fn clear_filters(self) -> Self {
        Self {
            uid: self.uid,
            username: self.username,
            ..Default::default()
        }
    }

    pub fn to_query(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        if let Some(uid) = &self.uid {
            ser.append_pair("uid", uid.as_str());
        }
        if let Some(name) = self.username.as_deref().filter(|n| !n.is_empty()) {
            ser.append_pair("username", name);
        }
        if self.tab != Tab::Summary {
            ser.append_pair("tab", self.tab.as_str());
        }
        if self.page > 1 {
            ser.append_pair("page", &self.page.to_string());
        }
        for (key, value) in self.filters.to_query_pairs() {
            ser.append_pair(key, &value);
        }
        ser.finish()
    }

    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut state = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                "uid" => {
                    state.uid = EntityId::parse(&value)
                        .ok()
                        .filter(|id| id.kind() == EntityKind::User);
                }
                "username" => {
                    state.username = Some(value.into_owned()).filter(|n| !n.is_empty());
                }
                "tab" => state.tab = Tab::parse(&value),
                "page" => state.page = parse_page(&value),
                other => state.filters.apply_query_pair(other, &value),
            }
        }
        state
    }
}

fn parse_page(raw: &str) -> u32 {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|p| *p >= 1)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(1)
}

/// How the browser history should record a URL change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// A new destination (tab change): back button returns here.
    Push,
    /// Minor tweak (page, filter): rewrite the current entry.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlUpdate {
    pub query: String,
    pub mode: HistoryMode,
}

/// What an externally driven URL change (back/forward) means for the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavChange {
    Unchanged,
    /// Different user: everything resets.
    EntityChanged,
    /// Different tab: page-scoped state and the tab's prefetch cache reset.
    TabSwitch(Tab),
    /// Same tab, different filters.
    FiltersChanged,
    /// Same tab and filters, different page.
    PageChange(u32),
}

/// Keeps the view state and the visible URL consistent.
#[derive(Debug, Clone)]
pub struct UrlSync {
    state: ViewState,
    query: String,
}

impl UrlSync {
    pub fn new(state: ViewState) -> Self {
        let query = state.to_query();
        Self { state, query }
    }

    pub fn from_query(query: &str) -> Self {
        Self::new(ViewState::from_query(query))
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Current canonical query string (without the leading `?`).
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Record a user-driven state change. Returns the URL update to perform,
    /// or `None` if the URL would not change.
    pub fn apply(&mut self, next: ViewState) -> Option<UrlUpdate> {
        let query = next.to_query();
        if query == self.query {
            self.state = next;
            return None;
        }
        let mode = if next.tab != self.state.tab {
            HistoryMode::Push
        } else {
            HistoryMode::Replace
        };
        tracing::debug!(query = %query, ?mode, "URL state updated");
        self.state = next;
        self.query = query.clone();
        Some(UrlUpdate { query, mode })
    }

    /// Drop every filter, tab and page parameter. The current history entry
    /// is rewritten rather than pushed, like any other filter tweak.
    pub fn clear_all(&mut self) -> Option<UrlUpdate> {
        let next = self.state.clone().clear_filters();
        self.apply(next).map(|update| UrlUpdate {
            mode: HistoryMode::Replace,
            ..update
        })
    }

    /// Absorb a URL change the user made through history navigation.
    pub fn on_navigation(&mut self, query: &str) -> NavChange {
        let next = ViewState::from_query(query);
        let change = if next.uid != self.state.uid || next.username != self.state.username {
            NavChange::EntityChanged
        } else if next.tab != self.state.tab {
            NavChange::TabSwitch(next.tab)
        } else if next.filters != self.state.filters {
            NavChange::FiltersChanged
        } else if next.page != self.state.page {
            NavChange::PageChange(next.page)
        } else {
            NavChange::Unchanged
        };
        self.query = next.to_query();
        self.state = next;
        change
    }
}
