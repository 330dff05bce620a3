//! Filter state shared by the URL layer, the page cache and the API client.
//!
//! The URL rendering carries tag and trait names for readability; the filter
//! signature that keys the prefetch cache is built from the API parameters
//! instead, so two filter sets that send the same request share cache
//! entries regardless of how a name was spelled.
use url::form_urlencoded;

/// Highest spoiler level the backend understands (0 = none, 2 = major).
pub const MAX_SPOILER_LEVEL: u8 = 2;

/// A tag or trait reference as it appears in the URL (`id:name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagRef {
    pub id: u32,
    pub name: String,
}

impl TagRef {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// Active browse/list filters. `Default` is the unfiltered state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BrowseFilters {
    pub include_tags: Vec<TagRef>,
    pub exclude_tags: Vec<TagRef>,
    pub include_traits: Vec<TagRef>,
    pub exclude_traits: Vec<TagRef>,
    /// Minimum VNDB rating on the 10..=100 scale.
    pub min_rating: Option<u16>,
    /// Length category bounds (1 = very short .. 5 = very long).
    pub min_length: Option<u8>,
    pub max_length: Option<u8>,
    pub japanese_only: bool,
    pub spoiler_level: u8,
}

impl BrowseFilters {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Add a tag filter, replacing any existing entry for the same id.
    pub fn with_tag(mut self, tag: TagRef, mode: FilterMode) -> Self {
        self.include_tags.retain(|t| t.id != tag.id);
        self.exclude_tags.retain(|t| t.id != tag.id);
        match mode {
            FilterMode::Include => self.include_tags.push(tag),
            FilterMode::Exclude => self.exclude_tags.push(tag),
        }
        self
    }

    /// Add a trait filter, replacing any existing entry for the same id.
    pub fn with_trait(mut self, tr: TagRef, mode: FilterMode) -> Self {
        self.include_traits.retain(|t| t.id != tr.id);
        self.exclude_traits.retain(|t| t.id != tr.id);
        match mode {
            FilterMode::Include => self.include_traits.push(tr),
            FilterMode::Exclude => self.exclude_traits.push(tr),
        }
        self
    }

    /// URL parameters for this filter set, omitting everything at its
    /// default value. Order is fixed.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let lists = [
            ("includeTags", &self.include_tags),
            ("excludeTags", &self.exclude_tags),
            ("includeTraits", &self.include_traits),
            ("excludeTraits", &self.exclude_traits),
        ];
        for (key, list) in lists {
            if !list.is_empty() {
                pairs.push((key, encode_tag_list(list)));
            }
        }
        if let Some(v) = self.min_rating {
            pairs.push(("min_rating", v.to_string()));
        }
        if let Some(v) = self.min_length {
            pairs.push(("min_length", v.to_string()));
        }
        if let Some(v) = self.max_length {
            pairs.push(("max_length", v.to_string()));
        }
        if self.japanese_only {
            pairs.push(("japanese_only", "true".to_string()));
        }
        if self.spoiler_level > 0 {
            pairs.push(("spoiler_level", self.spoiler_level.to_string()));
        }
        pairs
    }

    /// Apply one URL parameter. Unknown keys and malformed values are ignored
    /// so a hand-edited URL degrades to the defaults instead of failing.
    pub(crate) fn apply_query_pair(&mut self, key: &str, value: &str) {
        match key {
            "includeTags" => self.include_tags = decode_tag_list(value),
            "excludeTags" => self.exclude_tags = decode_tag_list(value),
            "includeTraits" => self.include_traits = decode_tag_list(value),
            "excludeTraits" => self.exclude_traits = decode_tag_list(value),
            "min_rating" => {
                self.min_rating = value.parse().ok().filter(|v| (10..=100).contains(v));
            }
            "min_length" => self.min_length = parse_length(value),
            "max_length" => self.max_length = parse_length(value),
            "japanese_only" => self.japanese_only = matches!(value, "true" | "1"),
            "spoiler_level" => {
                self.spoiler_level = value
                    .parse()
                    .ok()
                    .filter(|v| *v <= MAX_SPOILER_LEVEL)
                    .unwrap_or(0);
            }
            _ => {}
        }
    }

    /// Canonical text identifying this filter set (empty when unfiltered).
    pub fn signature(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in self.to_api_params() {
            if k == "spoiler_level" && v == "0" {
                continue;
            }
            ser.append_pair(k, &v);
        }
        ser.finish()
    }

    /// Query parameters understood by the stats API: bare id lists instead
    /// of the display-friendly `id:name` pairs.
    pub fn to_api_params(&self) -> Vec<(&'static str, String)> {
        let ids = |list: &[TagRef]| {
            list.iter()
                .map(|t| t.id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut params = Vec::new();
        let lists = [
            ("tags", &self.include_tags),
            ("exclude_tags", &self.exclude_tags),
            ("traits", &self.include_traits),
            ("exclude_traits", &self.exclude_traits),
        ];
        for (key, list) in lists {
            if !list.is_empty() {
                params.push((key, ids(list)));
            }
        }
        if let Some(v) = self.min_rating {
            params.push(("min_rating", v.to_string()));
        }
        if let Some(v) = self.min_length {
            params.push(("min_length", v.to_string()));
        }
        if let Some(v) = self.max_length {
            params.push(("max_length", v.to_string()));
        }
        if self.japanese_only {
            params.push(("japanese_only", "true".to_string()));
        }
        params.push(("spoiler_level", self.spoiler_level.to_string()));
        params
    }
}

fn parse_length(value: &str) -> Option<u8> {
    value.parse().ok().filter(|v| (1..=5).contains(v))
}

fn encode_tag_list(list: &[TagRef]) -> String {
    list.iter()
        .map(|t| {
            let name: String = form_urlencoded::byte_serialize(t.name.as_bytes()).collect();
            format!("{}:{}", t.id, name)
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_tag_list(value: &str) -> Vec<TagRef> {
    value
        .split(',')
        .filter_map(|entry| {
            let (id, name) = entry.split_once(':').unwrap_or((entry, ""));
            let id: u32 = id.trim().parse().ok()?;
            Some(TagRef {
                id,
                name: decode_component(name),
            })
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}
