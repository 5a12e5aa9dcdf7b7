//! Query identity, cursors and pages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{ContentEnvelope, ContentKind};

/// Which content kinds a feed query asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFilter {
    #[default]
    All,
    Quote,
    Review,
    Post,
}

impl ContentFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFilter::All => "all",
            ContentFilter::Quote => "quote",
            ContentFilter::Review => "review",
            ContentFilter::Post => "post",
        }
    }
}

impl From<ContentKind> for ContentFilter {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Quote => ContentFilter::Quote,
            ContentKind::Review => ContentFilter::Review,
            ContentKind::Post => ContentFilter::Post,
        }
    }
}

/// Ordering requested from the backend. The client never re-sorts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Recent,
    Trending,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Recent => "recent",
            SortMode::Trending => "trending",
        }
    }
}

/// One filter/sort/search combination. Owns its own page sequence in the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    filter: ContentFilter,
    sort: SortMode,
    search: String,
}

impl QueryKey {
    /// Search text is trimmed, so `" dune "` and `"dune"` share a key.
    pub fn new(filter: ContentFilter, sort: SortMode, search: impl AsRef<str>) -> Self {
        Self {
            filter,
            sort,
            search: search.as_ref().trim().to_string(),
        }
    }

    pub fn filter(&self) -> ContentFilter {
        self.filter
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn with_filter(&self, filter: ContentFilter) -> Self {
        Self::new(filter, self.sort, &self.search)
    }

    pub fn with_sort(&self, sort: SortMode) -> Self {
        Self::new(self.filter, sort, &self.search)
    }

    pub fn with_search(&self, search: impl AsRef<str>) -> Self {
        Self::new(self.filter, self.sort, search)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{:?}",
            self.filter.as_str(),
            self.sort.as_str(),
            self.search
        )
    }
}

/// Opaque continuation token handed out by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the next page of a sequence starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Continuation {
    /// Nothing requested yet; the next request carries no cursor.
    #[default]
    Start,
    /// Resume from this cursor.
    At(Cursor),
    /// The backend reported no further pages.
    End,
}

impl Continuation {
    /// Continuation after a page whose next cursor is `next`.
    pub fn after(next: Option<Cursor>) -> Self {
        match next {
            Some(cursor) => Continuation::At(cursor),
            None => Continuation::End,
        }
    }

    /// Cursor to send with the next request. `None` for `Start` and `End`.
    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Continuation::At(cursor) => Some(cursor),
            Continuation::Start | Continuation::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Continuation::End)
    }
}

/// An ordered run of envelopes plus where to continue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<ContentEnvelope>,
    /// `None` means no more pages.
    pub next: Option<Cursor>,
    pub total: Option<u64>,
    /// Raw items dropped because they could not be normalized.
    pub dropped: usize,
}

impl Page {
    pub fn new(items: Vec<ContentEnvelope>, next: Option<Cursor>) -> Self {
        Self {
            items,
            next,
            total: None,
            dropped: 0,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Fetch status of one QueryKey.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchState::Idle => "idle",
            FetchState::Loading => "loading",
            FetchState::Success => "success",
            FetchState::Error => "error",
        };
        f.write_str(label)
    }
}
