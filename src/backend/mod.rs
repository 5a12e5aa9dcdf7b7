//! Backend seam - the content and interaction provider the feed talks to.
//!
//! The backend is a black box. Everything the feed needs from it goes through
//! two async traits:
//!
//! - [`ContentBackend`]: one page of raw items per call, plus the per-kind
//!   like/save endpoints.
//! - [`CounterSource`]: unread notification/message counters for the poller.
//!
//! `HttpBackend` (feature `http`) implements both against the platform's REST
//! API; tests implement them with in-memory stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{ContentKey, InteractionPatch};
use crate::error::{DecodeError, FeedError};
use crate::query::{Cursor, QueryKey};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpBackend;

/// Undecoded page as returned by the content endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub next: Option<Cursor>,
    pub total: Option<u64>,
}

impl RawPage {
    pub fn new(items: Vec<Value>, next: Option<Cursor>) -> Self {
        Self {
            items,
            next,
            total: None,
        }
    }

    /// Read a page body.
    ///
    /// Accepts `{ "items": [...], "nextCursor": .., "total": .. }` (with the
    /// `results`/`data`, `next` and `count` spellings) or a bare array, which
    /// is treated as the last page.
    pub fn from_json(body: &Value) -> Result<Self, DecodeError> {
        match body {
            Value::Array(items) => Ok(RawPage::new(items.clone(), None)),
            Value::Object(obj) => {
                let items = ["items", "results", "data"]
                    .iter()
                    .find_map(|name| obj.get(*name))
                    .ok_or(DecodeError::MissingField("items"))?
                    .as_array()
                    .ok_or_else(|| DecodeError::invalid("items", "expected an array"))?
                    .clone();

                let next = match ["nextCursor", "next_cursor", "next"]
                    .iter()
                    .find_map(|name| obj.get(*name))
                {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) if s.is_empty() => None,
                    Some(Value::String(s)) => Some(Cursor::new(s.clone())),
                    Some(Value::Number(n)) => Some(Cursor::new(n.to_string())),
                    Some(_) => {
                        return Err(DecodeError::invalid(
                            "nextCursor",
                            "expected a string, number or null",
                        ))
                    }
                };

                let total = ["total", "count"]
                    .iter()
                    .find_map(|name| obj.get(*name))
                    .and_then(Value::as_u64);

                Ok(RawPage { items, next, total })
            }
            _ => Err(DecodeError::NotAnObject("page body")),
        }
    }
}

/// Authoritative interaction values returned by a like/save endpoint.
///
/// Every field is optional; the server may only report what it changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionCounters {
    #[serde(default, alias = "likesCount")]
    pub likes: Option<u32>,
    #[serde(default)]
    pub is_liked: Option<bool>,
    #[serde(default)]
    pub is_saved: Option<bool>,
}

impl InteractionCounters {
    pub fn into_patch(self) -> InteractionPatch {
        InteractionPatch {
            likes: self.likes,
            is_liked: self.is_liked,
            is_saved: self.is_saved,
        }
    }
}

/// Unread counters shown in the navigation chrome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub notifications: u32,
    pub messages: u32,
}

/// Paginated content plus per-kind interaction endpoints.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Fetch one page for `key`, starting at `cursor` (`None` = first page).
    async fn fetch_page(
        &self,
        key: &QueryKey,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<RawPage, FeedError>;

    /// Like (`true`) or unlike (`false`) one item.
    async fn set_liked(
        &self,
        key: &ContentKey,
        liked: bool,
    ) -> Result<InteractionCounters, FeedError>;

    /// Save (`true`) or unsave (`false`) one item.
    async fn set_saved(
        &self,
        key: &ContentKey,
        saved: bool,
    ) -> Result<InteractionCounters, FeedError>;
}

/// Source of unread counters for the poller.
#[async_trait]
pub trait CounterSource: Send + Sync {
    async fn unread_counts(&self) -> Result<UnreadCounts, FeedError>;
}
