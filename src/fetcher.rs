//! PageFetcher - one network round trip for one page of a query.
//!
//! The fetcher turns a [`RawPage`] into a [`Page`] of envelopes. It never
//! touches the cache; callers decide where the page goes. Items that fail to
//! normalize are dropped with a warning instead of failing the whole page.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::{ContentBackend, RawPage};
use crate::config::FeedConfig;
use crate::envelope::ContentEnvelope;
use crate::error::FeedError;
use crate::query::{Cursor, Page, QueryKey};

pub struct PageFetcher<B: ?Sized> {
    backend: Arc<B>,
    page_size: usize,
    timeout: Duration,
}

impl<B: ContentBackend + ?Sized> PageFetcher<B> {
    pub fn new(backend: Arc<B>, page_size: usize, timeout: Duration) -> Self {
        Self {
            backend,
            page_size,
            timeout,
        }
    }

    pub fn from_config(backend: Arc<B>, config: &FeedConfig) -> Self {
        Self::new(backend, config.page_size, config.fetch_timeout)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch the page of `key` starting at `cursor` (`None` = first page).
    ///
    /// A request that outlives the configured timeout fails as
    /// [`FeedError::Network`].
    pub async fn fetch(&self, key: &QueryKey, cursor: Option<&Cursor>) -> Result<Page, FeedError> {
        debug!(query = %key, cursor = ?cursor, "fetching page");
        let raw = timeout(
            self.timeout,
            self.backend.fetch_page(key, cursor, self.page_size),
        )
        .await
        .map_err(|_| FeedError::timeout("page fetch", self.timeout))??;
        Ok(decode_page(key, raw))
    }
}

/// Normalize every raw item, dropping (and logging) the ones that do not fit.
pub fn decode_page(key: &QueryKey, raw: RawPage) -> Page {
    let mut items = Vec::with_capacity(raw.items.len());
    let mut dropped = 0;

    for (index, value) in raw.items.iter().enumerate() {
        match ContentEnvelope::from_json(value) {
            Ok(envelope) => items.push(envelope),
            Err(err) => {
                dropped += 1;
                warn!(query = %key, index, error = %err, "dropping undecodable feed item");
            }
        }
    }

    Page {
        items,
        next: raw.next,
        total: raw.total,
        dropped,
    }
}
