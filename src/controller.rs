//! FeedController - forward-only pagination for one feed view.
//!
//! ```text
//!            sentinel visible            page landed
//!   ┌──────┐ ───────────────▶ ┌─────────┐ ──────────▶ ┌─────────┐
//!   │ Idle │                  │ Loading │             │ Success │ ─┐
//!   └──────┘ ◀─────────────── └─────────┘             └─────────┘  │
//!      ▲      cancelled            │ fetch failed       settled     │
//!      └───────────────────────────┼────────────────────────────────┘
//!                                  ▼
//!                              ┌───────┐  retry()
//!                              │ Error │ ─────────▶ Loading (same cursor)
//!                              └───────┘
//! ```
//!
//! Sentinel signals are honoured only in `Idle`, which gives at most one
//! fetch in flight per query. Every fetch carries a ticket for the sequence
//! it was started for; if the view changed its query or unmounted meanwhile,
//! the response is discarded instead of appended.
//!
//! Views showing the same query share its pages. A view leaving a query
//! (`set_query`, `unmount` or drop) only clears the pages when no other view
//! still shows it.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::ContentBackend;
use crate::bus::{BusMessage, MessageBus};
use crate::cache::{BeginFetch, FeedSnapshot, FetchTicket, InteractionCache};
use crate::error::FeedError;
use crate::fetcher::PageFetcher;
use crate::query::QueryKey;

/// Why a sentinel signal or retry did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A fetch is already in flight.
    Busy,
    /// The backend reported the last page.
    Exhausted,
    /// The last fetch failed and waits for an explicit retry.
    Failed,
    /// `retry` was called while nothing had failed.
    NothingToRetry,
    /// The view unmounted.
    Unmounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelOutcome {
    /// A page landed in the cache.
    Appended { items: usize, exhausted: bool },
    /// No request was issued.
    Ignored(IgnoreReason),
    /// A response arrived for a query that is no longer active.
    Discarded,
}

/// Pagination driver for one view. Views share one cache.
pub struct FeedController<B: ?Sized> {
    fetcher: Arc<PageFetcher<B>>,
    cache: Arc<InteractionCache>,
    bus: MessageBus,
    active: Mutex<Option<QueryKey>>,
}

impl<B: ContentBackend + ?Sized> FeedController<B> {
    pub fn new(
        fetcher: Arc<PageFetcher<B>>,
        cache: Arc<InteractionCache>,
        bus: MessageBus,
        key: QueryKey,
    ) -> Self {
        cache.attach(&key);
        Self {
            fetcher,
            cache,
            bus,
            active: Mutex::new(Some(key)),
        }
    }

    /// The query this view is showing; `None` after unmount.
    pub fn active_query(&self) -> Result<Option<QueryKey>, FeedError> {
        Ok(self
            .active
            .lock()
            .map_err(|_| FeedError::LockPoisoned("active query"))?
            .clone())
    }

    /// Cache contents and fetch state for the active query.
    pub fn snapshot(&self) -> Result<FeedSnapshot, FeedError> {
        match self.active_query()? {
            Some(key) => self.cache.snapshot(&key),
            None => Ok(FeedSnapshot {
                items: Vec::new(),
                state: Default::default(),
                error: None,
                has_more: false,
                total: None,
            }),
        }
    }

    /// The last rendered item entered the viewport.
    ///
    /// Starts a fetch only when the sequence is idle and not exhausted. A
    /// failed fetch leaves the sequence in `Error` and returns the error.
    pub async fn on_sentinel_visible(&self) -> Result<SentinelOutcome, FeedError> {
        let Some(key) = self.active_query()? else {
            return Ok(SentinelOutcome::Ignored(IgnoreReason::Unmounted));
        };

        match self.cache.begin_fetch(&key)? {
            BeginFetch::Started(ticket) => self.run(ticket).await,
            BeginFetch::Busy => Ok(SentinelOutcome::Ignored(IgnoreReason::Busy)),
            BeginFetch::Exhausted => Ok(SentinelOutcome::Ignored(IgnoreReason::Exhausted)),
            BeginFetch::Failed => Ok(SentinelOutcome::Ignored(IgnoreReason::Failed)),
        }
    }

    /// Re-issue the failed request with the same cursor.
    pub async fn retry(&self) -> Result<SentinelOutcome, FeedError> {
        let Some(key) = self.active_query()? else {
            return Ok(SentinelOutcome::Ignored(IgnoreReason::Unmounted));
        };

        match self.cache.retry_fetch(&key)? {
            Some(ticket) => {
                info!(query = %key, cursor = ?ticket.cursor, "retrying page fetch");
                self.run(ticket).await
            }
            None => Ok(SentinelOutcome::Ignored(IgnoreReason::NothingToRetry)),
        }
    }

    async fn run(&self, ticket: FetchTicket) -> Result<SentinelOutcome, FeedError> {
        let pending = PendingFetch {
            cache: &self.cache,
            ticket: &ticket,
            armed: true,
        };
        let result = self.fetcher.fetch(&ticket.key, ticket.cursor.as_ref()).await;
        pending.resolve();

        match result {
            Ok(page) => {
                let items = page.items.len();
                let exhausted = page.is_last();
                if !self.cache.complete_fetch(&ticket, page)? {
                    debug!(query = %ticket.key, "discarding response for stale query");
                    return Ok(SentinelOutcome::Discarded);
                }
                self.cache.settle_fetch(&ticket)?;
                if self.active_query()?.as_ref() != Some(&ticket.key) {
                    // kept for the views still showing that query
                    debug!(query = %ticket.key, "view moved on before its page landed");
                    return Ok(SentinelOutcome::Discarded);
                }
                debug!(query = %ticket.key, items, exhausted, "page appended");
                Ok(SentinelOutcome::Appended { items, exhausted })
            }
            Err(err) => {
                if self.cache.fail_fetch(&ticket, err.clone())? {
                    warn!(query = %ticket.key, error = %err, "page fetch failed");
                    if self.active_query()?.as_ref() != Some(&ticket.key) {
                        return Ok(SentinelOutcome::Discarded);
                    }
                    Err(err)
                } else {
                    debug!(query = %ticket.key, error = %err, "discarding failure for stale query");
                    Ok(SentinelOutcome::Discarded)
                }
            }
        }
    }

    /// Switch the view to `key` (filter, sort or search changed).
    ///
    /// The view leaves its previous query; those pages are discarded unless
    /// another view still shows them. If no other view shows `key`, it
    /// starts from its first page in `Idle`, otherwise the view joins the
    /// pages already loaded. Responses still in flight for the previous
    /// query are not reported to this view.
    pub fn set_query(&self, key: QueryKey) -> Result<(), FeedError> {
        let previous = {
            let mut active = self
                .active
                .lock()
                .map_err(|_| FeedError::LockPoisoned("active query"))?;
            if active.as_ref() == Some(&key) {
                return Ok(());
            }
            active.replace(key.clone())
        };

        if let Some(previous) = &previous {
            self.cache.detach(previous)?;
        }
        if self.cache.attach(&key) {
            self.cache.invalidate(&key)?;
        }
        info!(query = %key, "feed query changed");

        if let Some(previous) = previous {
            self.bus.publish(BusMessage::FeedInvalidated {
                previous,
                current: Some(key),
            });
        }
        Ok(())
    }

    /// The view went away: leave its query and ignore anything still in
    /// flight. The pages go once no other view shows the query.
    pub fn unmount(&self) -> Result<(), FeedError> {
        let previous = self
            .active
            .lock()
            .map_err(|_| FeedError::LockPoisoned("active query"))?
            .take();

        if let Some(previous) = previous {
            self.cache.detach(&previous)?;
            debug!(query = %previous, "feed view unmounted");
            self.bus.publish(BusMessage::FeedInvalidated {
                previous,
                current: None,
            });
        }
        Ok(())
    }
}

impl<B: ?Sized> Drop for FeedController<B> {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(key) = active {
            if let Err(err) = self.cache.detach(&key) {
                warn!(query = %key, error = %err, "failed to release dropped view");
            }
        }
    }
}

/// A fetch between `Loading` and its outcome. If the future running it is
/// dropped (or the backend panics) the sequence goes back to `Idle`.
struct PendingFetch<'a> {
    cache: &'a InteractionCache,
    ticket: &'a FetchTicket,
    armed: bool,
}

impl PendingFetch<'_> {
    fn resolve(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.cache.abandon_fetch(self.ticket) {
            Ok(true) => warn!(query = %self.ticket.key, "page fetch abandoned"),
            Ok(false) => {}
            Err(err) => warn!(query = %self.ticket.key, error = %err, "failed to reset abandoned fetch"),
        }
    }
}

impl<B: ContentBackend + ?Sized + 'static> FeedController<B> {
    /// Callback handle for the rendering layer's viewport observer.
    pub fn sentinel(self: &Arc<Self>) -> Sentinel<B> {
        Sentinel {
            controller: Arc::downgrade(self),
        }
    }
}

/// Registered with the viewport observer; fires the controller when the
/// boundary item becomes visible. Holds the controller weakly, so a stale
/// observer does not keep a dropped view alive.
pub struct Sentinel<B: ?Sized> {
    controller: Weak<FeedController<B>>,
}

impl<B: ?Sized> Clone for Sentinel<B> {
    fn clone(&self) -> Self {
        Self {
            controller: Weak::clone(&self.controller),
        }
    }
}

impl<B: ContentBackend + ?Sized + 'static> Sentinel<B> {
    /// Signal visibility. Spawns the fetch on the current tokio runtime;
    /// returns `None` if the controller is gone.
    pub fn visible(&self) -> Option<JoinHandle<Result<SentinelOutcome, FeedError>>> {
        let controller = self.controller.upgrade()?;
        Some(tokio::spawn(async move {
            controller.on_sentinel_visible().await
        }))
    }

    /// Adapt into a plain callback for observers that take closures.
    ///
    /// Nobody awaits the fetch, so its outcome is logged; a fetch task that
    /// panicked shows up as a warning.
    pub fn into_callback(self) -> impl Fn() + Send + Sync + 'static {
        move || {
            if let Some(fetch) = self.visible() {
                tokio::spawn(async move {
                    match fetch.await {
                        Ok(Ok(outcome)) => debug!(?outcome, "sentinel fetch finished"),
                        Ok(Err(err)) => debug!(error = %err, "sentinel fetch failed"),
                        Err(err) => warn!(error = %err, "sentinel fetch task failed"),
                    }
                });
            }
        }
    }
}
