//! InteractionCache - pages of envelopes keyed by query, with fan-out point updates.
//!
//! The cache is the single source of truth for everything the feed has
//! fetched. Each [`QueryKey`] owns an independent sequence: its pages in
//! arrival order, where to continue, and its fetch state.
//!
//! Envelopes are only ever changed through two entry points:
//! - [`InteractionCache::append_page`] adds a page to one sequence.
//! - [`InteractionCache::update_envelope`] patches every cached copy of one
//!   `(kind, id)` across every sequence, so an interaction shows up in the
//!   "all" view and a kind-filtered view at the same time.
//!
//! Fetch-state transitions are crate-internal; only the sequence controller
//! drives them, through [`FetchTicket`]s that go stale when a sequence is
//! invalidated.
//!
//! Views attach to the key they show. Several views may share one key and
//! its pages; the sequence is dropped when the last of them detaches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::envelope::{ContentEnvelope, ContentId, ContentKey, ContentKind, InteractionPatch};
use crate::error::FeedError;
use crate::query::{Continuation, Cursor, FetchState, Page, QueryKey};

/// What the rendering layer reads for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub items: Vec<ContentEnvelope>,
    pub state: FetchState,
    /// Error of the last failed fetch, while the sequence is in `Error`.
    pub error: Option<FeedError>,
    /// Whether another page may exist.
    pub has_more: bool,
    pub total: Option<u64>,
}

/// Proof that a fetch was started for a specific sequence generation and cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    pub key: QueryKey,
    pub cursor: Option<Cursor>,
    generation: u64,
}

/// Result of asking a sequence to start a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BeginFetch {
    Started(FetchTicket),
    /// A fetch is already in flight.
    Busy,
    /// The sequence reached its last page.
    Exhausted,
    /// The last fetch failed; only an explicit retry restarts it.
    Failed,
}

struct Sequence {
    pages: Vec<Page>,
    continuation: Continuation,
    state: FetchState,
    error: Option<FeedError>,
    total: Option<u64>,
    generation: u64,
}

impl Sequence {
    fn new(generation: u64) -> Self {
        Self {
            pages: Vec::new(),
            continuation: Continuation::Start,
            state: FetchState::Idle,
            error: None,
            total: None,
            generation,
        }
    }

    fn append(&mut self, page: Page) {
        self.continuation = Continuation::after(page.next.clone());
        if page.total.is_some() {
            self.total = page.total;
        }
        self.pages.push(page);
    }

    fn items(&self) -> Vec<ContentEnvelope> {
        self.pages
            .iter()
            .flat_map(|page| page.items.iter().cloned())
            .collect()
    }

    fn ticket(&self, key: &QueryKey) -> FetchTicket {
        FetchTicket {
            key: key.clone(),
            cursor: self.continuation.cursor().cloned(),
            generation: self.generation,
        }
    }

    /// The ticket still addresses this sequence and its in-flight request.
    fn accepts(&self, ticket: &FetchTicket) -> bool {
        self.generation == ticket.generation
            && self.state == FetchState::Loading
            && self.continuation.cursor() == ticket.cursor.as_ref()
    }

    /// The ticket's page is the one that just landed.
    fn landed(&self, ticket: &FetchTicket) -> bool {
        self.generation == ticket.generation && self.state == FetchState::Success
    }
}

/// Shared store of fetched pages, keyed by [`QueryKey`].
pub struct InteractionCache {
    sequences: RwLock<HashMap<QueryKey, Sequence>>,
    /// Attached views per key.
    views: Mutex<HashMap<QueryKey, usize>>,
    generations: AtomicU64,
}

impl Default for InteractionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionCache {
    pub fn new() -> Self {
        Self {
            sequences: RwLock::new(HashMap::new()),
            views: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(1),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn read(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<QueryKey, Sequence>>, FeedError> {
        self.sequences
            .read()
            .map_err(|_| FeedError::LockPoisoned(operation))
    }

    fn write(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<QueryKey, Sequence>>, FeedError> {
        self.sequences
            .write()
            .map_err(|_| FeedError::LockPoisoned(operation))
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Append `page` to `key`'s sequence in arrival order and move its
    /// continuation to the page's next cursor. Nothing is re-sorted or deduplicated.
    pub fn append_page(&self, key: &QueryKey, page: Page) -> Result<(), FeedError> {
        let generation = self.next_generation();
        let mut sequences = self.write("append_page")?;
        sequences
            .entry(key.clone())
            .or_insert_with(|| Sequence::new(generation))
            .append(page);
        Ok(())
    }

    /// Patch every cached copy of `(kind, id)` in every sequence.
    ///
    /// Returns how many copies were found. Matching is on the full key, so a
    /// review and a quote sharing an id are never confused.
    pub fn update_envelope(
        &self,
        kind: ContentKind,
        id: &ContentId,
        patch: &InteractionPatch,
    ) -> Result<usize, FeedError> {
        let mut sequences = self.write("update_envelope")?;
        let mut found = 0;
        for sequence in sequences.values_mut() {
            for page in &mut sequence.pages {
                for envelope in page.items.iter_mut().filter(|e| e.is(kind, id)) {
                    envelope.apply(patch);
                    found += 1;
                }
            }
        }
        debug!(%kind, %id, copies = found, "patched envelope");
        Ok(found)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Concatenated envelopes of `key`'s pages, in order.
    pub fn envelopes(&self, key: &QueryKey) -> Result<Vec<ContentEnvelope>, FeedError> {
        let sequences = self.read("envelopes")?;
        Ok(sequences.get(key).map(Sequence::items).unwrap_or_default())
    }

    /// Everything the rendering layer needs for `key`. Unknown keys read as a
    /// fresh, idle, empty sequence.
    pub fn snapshot(&self, key: &QueryKey) -> Result<FeedSnapshot, FeedError> {
        let sequences = self.read("snapshot")?;
        Ok(match sequences.get(key) {
            Some(sequence) => FeedSnapshot {
                items: sequence.items(),
                state: sequence.state,
                error: sequence.error.clone(),
                has_more: !sequence.continuation.is_end(),
                total: sequence.total,
            },
            None => FeedSnapshot {
                items: Vec::new(),
                state: FetchState::Idle,
                error: None,
                has_more: true,
                total: None,
            },
        })
    }

    pub fn fetch_state(&self, key: &QueryKey) -> Result<FetchState, FeedError> {
        let sequences = self.read("fetch_state")?;
        Ok(sequences.get(key).map(|s| s.state).unwrap_or_default())
    }

    pub fn last_error(&self, key: &QueryKey) -> Result<Option<FeedError>, FeedError> {
        let sequences = self.read("last_error")?;
        Ok(sequences.get(key).and_then(|s| s.error.clone()))
    }

    /// Where `key`'s next page starts.
    pub fn continuation(&self, key: &QueryKey) -> Result<Continuation, FeedError> {
        let sequences = self.read("continuation")?;
        Ok(sequences
            .get(key)
            .map(|s| s.continuation.clone())
            .unwrap_or_default())
    }

    /// First cached copy of `key` in any sequence.
    pub fn find(&self, key: &ContentKey) -> Result<Option<ContentEnvelope>, FeedError> {
        let sequences = self.read("find")?;
        Ok(sequences
            .values()
            .flat_map(|s| s.pages.iter())
            .flat_map(|p| p.items.iter())
            .find(|e| e.is(key.kind, &key.id))
            .cloned())
    }

    pub fn contains_query(&self, key: &QueryKey) -> Result<bool, FeedError> {
        Ok(self.read("contains_query")?.contains_key(key))
    }

    pub fn queries(&self) -> Result<Vec<QueryKey>, FeedError> {
        Ok(self.read("queries")?.keys().cloned().collect())
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Discard `key`'s pages and reset it to `Idle` at the first page.
    /// Fetches started before the reset can no longer land.
    pub fn invalidate(&self, key: &QueryKey) -> Result<(), FeedError> {
        let generation = self.next_generation();
        let mut sequences = self.write("invalidate")?;
        sequences.insert(key.clone(), Sequence::new(generation));
        debug!(query = %key, "invalidated");
        Ok(())
    }

    /// Drop `key` entirely (its view went away).
    pub fn remove(&self, key: &QueryKey) -> Result<bool, FeedError> {
        let removed = self.write("remove")?.remove(key).is_some();
        if removed {
            debug!(query = %key, "removed");
        }
        Ok(removed)
    }

    /// Register a view showing `key`. Returns `true` for the first one.
    pub(crate) fn attach(&self, key: &QueryKey) -> bool {
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let count = views.entry(key.clone()).or_insert(0);
        *count += 1;
        debug!(query = %key, views = *count, "view attached");
        *count == 1
    }

    /// Unregister a view of `key`. The last one out removes the sequence;
    /// returns whether it did.
    pub(crate) fn detach(&self, key: &QueryKey) -> Result<bool, FeedError> {
        let last = {
            let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
            match views.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    debug!(query = %key, views = *count, "view detached");
                    false
                }
                Some(_) => {
                    views.remove(key);
                    true
                }
                None => false,
            }
        };
        if last {
            self.remove(key)?;
        }
        Ok(last)
    }

    /// How many views currently show `key`.
    pub fn views(&self, key: &QueryKey) -> usize {
        self.views
            .lock()
            .map(|views| views.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    // ========================================================================
    // Fetch-state transitions (controller only)
    // ========================================================================

    /// Move `key` from `Idle` to `Loading`, creating the sequence if needed.
    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> Result<BeginFetch, FeedError> {
        let generation = self.next_generation();
        let mut sequences = self.write("begin_fetch")?;
        let sequence = sequences
            .entry(key.clone())
            .or_insert_with(|| Sequence::new(generation));

        Ok(match sequence.state {
            FetchState::Loading | FetchState::Success => BeginFetch::Busy,
            FetchState::Error => BeginFetch::Failed,
            FetchState::Idle if sequence.continuation.is_end() => BeginFetch::Exhausted,
            FetchState::Idle => {
                sequence.state = FetchState::Loading;
                BeginFetch::Started(sequence.ticket(key))
            }
        })
    }

    /// Move `key` from `Error` back to `Loading` with the same cursor.
    pub(crate) fn retry_fetch(&self, key: &QueryKey) -> Result<Option<FetchTicket>, FeedError> {
        let mut sequences = self.write("retry_fetch")?;
        Ok(match sequences.get_mut(key) {
            Some(sequence) if sequence.state == FetchState::Error => {
                sequence.state = FetchState::Loading;
                sequence.error = None;
                Some(sequence.ticket(key))
            }
            _ => None,
        })
    }

    /// Land a fetched page and move to `Success`. Returns `false` (and drops
    /// the page) when the ticket went stale.
    ///
    /// The sequence stays in `Success`, refusing new fetches, until
    /// [`settle_fetch`](Self::settle_fetch).
    pub(crate) fn complete_fetch(&self, ticket: &FetchTicket, page: Page) -> Result<bool, FeedError> {
        let mut sequences = self.write("complete_fetch")?;
        match sequences.get_mut(&ticket.key) {
            Some(sequence) if sequence.accepts(ticket) => {
                sequence.append(page);
                sequence.state = FetchState::Success;
                sequence.error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Move a landed fetch from `Success` back to `Idle`.
    pub(crate) fn settle_fetch(&self, ticket: &FetchTicket) -> Result<bool, FeedError> {
        let mut sequences = self.write("settle_fetch")?;
        match sequences.get_mut(&ticket.key) {
            Some(sequence) if sequence.landed(ticket) => {
                sequence.state = FetchState::Idle;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Put a fetch that never resolved (cancelled or panicked) back to
    /// `Idle` at the same cursor.
    pub(crate) fn abandon_fetch(&self, ticket: &FetchTicket) -> Result<bool, FeedError> {
        let mut sequences = self.write("abandon_fetch")?;
        match sequences.get_mut(&ticket.key) {
            Some(sequence) if sequence.accepts(ticket) => {
                sequence.state = FetchState::Idle;
                debug!(query = %ticket.key, "fetch abandoned");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record a failed fetch. Returns `false` when the ticket went stale.
    pub(crate) fn fail_fetch(&self, ticket: &FetchTicket, error: FeedError) -> Result<bool, FeedError> {
        let mut sequences = self.write("fail_fetch")?;
        match sequences.get_mut(&ticket.key) {
            Some(sequence) if sequence.accepts(ticket) => {
                sequence.state = FetchState::Error;
                sequence.error = Some(error);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
