//! Discovery feed core: typed content envelopes, forward-only paginated
//! sequences per query, a shared interaction cache with fan-out point
//! updates, and optimistic like/save with reconcile and rollback.

mod backend;
mod bus;
mod cache;
mod client;
mod config;
mod controller;
mod coordinator;
mod envelope;
mod error;
mod fetcher;
mod poller;
mod query;

pub use backend::{ContentBackend, CounterSource, InteractionCounters, RawPage, UnreadCounts};
#[cfg(feature = "http")]
pub use backend::HttpBackend;
pub use bus::{BusMessage, MessageBus, Notice, Subscription, Topic, DEFAULT_BUS_CAPACITY};
pub use cache::{FeedSnapshot, InteractionCache};
pub use client::FeedClient;
pub use config::{
    FeedConfig, ENV_BASE_URL, ENV_FETCH_TIMEOUT_MS, ENV_MUTATION_TIMEOUT_MS, ENV_PAGE_SIZE,
    ENV_POLL_INTERVAL_MS,
};
pub use controller::{FeedController, IgnoreReason, Sentinel, SentinelOutcome};
pub use coordinator::{Interaction, MutationCoordinator};
pub use envelope::{
    AuthorSummary, BookRef, ContentEnvelope, ContentId, ContentKey, ContentKind,
    InteractionPatch, Payload, PostPayload, QuotePayload, ReviewPayload,
};
pub use error::{ConfigError, DecodeError, FeedError, Result};
pub use fetcher::{decode_page, PageFetcher};
pub use poller::{CounterPoller, PollerStats};
pub use query::{ContentFilter, Continuation, Cursor, FetchState, Page, QueryKey, SortMode};
