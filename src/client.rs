//! FeedClient - one cache, one bus, many views.
//!
//! The client owns the pieces every feed view shares and hands out
//! [`FeedController`]s for individual views. Interactions go through the
//! client so every view sees them.

use std::sync::Arc;

use tracing::info;

use crate::backend::{ContentBackend, CounterSource};
use crate::bus::{MessageBus, Subscription, Topic};
use crate::cache::InteractionCache;
use crate::config::FeedConfig;
use crate::controller::FeedController;
use crate::coordinator::MutationCoordinator;
use crate::envelope::{ContentId, ContentKind, InteractionPatch};
use crate::error::FeedError;
use crate::fetcher::PageFetcher;
use crate::poller::CounterPoller;
use crate::query::QueryKey;

pub struct FeedClient<B: ?Sized> {
    config: FeedConfig,
    cache: Arc<InteractionCache>,
    bus: MessageBus,
    fetcher: Arc<PageFetcher<B>>,
    coordinator: MutationCoordinator<B>,
}

impl<B: ContentBackend + ?Sized> FeedClient<B> {
    pub fn new(backend: Arc<B>, config: FeedConfig) -> Self {
        let cache = Arc::new(InteractionCache::new());
        let bus = MessageBus::new();
        let fetcher = Arc::new(PageFetcher::from_config(Arc::clone(&backend), &config));
        let coordinator =
            MutationCoordinator::from_config(backend, Arc::clone(&cache), bus.clone(), &config);

        Self {
            config,
            cache,
            bus,
            fetcher,
            coordinator,
        }
    }

    /// A controller for a new view showing `key`.
    pub fn controller(&self, key: QueryKey) -> Arc<FeedController<B>> {
        info!(query = %key, "feed view mounted");
        Arc::new(FeedController::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.cache),
            self.bus.clone(),
            key,
        ))
    }

    pub async fn like(
        &self,
        kind: ContentKind,
        id: impl Into<ContentId>,
    ) -> Result<InteractionPatch, FeedError> {
        self.coordinator.like(kind, id).await
    }

    pub async fn save(
        &self,
        kind: ContentKind,
        id: impl Into<ContentId>,
    ) -> Result<InteractionPatch, FeedError> {
        self.coordinator.save(kind, id).await
    }

    pub fn coordinator(&self) -> &MutationCoordinator<B> {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<InteractionCache> {
        &self.cache
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        self.bus.subscribe(topics)
    }

    /// Start polling unread counters at the configured interval.
    pub fn spawn_poller<S>(&self, source: Arc<S>) -> CounterPoller
    where
        S: CounterSource + ?Sized + 'static,
    {
        CounterPoller::spawn(source, self.bus.clone(), self.config.poll_interval)
    }
}

#[cfg(feature = "http")]
impl FeedClient<crate::backend::HttpBackend> {
    /// Client talking to the REST API at `config.base_url`.
    pub fn from_config(config: FeedConfig) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        let backend = Arc::new(crate::backend::HttpBackend::from_config(&config)?);
        Ok(Self::new(backend, config))
    }
}
