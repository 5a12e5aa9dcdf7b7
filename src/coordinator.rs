//! MutationCoordinator - optimistic like/save with reconcile and rollback.
//!
//! An interaction on `(kind, id)` runs in four steps:
//!
//! 1. Snapshot the item's current interaction fields from the cache.
//! 2. Write the speculative next state to every cached copy.
//! 3. Call the kind's like/save endpoint.
//! 4. On success write the server's values over the speculative ones; on
//!    failure write the snapshot back and publish a [`Notice`].
//!
//! Interactions on the same item are queued: the second one waits for the
//! first to reconcile and computes its delta from the reconciled state.
//! Different items never wait on each other.
//!
//! Dropping an interaction's future mid-flight (task aborted, caller timed
//! out) writes the pre-interaction values back and leaves the queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::ContentBackend;
use crate::bus::{BusMessage, MessageBus, Notice};
use crate::cache::InteractionCache;
use crate::config::FeedConfig;
use crate::envelope::{ContentEnvelope, ContentId, ContentKey, ContentKind, InteractionPatch};
use crate::error::FeedError;

/// The user interactions the coordinator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    Like,
    Save,
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interaction::Like => f.write_str("like"),
            Interaction::Save => f.write_str("save"),
        }
    }
}

impl Interaction {
    /// Speculative next state, and the value to send to the backend.
    fn toggle(&self, current: &ContentEnvelope) -> (InteractionPatch, bool) {
        match self {
            Interaction::Like => {
                let liked = !current.is_liked;
                let likes = if liked {
                    current.likes.saturating_add(1)
                } else {
                    current.likes.saturating_sub(1)
                };
                (InteractionPatch::new().liked(liked).likes(likes), liked)
            }
            Interaction::Save => {
                let saved = !current.is_saved;
                (InteractionPatch::new().saved(saved), saved)
            }
        }
    }

    /// The fields this interaction touches, as they are now.
    fn snapshot(&self, current: &ContentEnvelope) -> InteractionPatch {
        match self {
            Interaction::Like => InteractionPatch::new()
                .liked(current.is_liked)
                .likes(current.likes),
            Interaction::Save => InteractionPatch::new().saved(current.is_saved),
        }
    }
}

pub struct MutationCoordinator<B: ?Sized> {
    backend: Arc<B>,
    cache: Arc<InteractionCache>,
    bus: MessageBus,
    timeout: Duration,
    queues: QueueMap,
}

impl<B: ContentBackend + ?Sized> MutationCoordinator<B> {
    pub fn new(
        backend: Arc<B>,
        cache: Arc<InteractionCache>,
        bus: MessageBus,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            bus,
            timeout,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        backend: Arc<B>,
        cache: Arc<InteractionCache>,
        bus: MessageBus,
        config: &FeedConfig,
    ) -> Self {
        Self::new(backend, cache, bus, config.mutation_timeout)
    }

    /// Toggle the viewer's like on `(kind, id)`.
    ///
    /// Resolves once the cache holds either the server's values or the
    /// pre-interaction values again. Returns the values written last.
    pub async fn like(
        &self,
        kind: ContentKind,
        id: impl Into<ContentId>,
    ) -> Result<InteractionPatch, FeedError> {
        self.perform(ContentKey::new(kind, id), Interaction::Like)
            .await
    }

    /// Toggle the viewer's save on `(kind, id)`.
    pub async fn save(
        &self,
        kind: ContentKind,
        id: impl Into<ContentId>,
    ) -> Result<InteractionPatch, FeedError> {
        self.perform(ContentKey::new(kind, id), Interaction::Save)
            .await
    }

    /// Whether an interaction on `key` is running or queued.
    pub fn is_pending(&self, key: &ContentKey) -> bool {
        self.queues
            .lock()
            .map(|queues| queues.contains_key(key))
            .unwrap_or(false)
    }

    pub async fn perform(
        &self,
        key: ContentKey,
        interaction: Interaction,
    ) -> Result<InteractionPatch, FeedError> {
        let slot = self.enter_queue(&key)?;
        let _turn = slot.turn().await;
        self.reconcile(&key, interaction).await
    }

    fn enter_queue(&self, key: &ContentKey) -> Result<QueueSlot<'_>, FeedError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| FeedError::LockPoisoned("interaction queue map"))?;
        let queue = queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Ok(QueueSlot {
            queues: &self.queues,
            key: key.clone(),
            queue,
        })
    }

    async fn reconcile(
        &self,
        key: &ContentKey,
        interaction: Interaction,
    ) -> Result<InteractionPatch, FeedError> {
        let current = self
            .cache
            .find(key)?
            .ok_or_else(|| FeedError::NotCached(key.clone()))?;
        let rollback = interaction.snapshot(&current);
        let (optimistic, value) = interaction.toggle(&current);

        let copies = self.cache.update_envelope(key.kind, &key.id, &optimistic)?;
        debug!(%key, %interaction, value, copies, "optimistic write");
        let speculation = Speculation {
            cache: &self.cache,
            key,
            rollback,
            armed: true,
        };

        let call = async {
            match interaction {
                Interaction::Like => self.backend.set_liked(key, value).await,
                Interaction::Save => self.backend.set_saved(key, value).await,
            }
        };
        let response = match timeout(self.timeout, call).await {
            Ok(response) => response,
            Err(_) => Err(FeedError::timeout(&format!("{} request", interaction), self.timeout)),
        };

        match response {
            Ok(counters) => {
                let server = counters.into_patch();
                let authoritative = InteractionPatch {
                    likes: server.likes.or(optimistic.likes),
                    is_liked: server.is_liked.or(optimistic.is_liked),
                    is_saved: server.is_saved.or(optimistic.is_saved),
                };
                self.cache.update_envelope(key.kind, &key.id, &authoritative)?;
                speculation.settle();
                debug!(%key, %interaction, ?authoritative, "reconciled");

                if interaction == Interaction::Save {
                    self.bus.publish(BusMessage::SavesChanged {
                        key: key.clone(),
                        saved: authoritative.is_saved.unwrap_or(value),
                    });
                }
                Ok(authoritative)
            }
            Err(err) => {
                warn!(%key, %interaction, error = %err, "interaction failed, rolling back");
                speculation.restore();
                self.bus.publish(BusMessage::Notice(Notice {
                    key: key.clone(),
                    action: interaction,
                    message: notice_text(interaction, &err),
                }));
                Err(err)
            }
        }
    }
}

type QueueMap = Mutex<HashMap<ContentKey, Arc<AsyncMutex<()>>>>;

/// A place in one item's interaction queue. Leaving the queue (normally or
/// by cancellation) removes the entry once nobody else holds it.
struct QueueSlot<'a> {
    queues: &'a QueueMap,
    key: ContentKey,
    queue: Arc<AsyncMutex<()>>,
}

impl QueueSlot<'_> {
    async fn turn(&self) -> AsyncMutexGuard<'_, ()> {
        self.queue.lock().await
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        // clones are only taken under the map lock: map + this slot is 2
        if let Ok(mut queues) = self.queues.lock() {
            if Arc::strong_count(&self.queue) == 2 {
                queues.remove(&self.key);
            }
        }
    }
}

/// An optimistic write that has not been confirmed yet. Dropped while armed
/// (the interaction was cancelled mid-flight), it writes the pre-interaction
/// values back.
struct Speculation<'a> {
    cache: &'a InteractionCache,
    key: &'a ContentKey,
    rollback: InteractionPatch,
    armed: bool,
}

impl Speculation<'_> {
    /// The server's values are in place.
    fn settle(mut self) {
        self.armed = false;
    }

    /// Put the pre-interaction values back now.
    fn restore(mut self) {
        self.armed = false;
        self.write_back();
    }

    fn write_back(&self) {
        let key = self.key;
        if let Err(err) = self.cache.update_envelope(key.kind, &key.id, &self.rollback) {
            warn!(%key, error = %err, "rollback write failed");
        }
    }
}

impl Drop for Speculation<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(key = %self.key, "interaction cancelled before reconcile, rolling back");
            self.write_back();
        }
    }
}

fn notice_text(interaction: Interaction, err: &FeedError) -> String {
    let verb = match interaction {
        Interaction::Like => "update your like",
        Interaction::Save => "update your saved items",
    };
    match err {
        FeedError::Backend { message, .. } => format!("Couldn't {}: {}", verb, message),
        _ => format!("Couldn't {}. Check your connection and try again.", verb),
    }
}
