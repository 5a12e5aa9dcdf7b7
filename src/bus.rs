//! Message bus - typed cross-component notifications.
//!
//! Components that need to tell each other something ("this like failed",
//! "the saved list changed", "the feed query was replaced") publish a typed
//! [`BusMessage`]. Every message belongs to exactly one [`Topic`]; a
//! [`Subscription`] names the topics it cares about and reads at its own
//! pace, so subscribers never depend on each other's ordering.
//!
//! ```text
//! ┌────────────┐  publish   ┌──────────────────────────┐
//! │ Coordinator│ ─────────▶ │ MessageBus (broadcast)   │
//! │ Controller │            └──────────────────────────┘
//! │ Poller     │              │ Notices │ Profile │ Feed │ Unread
//! └────────────┘              ▼         ▼         ▼      ▼
//!                           Subscription (topic filter)
//! ```
//!
//! The bus is bounded. It keeps the last `capacity` messages for
//! [`MessageBus::messages`], and a subscriber that falls more than
//! `capacity` messages behind skips the oldest ones.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;

use crate::backend::UnreadCounts;
use crate::coordinator::Interaction;
use crate::envelope::ContentKey;
use crate::query::QueryKey;

/// Named channels on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Transient user-visible notices (failed interactions).
    Notices,
    /// The viewer's profile data (saved items) went stale.
    Profile,
    /// A feed view replaced or dropped its query.
    Feed,
    /// Unread notification/message counters.
    Unread,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Notices => "notices",
            Topic::Profile => "profile",
            Topic::Feed => "feed",
            Topic::Unread => "unread",
        }
    }
}

/// A failed interaction the user should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub key: ContentKey,
    pub action: Interaction,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Notice(Notice),
    /// A save/unsave was confirmed by the backend.
    SavesChanged { key: ContentKey, saved: bool },
    /// A view moved from `previous` to `current` (`None` on unmount).
    FeedInvalidated {
        previous: QueryKey,
        current: Option<QueryKey>,
    },
    UnreadCounts(UnreadCounts),
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            BusMessage::Notice(_) => Topic::Notices,
            BusMessage::SavesChanged { .. } => Topic::Profile,
            BusMessage::FeedInvalidated { .. } => Topic::Feed,
            BusMessage::UnreadCounts(_) => Topic::Unread,
        }
    }
}

/// Messages kept for late readers when no capacity is given.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// In-process bus. Clone-friendly; clones share the same channel.
#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<BusMessage>,
    history: Arc<Mutex<VecDeque<BusMessage>>>,
    capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn publish(&self, message: BusMessage) {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // no subscribers is fine
        let _ = self.sender.send(message);
    }

    /// Subscribe to `topics`, starting with the next published message.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            topics: topics.to_vec(),
        }
    }

    /// Retained messages on `topic`, oldest first.
    pub fn messages(&self, topic: Topic) -> Vec<BusMessage> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.topic() == topic)
            .cloned()
            .collect()
    }

    /// Number of retained messages, at most [`capacity`](Self::capacity).
    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A topic-filtered reader on the bus.
pub struct Subscription {
    receiver: broadcast::Receiver<BusMessage>,
    topics: Vec<Topic>,
}

impl Subscription {
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Next matching message, if one is already published.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) if self.topics.contains(&message.topic()) => return Some(message),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscription lagged behind the bus");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Every matching message published since the last read.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        let mut out = Vec::new();
        while let Some(message) = self.try_next() {
            out.push(message);
        }
        out
    }

    /// Wait for the next matching message. `None` once every bus handle is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.topics.contains(&message.topic()) => return Some(message),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscription lagged behind the bus");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
