//! Background task polling unread notification/message counters.
//!
//! `CounterPoller` spawns a tokio task that asks a [`CounterSource`] for the
//! unread counters on a fixed interval and publishes
//! [`BusMessage::UnreadCounts`] whenever they change. Failed polls are logged
//! and counted; the last good counters stay in place.
//!
//! ## Example
//!
//! ```ignore
//! let bus = MessageBus::new();
//! let poller = CounterPoller::spawn(backend.clone(), bus.clone(), Duration::from_secs(30));
//!
//! // ... later ...
//!
//! let stats = poller.stop().await;
//! println!("published {} updates", stats.published);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::backend::{CounterSource, UnreadCounts};
use crate::bus::{BusMessage, MessageBus};

/// Statistics from the poller task.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollerStats {
    /// Number of polls issued.
    pub ticks: usize,
    /// Number of changed counters published to the bus.
    pub published: usize,
    /// Number of polls that failed.
    pub failures: usize,
}

pub struct CounterPoller {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<PollerStats>>,
}

impl CounterPoller {
    /// Spawn the poller on the current tokio runtime. The first poll runs
    /// immediately.
    pub fn spawn<S>(source: Arc<S>, bus: MessageBus, every: Duration) -> Self
    where
        S: CounterSource + ?Sized + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut stats = PollerStats::default();
            let mut last: Option<UnreadCounts> = None;
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                stats.ticks += 1;
                match source.unread_counts().await {
                    Ok(counts) if last != Some(counts) => {
                        debug!(
                            notifications = counts.notifications,
                            messages = counts.messages,
                            "unread counters changed"
                        );
                        last = Some(counts);
                        bus.publish(BusMessage::UnreadCounts(counts));
                        stats.published += 1;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        stats.failures += 1;
                        warn!(error = %err, "unread counter poll failed");
                    }
                }
            }

            stats
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the poller to stop and wait for it to finish.
    pub async fn stop(mut self) -> PollerStats {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => PollerStats::default(),
        }
    }
}

impl Drop for CounterPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
