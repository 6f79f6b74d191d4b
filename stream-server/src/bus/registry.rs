//! Subscription registry - stream key → live subscribers
//!
//! ```text
//! EventRouter ─► FanoutHandler ─► SubscriptionRegistry
//!                                   ├── (w1, t1) ─► [slot, slot]
//!                                   └── (w1, t2) ─► [slot]
//!                                         │ try_send (full → drop, closed → prune)
//!                                         ▼
//!                                   Subscription (gateway connection)
//! ```
//!
//! Sharded by key through `DashMap`; pushes never block the dispatcher.

use dashmap::DashMap;
use shared::execution::{Event, StreamKey};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

struct SubscriberSlot {
    id: u64,
    /// Events below this sequence are not forwarded
    from_sequence: u64,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    /// Subscriber channel full, message dropped for that subscriber
    pub dropped: usize,
    /// Subscriber gone, slot removed
    pub pruned: usize,
}

/// 订阅注册表
pub struct SubscriptionRegistry {
    slots: DashMap<StreamKey, Vec<SubscriberSlot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SubscriptionRegistry {
    /// `capacity` bounds each subscriber's channel
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber for `key`
    ///
    /// The returned [`Subscription`] unregisters itself when dropped.
    pub fn subscribe(self: &Arc<Self>, key: StreamKey, from_sequence: u64) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        self.slots.entry(key.clone()).or_default().push(SubscriberSlot {
            id,
            from_sequence,
            tx,
        });
        tracing::debug!(stream = %key, subscriber = id, "Subscriber registered");

        Subscription {
            id,
            key,
            rx,
            registry: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, key: &StreamKey, id: u64) {
        if let Some(mut slots) = self.slots.get_mut(key) {
            slots.retain(|slot| slot.id != id);
        }
        self.slots.remove_if(key, |_, slots| slots.is_empty());
        tracing::debug!(stream = %key, subscriber = id, "Subscriber removed");
    }

    /// Push `event` to every subscriber of `key` without waiting
    pub fn publish(&self, key: &StreamKey, event: Arc<Event>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let Some(mut slots) = self.slots.get_mut(key) else {
            return stats;
        };

        slots.retain(|slot| {
            if event.sequence < slot.from_sequence {
                return true;
            }
            match slot.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    stats.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        stream = %key,
                        subscriber = slot.id,
                        sequence = event.sequence,
                        "Subscriber channel full, event dropped"
                    );
                    stats.dropped += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    stats.pruned += 1;
                    false
                }
            }
        });

        let empty = slots.is_empty();
        drop(slots);
        if empty {
            self.slots.remove_if(key, |_, slots| slots.is_empty());
        }
        stats
    }

    pub fn subscriber_count(&self, key: &StreamKey) -> usize {
        self.slots.get(key).map_or(0, |slots| slots.len())
    }

    /// Number of streams with at least one subscriber
    pub fn stream_count(&self) -> usize {
        self.slots.len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Live subscription to one stream
///
/// Dropping it unregisters the subscriber on every exit path.
pub struct Subscription {
    id: u64,
    key: StreamKey,
    rx: mpsc::Receiver<Arc<Event>>,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Next live event; `None` once the registry dropped this subscriber
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.key, self.id);
    }
}
