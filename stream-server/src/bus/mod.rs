//! Event bus
//!
//! # 架构
//!
//! ```text
//! EventPublisher ──► DurableTopic (redb)
//!                         │ consumer group
//!                         ▼
//!                    EventRouter ──► FanoutHandler
//!                                        ├── SubscriptionRegistry ──► gateway connections
//!                                        └── broadcast (local mirror)
//! ```
//!
//! The bus owns the registry and the local broadcast; nothing here is
//! process-global, so several buses can coexist (tests do).

pub mod handler;
pub mod registry;
pub mod router;
pub mod topic;

pub use handler::{FanoutHandler, HandlerError, MessageHandler};
pub use registry::{DispatchStats, Subscription, SubscriptionRegistry};
pub use router::{EventRouter, FailurePolicy, RouterState};
pub use topic::{DeadLetterEntry, Delivery, DurableTopic};

use shared::execution::{Event, StreamKey};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Consumer group of this process's router
    pub consumer_group: String,
    pub failure_policy: FailurePolicy,
    /// Per-subscriber channel capacity
    pub subscriber_capacity: usize,
    /// Local broadcast capacity
    pub local_fanout_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            consumer_group: "gateway".to_string(),
            failure_policy: FailurePolicy::LogAndContinue,
            subscriber_capacity: 256,
            local_fanout_capacity: 1024,
        }
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    topic: Arc<DurableTopic>,
    registry: Arc<SubscriptionRegistry>,
    local_tx: broadcast::Sender<Arc<Event>>,
    router: Arc<EventRouter>,
}

impl EventBus {
    /// Wire topic, registry, local fan-out and router together
    pub fn new(topic: Arc<DurableTopic>, config: &BusConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(config.subscriber_capacity));
        let (local_tx, _) = broadcast::channel(config.local_fanout_capacity.max(1));

        let fanout = FanoutHandler::new(Arc::clone(&registry), local_tx.clone());
        let router = EventRouter::new(
            Arc::clone(&topic),
            config.consumer_group.clone(),
            config.failure_policy,
        )
        .register_handler(Arc::new(fanout));

        Self {
            topic,
            registry,
            local_tx,
            router: Arc::new(router),
        }
    }

    pub fn topic(&self) -> &Arc<DurableTopic> {
        &self.topic
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Live events for one stream, starting at `from_sequence`
    pub fn subscribe(&self, key: StreamKey, from_sequence: u64) -> Subscription {
        self.registry.subscribe(key, from_sequence)
    }

    /// Every dispatched event, no durability guarantee
    pub fn subscribe_local(&self) -> broadcast::Receiver<Arc<Event>> {
        self.local_tx.subscribe()
    }
}
