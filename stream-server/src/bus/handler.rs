//! Message handlers run by the event router

use async_trait::async_trait;
use shared::execution::Event;
use shared::message::BusMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use super::registry::SubscriptionRegistry;

/// Handler failure
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A consumer of topic messages
///
/// Failures are returned explicitly; the router applies its failure policy.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs and dead letters
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError>;
}

/// Decodes the event and pushes it to local subscribers
///
/// Every event is also mirrored on the local broadcast channel.
pub struct FanoutHandler {
    registry: Arc<SubscriptionRegistry>,
    local: broadcast::Sender<Arc<Event>>,
}

impl FanoutHandler {
    pub fn new(registry: Arc<SubscriptionRegistry>, local: broadcast::Sender<Arc<Event>>) -> Self {
        Self { registry, local }
    }
}

#[async_trait]
impl MessageHandler for FanoutHandler {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let event = message
            .parse_event()
            .map_err(|e| HandlerError::failed(format!("undecodable event: {e}")))?;

        if event.workflow_id != message.stream_key.workflow_id()
            || event.trigger_id != message.stream_key.trigger_id()
        {
            return Err(HandlerError::failed(format!(
                "event addressed to {}:{} published on {}",
                event.workflow_id, event.trigger_id, message.stream_key
            )));
        }

        let event = Arc::new(event);
        let stats = self.registry.publish(&message.stream_key, Arc::clone(&event));

        // 无订阅者时 send 返回 Err，安全忽略
        let _ = self.local.send(event);

        tracing::debug!(
            stream = %message.stream_key,
            delivered = stats.delivered,
            dropped = stats.dropped,
            pruned = stats.pruned,
            "Event fanned out"
        );
        Ok(())
    }
}
