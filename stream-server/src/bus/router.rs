//! Event Router - 消费持久化 topic 并分发
//!
//! ```text
//! DurableTopic (consumer group)
//!        │ next()
//!        ▼
//!   EventRouter ── bind correlation id ──► handlers (catch_unwind)
//!        │                                    │ Err / panic
//!        │                                    ▼
//!        │                              FailurePolicy (log | dead letter)
//!        ▼
//!      ack (always, no redelivery loop)
//! ```

use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::handler::{HandlerError, MessageHandler};
use super::topic::{DeadLetterEntry, Delivery, DurableTopic};
use crate::core::tasks::panic_message;
use crate::correlation;

/// Delay before retrying after the topic itself failed
const TOPIC_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Router lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterState::Stopped => write!(f, "stopped"),
            RouterState::Starting => write!(f, "starting"),
            RouterState::Running => write!(f, "running"),
        }
    }
}

/// What happens to a message whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    LogAndContinue,
    DeadLetter,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log_and_continue" => Ok(FailurePolicy::LogAndContinue),
            "dead_letter" | "dlq" => Ok(FailurePolicy::DeadLetter),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

/// 事件路由器
///
/// One consumer loop per instance. Handlers run in registration order.
pub struct EventRouter {
    topic: Arc<DurableTopic>,
    group: String,
    policy: FailurePolicy,
    handlers: Vec<Arc<dyn MessageHandler>>,
    state: watch::Sender<RouterState>,
}

impl EventRouter {
    pub fn new(topic: Arc<DurableTopic>, group: impl Into<String>, policy: FailurePolicy) -> Self {
        let (state, _) = watch::channel(RouterState::Stopped);
        Self {
            topic,
            group: group.into(),
            policy,
            handlers: Vec::new(),
            state,
        }
    }

    /// Register a handler
    pub fn register_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<RouterState> {
        self.state.subscribe()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Run the consumer loop until `shutdown` fires
    ///
    /// The in-flight message is always fully dispatched and acknowledged
    /// before the loop returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        let started = self.state.send_if_modified(|state| {
            if *state == RouterState::Stopped {
                *state = RouterState::Starting;
                true
            } else {
                false
            }
        });
        if !started {
            tracing::warn!(group = %self.group, state = %self.state(), "Event router already running");
            return;
        }

        tracing::info!(
            group = %self.group,
            handlers = self.handlers.len(),
            policy = ?self.policy,
            "Event router started"
        );
        self.state.send_replace(RouterState::Running);

        loop {
            match self.topic.next(&self.group, &shutdown).await {
                Ok(Some(delivery)) => self.dispatch(delivery).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(group = %self.group, error = %e, "Topic read failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(TOPIC_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        self.state.send_replace(RouterState::Stopped);
        tracing::info!(group = %self.group, "Event router stopped");
    }

    /// Dispatch one message to every handler, then acknowledge it
    async fn dispatch(&self, delivery: Delivery) {
        let correlation_id = correlation::from_message(&delivery.message);
        let span = tracing::info_span!(
            "dispatch",
            offset = delivery.offset,
            stream = %delivery.message.stream_key,
            correlation_id = %correlation_id,
        );

        correlation::with_correlation_id(correlation_id, async {
            for handler in &self.handlers {
                let result = AssertUnwindSafe(handler.handle(&delivery.message))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));

                if let Err(error) = result {
                    self.on_failure(handler.name(), &delivery, error);
                }
            }

            if let Err(e) = self.topic.ack(&self.group, delivery.offset) {
                tracing::error!(error = %e, "Failed to acknowledge message");
            }
        })
        .instrument(span)
        .await;
    }

    fn on_failure(&self, handler: &'static str, delivery: &Delivery, error: HandlerError) {
        match self.policy {
            FailurePolicy::LogAndContinue => {
                tracing::error!(handler, error = %error, "Handler failed, message skipped");
            }
            FailurePolicy::DeadLetter => {
                let entry = DeadLetterEntry {
                    offset: delivery.offset,
                    group: self.group.clone(),
                    handler: handler.to_string(),
                    error: error.to_string(),
                    failed_at: shared::util::now_millis(),
                    message: delivery.message.clone(),
                };
                match self.topic.dead_letter(&entry) {
                    Ok(id) => {
                        tracing::warn!(handler, error = %error, dead_letter = id, "Handler failed, message dead-lettered");
                    }
                    Err(e) => {
                        tracing::error!(handler, error = %error, store_error = %e, "Handler failed and dead letter could not be stored");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shared::execution::StreamKey;
    use shared::message::BusMessage;

    struct Recording {
        seen: Mutex<Vec<(Vec<u8>, Option<String>)>>,
    }

    #[async_trait]
    impl MessageHandler for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .push((message.payload.clone(), correlation::current()));
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn handle(&self, _message: &BusMessage) -> Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    struct Failing;

    #[async_trait]
    impl MessageHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _message: &BusMessage) -> Result<(), HandlerError> {
            Err(HandlerError::failed("nope"))
        }
    }

    fn message(n: u8) -> BusMessage {
        BusMessage::new(StreamKey::new("w1", "t1").unwrap(), vec![n])
    }

    async fn wait_for_offset(topic: &DurableTopic, group: &str, offset: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while topic.committed_offset(group).unwrap() != Some(offset) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let topic = Arc::new(DurableTopic::open_in_memory().unwrap());
        let router = Arc::new(EventRouter::new(topic, "g", FailurePolicy::LogAndContinue));
        assert_eq!(router.state(), RouterState::Stopped);

        let mut states = router.watch_state();
        let shutdown = CancellationToken::new();
        let handle = {
            let router = router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { router.run(shutdown).await })
        };

        states
            .wait_for(|state| *state == RouterState::Running)
            .await
            .unwrap();

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(router.state(), RouterState::Stopped);
    }

    #[tokio::test]
    async fn test_correlation_id_bound_during_dispatch() {
        let topic = Arc::new(DurableTopic::open_in_memory().unwrap());
        let recording = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let router = Arc::new(
            EventRouter::new(topic.clone(), "g", FailurePolicy::LogAndContinue)
                .register_handler(recording.clone()),
        );

        topic
            .publish(&message(1).with_correlation_id("req-7"))
            .unwrap();
        topic.publish(&message(2)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let router = router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { router.run(shutdown).await })
        };
        wait_for_offset(&topic, "g", 2).await;
        shutdown.cancel();
        handle.await.unwrap();

        let seen = recording.seen.lock();
        assert_eq!(seen[0], (vec![1], Some("req-7".to_string())));
        assert_eq!(seen[1].0, vec![2]);
        assert!(
            seen[1]
                .1
                .as_deref()
                .unwrap()
                .starts_with(correlation::GENERATED_PREFIX)
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_still_advances_offset() {
        let topic = Arc::new(DurableTopic::open_in_memory().unwrap());
        let recording = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let router = Arc::new(
            EventRouter::new(topic.clone(), "g", FailurePolicy::LogAndContinue)
                .register_handler(Arc::new(Panicking))
                .register_handler(recording.clone()),
        );

        topic.publish(&message(1)).unwrap();
        topic.publish(&message(2)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let router = router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { router.run(shutdown).await })
        };
        wait_for_offset(&topic, "g", 2).await;
        shutdown.cancel();
        handle.await.unwrap();

        // The loop survived both panics and later handlers still ran
        assert_eq!(recording.seen.lock().len(), 2);
        assert_eq!(topic.committed_offset("g").unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_dead_letter_policy() {
        let topic = Arc::new(DurableTopic::open_in_memory().unwrap());
        let router = Arc::new(
            EventRouter::new(topic.clone(), "g", FailurePolicy::DeadLetter)
                .register_handler(Arc::new(Failing))
                .register_handler(Arc::new(Panicking)),
        );

        topic.publish(&message(1)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let router = router.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { router.run(shutdown).await })
        };
        wait_for_offset(&topic, "g", 1).await;
        shutdown.cancel();
        handle.await.unwrap();

        let letters = topic.dead_letters().unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].1.handler, "failing");
        assert_eq!(letters[1].1.handler, "panicking");
        assert!(letters[1].1.error.contains("handler exploded"));
        assert_eq!(letters[0].1.offset, 1);
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!(
            "log".parse::<FailurePolicy>(),
            Ok(FailurePolicy::LogAndContinue)
        );
        assert_eq!(
            "DEAD_LETTER".parse::<FailurePolicy>(),
            Ok(FailurePolicy::DeadLetter)
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
