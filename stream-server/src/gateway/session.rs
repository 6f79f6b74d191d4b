//! One SSE connection
//!
//! ```text
//! open: subscribe(from) ──► read_from(from)      (replay only)
//! frames: Greeting ──► [Replay] ──► Live ──► Done
//!                                    │
//!              terminal event / subscription closed / shutdown
//! ```
//!
//! The subscription is registered before the replay read, so nothing
//! appended in between is lost. Live events at or below the last replayed
//! sequence are skipped. A failed replay read fails `open`; the connection
//! is never accepted without the history it asked for.

use serde::Serialize;
use shared::execution::{Event, StreamKey};
use std::sync::Arc;
use std::vec;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscription};
use crate::storage::{EventLogStore, StoreResult, blocking};

/// What a new connection receives before live events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Greeting only; clients catch up through the events API
    #[default]
    LiveOnly,
    /// Replay `read_from(n)` before going live; nothing below `n` is sent
    FromSequence(u64),
}

impl ReplayPolicy {
    /// Lowest sequence the connection accepts
    pub fn from_sequence(&self) -> u64 {
        match self {
            ReplayPolicy::LiveOnly => 0,
            ReplayPolicy::FromSequence(from) => *from,
        }
    }
}

impl From<Option<u64>> for ReplayPolicy {
    fn from(from_sequence: Option<u64>) -> Self {
        from_sequence.map_or(ReplayPolicy::LiveOnly, ReplayPolicy::FromSequence)
    }
}

/// Greeting payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub workflow_id: String,
    pub trigger_id: String,
}

/// Frame produced by a session, rendered as one SSE event
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Greeting(Greeting),
    Event(Arc<Event>),
}

enum Phase {
    Greeting(vec::IntoIter<Event>),
    Replay(vec::IntoIter<Event>),
    Live,
    Done,
}

/// Gateway session state
///
/// Dropping the session drops its [`Subscription`], which unregisters it.
pub struct GatewaySession {
    key: StreamKey,
    subscription: Subscription,
    shutdown: CancellationToken,
    phase: Phase,
    /// Highest sequence sent during replay
    replayed_through: Option<u64>,
    frames_sent: u64,
}

impl GatewaySession {
    /// Subscribe to `key`, then load the requested history
    ///
    /// Store errors from the replay read are returned; the subscription is
    /// released with them.
    pub async fn open(
        bus: &EventBus,
        event_log: EventLogStore,
        key: StreamKey,
        replay: ReplayPolicy,
        shutdown: CancellationToken,
    ) -> StoreResult<Self> {
        let subscription = bus.subscribe(key.clone(), replay.from_sequence());

        let history = match replay {
            ReplayPolicy::LiveOnly => Vec::new(),
            ReplayPolicy::FromSequence(from) => {
                let lookup = key.clone();
                let history = blocking(move || event_log.read_from(&lookup, from)).await?;
                tracing::debug!(stream = %key, from, count = history.len(), "Replay loaded");
                history
            }
        };

        tracing::info!(
            stream = %key,
            subscriber = subscription.id(),
            replay = ?replay,
            "Gateway connection opened"
        );

        Ok(Self {
            key,
            subscription,
            shutdown,
            phase: Phase::Greeting(history.into_iter()),
            replayed_through: None,
            frames_sent: 0,
        })
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Produce the next frame, `None` when the stream should close
    pub async fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.advance().await;
        if frame.is_some() {
            self.frames_sent += 1;
        }
        frame
    }

    async fn advance(&mut self) -> Option<Frame> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Greeting(history) => {
                    self.phase = Phase::Replay(history);
                    return Some(Frame::Greeting(Greeting {
                        kind: "connected",
                        workflow_id: self.key.workflow_id().to_string(),
                        trigger_id: self.key.trigger_id().to_string(),
                    }));
                }
                Phase::Replay(mut events) => match events.next() {
                    Some(event) => {
                        self.replayed_through = Some(event.sequence);
                        self.phase = if event.is_terminal() {
                            Phase::Done
                        } else {
                            Phase::Replay(events)
                        };
                        return Some(Frame::Event(Arc::new(event)));
                    }
                    None => self.phase = Phase::Live,
                },
                Phase::Live => {
                    let event = tokio::select! {
                        _ = self.shutdown.cancelled() => return None,
                        event = self.subscription.recv() => event?,
                    };
                    if self
                        .replayed_through
                        .is_some_and(|through| event.sequence <= through)
                    {
                        self.phase = Phase::Live;
                        continue;
                    }
                    self.phase = if event.is_terminal() {
                        Phase::Done
                    } else {
                        Phase::Live
                    };
                    return Some(Frame::Event(event));
                }
                Phase::Done => return None,
            }
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        tracing::info!(
            stream = %self.key,
            subscriber = self.subscription.id(),
            frames = self.frames_sent,
            "Gateway connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, DurableTopic, MessageHandler};
    use shared::execution::{EventPayload, NodeLog, WorkflowCompleted};
    use crate::storage::StoreError;
    use crate::storage::event_log::EVENTS_TABLE;
    use redb::Database;
    use shared::message::BusMessage;
    use std::time::Duration;

    struct Fixture {
        db: Arc<Database>,
        bus: EventBus,
        event_log: EventLogStore,
        key: StreamKey,
    }

    fn fixture() -> Fixture {
        let db = crate::storage::open_in_memory().unwrap();
        let topic = Arc::new(DurableTopic::new(db.clone()).unwrap());
        Fixture {
            bus: EventBus::new(topic, &BusConfig::default()),
            event_log: EventLogStore::new(db.clone(), Duration::from_secs(60)).unwrap(),
            db,
            key: StreamKey::new("w1", "t1").unwrap(),
        }
    }

    fn log(key: &StreamKey, message: &str) -> Event {
        Event::new(
            key,
            "s1",
            EventPayload::NodeLog(NodeLog {
                node_id: "n1".to_string(),
                level: Default::default(),
                message: message.to_string(),
            }),
        )
    }

    fn completed(key: &StreamKey) -> Event {
        Event::new(
            key,
            "s1",
            EventPayload::WorkflowCompleted(WorkflowCompleted::default()),
        )
    }

    impl Fixture {
        /// Append to the log and fan out directly (no router task)
        async fn emit(&self, event: Event) -> Event {
            let (_, persisted) = self.event_log.append(&self.key, event).unwrap();
            let fanout = crate::bus::FanoutHandler::new(
                self.bus.registry().clone(),
                tokio::sync::broadcast::channel(1).0,
            );
            let message = BusMessage::event(self.key.clone(), &persisted).unwrap();
            fanout.handle(&message).await.unwrap();
            persisted
        }

        async fn try_open(&self, replay: ReplayPolicy) -> StoreResult<GatewaySession> {
            GatewaySession::open(
                &self.bus,
                self.event_log.clone(),
                self.key.clone(),
                replay,
                CancellationToken::new(),
            )
            .await
        }

        async fn open(&self, replay: ReplayPolicy) -> GatewaySession {
            self.try_open(replay).await.unwrap()
        }

        /// Overwrite a stored event with bytes that do not decode
        fn corrupt(&self, sequence: u64) {
            let txn = self.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(EVENTS_TABLE).unwrap();
                table
                    .insert(
                        (self.key.workflow_id(), self.key.trigger_id(), sequence),
                        b"not json".as_slice(),
                    )
                    .unwrap();
            }
            txn.commit().unwrap();
        }
    }

    fn sequence(frame: Option<Frame>) -> u64 {
        match frame {
            Some(Frame::Event(event)) => event.sequence,
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_greeting_first() {
        let f = fixture();
        let mut session = f.open(ReplayPolicy::LiveOnly).await;

        match session.next_frame().await {
            Some(Frame::Greeting(greeting)) => {
                assert_eq!(greeting.kind, "connected");
                assert_eq!(greeting.workflow_id, "w1");
                assert_eq!(greeting.trigger_id, "t1");
            }
            other => panic!("expected greeting, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_only_skips_history_and_closes_on_terminal() {
        let f = fixture();
        f.emit(log(&f.key, "before")).await;

        let mut session = f.open(ReplayPolicy::LiveOnly).await;
        session.next_frame().await;

        f.emit(log(&f.key, "after")).await;
        f.emit(completed(&f.key)).await;

        assert_eq!(sequence(session.next_frame().await), 2);
        assert_eq!(sequence(session.next_frame().await), 3);
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_then_live_without_duplicates() {
        let f = fixture();
        f.emit(log(&f.key, "1")).await;
        f.emit(log(&f.key, "2")).await;

        // Event 3 arrives after the replay was loaded and is delivered live
        let mut session = f.open(ReplayPolicy::FromSequence(0)).await;
        f.emit(log(&f.key, "3")).await;

        session.next_frame().await;
        assert_eq!(sequence(session.next_frame().await), 1);
        assert_eq!(sequence(session.next_frame().await), 2);
        assert_eq!(sequence(session.next_frame().await), 3);

        f.emit(completed(&f.key)).await;
        assert_eq!(sequence(session.next_frame().await), 4);
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_ending_in_terminal_closes() {
        let f = fixture();
        f.emit(log(&f.key, "1")).await;
        f.emit(completed(&f.key)).await;

        let mut session = f.open(ReplayPolicy::FromSequence(2)).await;
        session.next_frame().await;
        assert_eq!(sequence(session.next_frame().await), 2);
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let f = fixture();
        let session = f.open(ReplayPolicy::LiveOnly).await;
        assert_eq!(f.bus.registry().subscriber_count(&f.key), 1);

        drop(session);
        assert_eq!(f.bus.registry().subscriber_count(&f.key), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_live_phase() {
        let f = fixture();
        let shutdown = CancellationToken::new();
        let mut session = GatewaySession::open(
            &f.bus,
            f.event_log.clone(),
            f.key.clone(),
            ReplayPolicy::LiveOnly,
            shutdown.clone(),
        )
        .await
        .unwrap();
        session.next_frame().await;

        shutdown.cancel();
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_from_sequence_above_head_filters_live_events() {
        let f = fixture();
        f.emit(log(&f.key, "1")).await;
        f.emit(log(&f.key, "2")).await;

        let mut session = f.open(ReplayPolicy::FromSequence(5)).await;
        assert!(matches!(session.next_frame().await, Some(Frame::Greeting(_))));

        f.emit(log(&f.key, "3")).await;
        f.emit(log(&f.key, "4")).await;
        f.emit(completed(&f.key)).await;

        assert_eq!(sequence(session.next_frame().await), 5);
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_read_failure_fails_open() {
        let f = fixture();
        f.emit(log(&f.key, "1")).await;
        f.corrupt(1);

        let result = f.try_open(ReplayPolicy::FromSequence(0)).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        assert_eq!(f.bus.registry().subscriber_count(&f.key), 0);

        // Live-only connections do not read history
        let session = f.open(ReplayPolicy::LiveOnly).await;
        assert_eq!(f.bus.registry().subscriber_count(&f.key), 1);
        drop(session);
    }

    #[test]
    fn test_replay_policy_lower_bound() {
        assert_eq!(ReplayPolicy::from(None).from_sequence(), 0);
        assert_eq!(ReplayPolicy::from(Some(7)).from_sequence(), 7);
    }
}
