//! Producer facade used by the execution engine
//!
//! Appending to the event log and publishing to the durable topic are two
//! independent steps: the log is the source of truth, the topic only feeds
//! live subscribers. A topic failure is logged and does not fail the append.

use shared::execution::{Event, EventPayload, ExecutionSnapshot, StreamKey};
use shared::message::BusMessage;
use std::sync::Arc;

use crate::bus::DurableTopic;
use crate::correlation;
use crate::storage::{EventLogStore, SnapshotStore, StoreResult, blocking};

/// 事件发布器
#[derive(Clone)]
pub struct EventPublisher {
    event_log: EventLogStore,
    snapshots: SnapshotStore,
    topic: Arc<DurableTopic>,
}

impl EventPublisher {
    pub fn new(event_log: EventLogStore, snapshots: SnapshotStore, topic: Arc<DurableTopic>) -> Self {
        Self {
            event_log,
            snapshots,
            topic,
        }
    }

    /// Build, sequence and publish an event, returns the persisted event
    pub async fn publish(
        &self,
        key: &StreamKey,
        session_id: impl Into<String>,
        payload: EventPayload,
    ) -> StoreResult<Event> {
        self.append(key.clone(), Event::new(key, session_id, payload))
            .await
    }

    /// Sequence and publish a prepared event
    ///
    /// The current correlation id travels with the bus message.
    pub async fn append(&self, key: StreamKey, event: Event) -> StoreResult<Event> {
        let correlation_id = correlation::correlation_id();
        let event_log = self.event_log.clone();
        let topic = Arc::clone(&self.topic);

        blocking(move || {
            let (sequence, persisted) = event_log.append(&key, event)?;

            let published = BusMessage::event(key.clone(), &persisted)
                .map_err(Into::into)
                .and_then(|message| topic.publish(&message.with_correlation_id(&correlation_id)));
            match published {
                Ok(offset) => tracing::debug!(
                    stream = %key,
                    sequence,
                    offset,
                    kind = persisted.kind(),
                    correlation_id = %correlation_id,
                    "Event published"
                ),
                Err(e) => tracing::warn!(
                    stream = %key,
                    sequence,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Event persisted but not published to the topic"
                ),
            }
            Ok(persisted)
        })
        .await
    }

    /// Overwrite the execution snapshot
    pub async fn put_snapshot(&self, snapshot: ExecutionSnapshot) -> StoreResult<()> {
        let snapshots = self.snapshots.clone();
        blocking(move || snapshots.put(&snapshot)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::execution::{NodeStarted, WorkflowCompleted};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn publisher() -> (EventPublisher, Arc<DurableTopic>) {
        let db = crate::storage::open_in_memory().unwrap();
        let event_log = EventLogStore::new(db.clone(), Duration::from_secs(60)).unwrap();
        let snapshots = SnapshotStore::new(db.clone(), Duration::from_secs(60)).unwrap();
        let topic = Arc::new(DurableTopic::new(db).unwrap());
        (EventPublisher::new(event_log, snapshots, topic.clone()), topic)
    }

    #[tokio::test]
    async fn test_publish_appends_then_feeds_topic() {
        let (publisher, topic) = publisher();
        let key = StreamKey::new("w1", "t1").unwrap();

        let first = correlation::with_correlation_id(
            "req-1",
            publisher.publish(
                &key,
                "s1",
                EventPayload::NodeStarted(NodeStarted {
                    node_id: "n1".to_string(),
                    inputs: serde_json::Value::Null,
                }),
            ),
        )
        .await
        .unwrap();
        let second = publisher
            .publish(
                &key,
                "s1",
                EventPayload::WorkflowCompleted(WorkflowCompleted::default()),
            )
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let shutdown = CancellationToken::new();
        let delivery = topic.next("test", &shutdown).await.unwrap().unwrap();
        assert_eq!(delivery.message.stream_key, key);
        assert_eq!(delivery.message.correlation_id(), Some("req-1"));
        assert_eq!(delivery.message.parse_event().unwrap(), first);

        let delivery = topic.next("test", &shutdown).await.unwrap().unwrap();
        assert!(
            delivery
                .message
                .correlation_id()
                .unwrap()
                .starts_with(correlation::GENERATED_PREFIX)
        );
    }

    #[tokio::test]
    async fn test_put_snapshot() {
        let (publisher, _) = publisher();
        let key = StreamKey::new("w1", "t1").unwrap();
        let snapshot = ExecutionSnapshot::new(&key, "s1");

        publisher.put_snapshot(snapshot.clone()).await.unwrap();
        assert_eq!(publisher.snapshots.get(&key).unwrap(), Some(snapshot));
    }
}
