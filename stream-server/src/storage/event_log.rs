//! Sequencer + event log store
//!
//! Every stream owns a counter record and an ordered event collection. The
//! counter record carries the expiry that governs both, so they are created,
//! refreshed and discarded together. Counter bump, event insert and expiry
//! refresh happen in one write transaction: sequences have no gaps and no
//! duplicates.

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::execution::{Event, StreamKey};
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;

use super::{StoreError, StoreResult};

/// key = (workflow_id, trigger_id, sequence), value = JSON-serialized Event
pub(crate) const EVENTS_TABLE: TableDefinition<(&str, &str, u64), &[u8]> =
    TableDefinition::new("stream_events");

/// key = (workflow_id, trigger_id), value = JSON-serialized StreamMeta
const COUNTERS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("stream_counters");

/// Counter record
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StreamMeta {
    last_sequence: u64,
    expires_at: i64,
    /// Events already purged; record kept so status can report `Expired`
    #[serde(default)]
    purged: bool,
}

impl StreamMeta {
    fn is_live(&self, now: i64) -> bool {
        !self.purged && self.expires_at > now
    }
}

/// Stream lifecycle as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamStatus {
    /// Never created (or expired long enough ago to be forgotten)
    Unknown,
    Active { last_sequence: u64, expires_at: i64 },
    /// Retention window elapsed, history discarded
    Expired,
}

/// Event log backed by redb
#[derive(Clone)]
pub struct EventLogStore {
    db: Arc<Database>,
    retention: Duration,
}

impl EventLogStore {
    /// Create the store on an open database (tables are created if missing)
    pub fn new(db: Arc<Database>, retention: Duration) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EVENTS_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db, retention })
    }

    /// In-memory store (for testing)
    pub fn open_in_memory(retention: Duration) -> StoreResult<Self> {
        Self::new(super::open_in_memory()?, retention)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn retention_millis(&self) -> i64 {
        i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX)
    }

    // ========== Append ==========

    /// Assign the next sequence to `event`, persist it and refresh the
    /// stream's expiry
    ///
    /// The event is re-addressed to `key` and stamped with sequence and
    /// server timestamp. Returns the assigned sequence and the persisted
    /// event. Failures abort the transaction; nothing is retried.
    pub fn append(&self, key: &StreamKey, mut event: Event) -> StoreResult<(u64, Event)> {
        let (wf, trig) = (key.workflow_id(), key.trigger_id());
        let now = now_millis();

        let txn = self.db.begin_write()?;
        let sequence = {
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            let mut events = txn.open_table(EVENTS_TABLE)?;

            let previous: Option<StreamMeta> = match counters.get((wf, trig))? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };

            let last_sequence = match previous {
                Some(meta) if meta.is_live(now) => meta.last_sequence,
                Some(_) => {
                    // Expired stream reused: start over with no surviving events
                    let removed = remove_stream_events(&mut events, wf, trig)?;
                    tracing::debug!(stream = %key, removed, "Resetting expired stream");
                    0
                }
                None => 0,
            };

            let sequence = last_sequence
                .checked_add(1)
                .ok_or_else(|| StoreError::InvalidSequence {
                    stream: key.to_string(),
                    sequence: last_sequence,
                })?;

            event.workflow_id = wf.to_string();
            event.trigger_id = trig.to_string();
            event.sequence = sequence;
            event.timestamp = now;

            let value = serde_json::to_vec(&event)?;
            if events.insert((wf, trig, sequence), value.as_slice())?.is_some() {
                return Err(StoreError::InvalidSequence {
                    stream: key.to_string(),
                    sequence,
                });
            }

            let meta = StreamMeta {
                last_sequence: sequence,
                expires_at: now.saturating_add(self.retention_millis()),
                purged: false,
            };
            counters.insert((wf, trig), serde_json::to_vec(&meta)?.as_slice())?;
            sequence
        };
        txn.commit()?;

        tracing::trace!(stream = %key, sequence, kind = event.kind(), "Event appended");
        Ok((sequence, event))
    }

    // ========== Reads ==========

    /// All events with `sequence >= from_sequence`, ascending
    ///
    /// Missing or expired streams yield an empty list.
    pub fn read_from(&self, key: &StreamKey, from_sequence: u64) -> StoreResult<Vec<Event>> {
        let (wf, trig) = (key.workflow_id(), key.trigger_id());
        let read_txn = self.db.begin_read()?;

        let counters = read_txn.open_table(COUNTERS_TABLE)?;
        let live = match counters.get((wf, trig))? {
            Some(guard) => serde_json::from_slice::<StreamMeta>(guard.value())?.is_live(now_millis()),
            None => false,
        };
        if !live {
            return Ok(Vec::new());
        }

        let table = read_txn.open_table(EVENTS_TABLE)?;
        let mut events = Vec::new();
        for result in table.range((wf, trig, from_sequence)..=(wf, trig, u64::MAX))? {
            let (_key, value) = result?;
            let event: Event = serde_json::from_slice(value.value())?;
            events.push(event);
        }
        Ok(events)
    }

    /// Last assigned sequence, `None` for unknown or expired streams
    pub fn current_sequence(&self, key: &StreamKey) -> StoreResult<Option<u64>> {
        Ok(match self.stream_status(key)? {
            StreamStatus::Active { last_sequence, .. } => Some(last_sequence),
            StreamStatus::Unknown | StreamStatus::Expired => None,
        })
    }

    pub fn stream_status(&self, key: &StreamKey) -> StoreResult<StreamStatus> {
        let read_txn = self.db.begin_read()?;
        let counters = read_txn.open_table(COUNTERS_TABLE)?;
        let Some(guard) = counters.get((key.workflow_id(), key.trigger_id()))? else {
            return Ok(StreamStatus::Unknown);
        };
        let meta: StreamMeta = serde_json::from_slice(guard.value())?;

        Ok(if meta.is_live(now_millis()) {
            StreamStatus::Active {
                last_sequence: meta.last_sequence,
                expires_at: meta.expires_at,
            }
        } else {
            StreamStatus::Expired
        })
    }

    // ========== Retention ==========

    /// Discard every expired stream
    ///
    /// Events go first; the counter record stays as a tombstone for one more
    /// retention window, then is removed too. Returns the number of streams
    /// whose history was discarded.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = now_millis();
        let retention = self.retention_millis();

        let txn = self.db.begin_write()?;
        let purged = {
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            let mut events = txn.open_table(EVENTS_TABLE)?;

            // Collect first (can't iterate and mutate simultaneously)
            let mut expired: Vec<(String, String, StreamMeta)> = Vec::new();
            for result in counters.iter()? {
                let (key, value) = result?;
                let meta: StreamMeta = serde_json::from_slice(value.value())?;
                if !meta.is_live(now) {
                    let (wf, trig) = key.value();
                    expired.push((wf.to_string(), trig.to_string(), meta));
                }
            }

            let mut purged = 0;
            for (wf, trig, meta) in expired {
                let (wf, trig) = (wf.as_str(), trig.as_str());
                if !meta.purged {
                    let removed = remove_stream_events(&mut events, wf, trig)?;
                    let tombstone = StreamMeta {
                        purged: true,
                        ..meta
                    };
                    counters.insert((wf, trig), serde_json::to_vec(&tombstone)?.as_slice())?;
                    tracing::debug!(workflow_id = wf, trigger_id = trig, removed, "Stream expired");
                    purged += 1;
                } else if meta.expires_at.saturating_add(retention) <= now {
                    counters.remove((wf, trig))?;
                }
            }
            purged
        };
        txn.commit()?;

        Ok(purged)
    }
}

/// Remove every event of one stream, returns the count
fn remove_stream_events(
    table: &mut Table<'_, (&'static str, &'static str, u64), &'static [u8]>,
    wf: &str,
    trig: &str,
) -> StoreResult<usize> {
    let sequences = table
        .range((wf, trig, 0u64)..=(wf, trig, u64::MAX))?
        .map(|result| result.map(|(key, _value)| key.value().2))
        .collect::<Result<Vec<u64>, _>>()?;

    for sequence in &sequences {
        table.remove((wf, trig, *sequence))?;
    }
    Ok(sequences.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::execution::{EventPayload, NodeLog, WorkflowCompleted};
    use std::collections::HashSet;

    const DAY: Duration = Duration::from_secs(86_400);

    fn key(wf: &str, trig: &str) -> StreamKey {
        StreamKey::new(wf, trig).unwrap()
    }

    fn log_event(key: &StreamKey, message: &str) -> Event {
        Event::new(
            key,
            "session-1",
            EventPayload::NodeLog(NodeLog {
                node_id: "n1".to_string(),
                level: Default::default(),
                message: message.to_string(),
            }),
        )
    }

    #[test]
    fn test_sequences_start_at_one() {
        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let k = key("w1", "t1");

        assert_eq!(store.current_sequence(&k).unwrap(), None);

        let (seq1, event1) = store.append(&k, log_event(&k, "a")).unwrap();
        let (seq2, _) = store.append(&k, log_event(&k, "b")).unwrap();

        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
        assert_eq!(event1.sequence, 1);
        assert!(event1.timestamp > 0);
        assert_eq!(store.current_sequence(&k).unwrap(), Some(2));
    }

    #[test]
    fn test_read_from_returns_suffix() {
        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let k = key("w1", "t1");
        for i in 0..5 {
            store.append(&k, log_event(&k, &format!("m{i}"))).unwrap();
        }

        let all = store.read_from(&k, 0).unwrap();
        assert_eq!(
            all.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let suffix = store.read_from(&k, 3).unwrap();
        assert_eq!(
            suffix.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );

        assert!(store.read_from(&k, 6).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_stream_reads_empty() {
        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let k = key("never", "created");

        assert!(store.read_from(&k, 0).unwrap().is_empty());
        assert_eq!(store.stream_status(&k).unwrap(), StreamStatus::Unknown);
    }

    #[test]
    fn test_streams_are_isolated() {
        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let a = key("w1", "t1");
        let b = key("w1", "t2");
        // "w1" + "t1x" must not fall inside the ("w1", "t1") range
        let c = key("w1", "t1x");

        store.append(&a, log_event(&a, "a1")).unwrap();
        store.append(&b, log_event(&b, "b1")).unwrap();
        store.append(&c, log_event(&c, "c1")).unwrap();
        store.append(&a, log_event(&a, "a2")).unwrap();

        let events = store.read_from(&a, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.trigger_id == "t1"));
        assert_eq!(store.current_sequence(&b).unwrap(), Some(1));
    }

    #[test]
    fn test_append_readdresses_event() {
        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let k = key("w1", "t1");
        let other = key("other", "stream");

        let (_, event) = store
            .append(
                &k,
                Event::new(
                    &other,
                    "s1",
                    EventPayload::WorkflowCompleted(WorkflowCompleted::default()),
                ),
            )
            .unwrap();

        assert_eq!(event.workflow_id, "w1");
        assert_eq!(event.trigger_id, "t1");
        assert!(store.read_from(&other, 0).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appenders_never_share_a_sequence() {
        const APPENDERS: usize = 8;
        const APPENDS: usize = 25;

        let store = EventLogStore::open_in_memory(DAY).unwrap();
        let k = key("w1", "t1");

        let handles: Vec<_> = (0..APPENDERS)
            .map(|n| {
                let store = store.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    (0..APPENDS)
                        .map(|m| {
                            store
                                .append(&k, log_event(&k, &format!("{n}-{m}")))
                                .unwrap()
                                .0
                        })
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut sequences = Vec::new();
        for handle in handles {
            sequences.extend(handle.join().unwrap());
        }

        let unique: HashSet<u64> = sequences.iter().copied().collect();
        assert_eq!(unique.len(), APPENDERS * APPENDS);

        // Single write transaction per append: also gap-free
        let expected: HashSet<u64> = (1..=(APPENDERS * APPENDS) as u64).collect();
        assert_eq!(unique, expected);

        let persisted = store.read_from(&k, 0).unwrap();
        assert_eq!(persisted.len(), APPENDERS * APPENDS);
        assert!(persisted.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_full_expiry() {
        let store = EventLogStore::open_in_memory(Duration::from_millis(50)).unwrap();
        let k = key("w1", "t1");
        store.append(&k, log_event(&k, "a")).unwrap();
        store.append(&k, log_event(&k, "b")).unwrap();

        std::thread::sleep(Duration::from_millis(120));

        assert!(store.read_from(&k, 0).unwrap().is_empty());
        assert_eq!(store.current_sequence(&k).unwrap(), None);
        assert_eq!(store.stream_status(&k).unwrap(), StreamStatus::Expired);

        // Reused key behaves as a fresh stream
        let (seq, _) = store.append(&k, log_event(&k, "c")).unwrap();
        assert_eq!(seq, 1);
        let events = store.read_from(&k, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 1);
    }

    #[test]
    fn test_sliding_expiry() {
        let store = EventLogStore::open_in_memory(Duration::from_millis(300)).unwrap();
        let k = key("w1", "t1");

        store.append(&k, log_event(&k, "a")).unwrap();
        std::thread::sleep(Duration::from_millis(180));
        store.append(&k, log_event(&k, "b")).unwrap();
        std::thread::sleep(Duration::from_millis(180));

        // 360ms after the first append, but only 180ms after the last
        assert_eq!(store.read_from(&k, 0).unwrap().len(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let store = EventLogStore::open_in_memory(Duration::from_millis(50)).unwrap();
        let expired = key("w1", "old");
        store.append(&expired, log_event(&expired, "a")).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        let live = key("w1", "new");
        store.append(&live, log_event(&live, "b")).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.stream_status(&expired).unwrap(), StreamStatus::Expired);
        assert!(matches!(
            store.stream_status(&live).unwrap(),
            StreamStatus::Active { last_sequence: 1, .. }
        ));

        // Already purged: nothing new to discard
        assert_eq!(store.purge_expired().unwrap(), 0);

        // Tombstone is forgotten after another retention window
        std::thread::sleep(Duration::from_millis(120));
        store.purge_expired().unwrap();
        assert_eq!(store.stream_status(&expired).unwrap(), StreamStatus::Unknown);
    }
}
