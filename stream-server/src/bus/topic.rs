//! Durable topic - redb-backed message log with consumer groups
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `topic_messages` | `offset` | `BusMessage` | Append-only message log |
//! | `topic_group_offsets` | `group` | `u64` | Last acknowledged offset per group |
//! | `topic_head` | `"last_offset"` | `u64` | Highest offset ever assigned (survives trims) |
//! | `topic_dead_letters` | `id` | `DeadLetterEntry` | Messages whose handlers failed |
//!
//! Offsets start at 1. A group resumes after its last acknowledged offset
//! when the process restarts. Inside one process, consumers of the same group
//! share an in-memory cursor, so no message is handed to two of them.

use dashmap::DashMap;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::message::BusMessage;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::storage::StoreResult;

/// key = offset, value = JSON-serialized BusMessage
const MESSAGES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("topic_messages");

/// key = consumer group, value = last acknowledged offset
const OFFSETS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("topic_group_offsets");

/// key = "last_offset", value = highest offset ever assigned
const HEAD_TABLE: TableDefinition<&str, u64> = TableDefinition::new("topic_head");

const LAST_OFFSET_KEY: &str = "last_offset";

/// key = dead letter id, value = JSON-serialized DeadLetterEntry
const DEAD_LETTERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("topic_dead_letters");

/// A message handed to one consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub offset: u64,
    pub message: BusMessage,
}

/// Dead letter entry (handler failed permanently)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub offset: u64,
    pub group: String,
    pub handler: String,
    pub error: String,
    pub failed_at: i64,
    pub message: BusMessage,
}

/// Durable topic backed by redb
pub struct DurableTopic {
    db: Arc<Database>,
    /// Wakes consumers waiting in [`DurableTopic::next`]
    notify: Notify,
    /// group -> next offset to hand out
    cursors: DashMap<String, u64>,
}

impl DurableTopic {
    pub fn new(db: Arc<Database>) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(OFFSETS_TABLE)?;
            let _ = write_txn.open_table(HEAD_TABLE)?;
            let _ = write_txn.open_table(DEAD_LETTERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            notify: Notify::new(),
            cursors: DashMap::new(),
        })
    }

    /// In-memory topic (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::new(crate::storage::open_in_memory()?)
    }

    // ========== Producer ==========

    /// Append a message, returns its offset
    pub fn publish(&self, message: &BusMessage) -> StoreResult<u64> {
        let value = serde_json::to_vec(message)?;

        let txn = self.db.begin_write()?;
        let offset = {
            let mut head = txn.open_table(HEAD_TABLE)?;
            let offset = head
                .get(LAST_OFFSET_KEY)?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;
            head.insert(LAST_OFFSET_KEY, offset)?;

            let mut table = txn.open_table(MESSAGES_TABLE)?;
            table.insert(offset, value.as_slice())?;
            offset
        };
        txn.commit()?;

        self.notify.notify_waiters();
        Ok(offset)
    }

    // ========== Consumer ==========

    /// Wait for the next message of `group`
    ///
    /// Returns `Ok(None)` once `shutdown` fires.
    pub async fn next(
        &self,
        group: &str,
        shutdown: &CancellationToken,
    ) -> StoreResult<Option<Delivery>> {
        loop {
            // Register interest before checking, so a publish between the
            // check and the await is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some((offset, bytes)) = self.claim(group)? {
                match serde_json::from_slice::<BusMessage>(&bytes) {
                    Ok(message) => return Ok(Some(Delivery { offset, message })),
                    Err(e) => {
                        tracing::error!(group, offset, error = %e, "Undecodable topic message skipped");
                        self.ack(group, offset)?;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = &mut notified => {}
            }
        }
    }

    /// Hand out the first message past the group's cursor
    fn claim(&self, group: &str) -> StoreResult<Option<(u64, Vec<u8>)>> {
        let mut cursor = self
            .cursors
            .entry(group.to_string())
            .or_try_insert_with(|| self.committed_offset(group).map(|acked| acked.unwrap_or(0) + 1))?;

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        let mut range = table.range(*cursor..)?;
        let Some(entry) = range.next() else {
            return Ok(None);
        };
        let (key, value) = entry?;
        let offset = key.value();
        *cursor = offset + 1;
        Ok(Some((offset, value.value().to_vec())))
    }

    /// Record `offset` as processed for `group`
    ///
    /// The persisted offset only moves forward.
    pub fn ack(&self, group: &str, offset: u64) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(OFFSETS_TABLE)?;
            let current = table.get(group)?.map(|guard| guard.value()).unwrap_or(0);
            if offset > current {
                table.insert(group, offset)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Last acknowledged offset of a group
    pub fn committed_offset(&self, group: &str) -> StoreResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OFFSETS_TABLE)?;
        Ok(table.get(group)?.map(|guard| guard.value()))
    }

    /// Drop messages every known group has acknowledged, returns the count
    pub fn trim_acknowledged(&self) -> StoreResult<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let offsets = txn.open_table(OFFSETS_TABLE)?;
            let mut low_watermark: Option<u64> = None;
            for result in offsets.iter()? {
                let (_group, acked) = result?;
                let acked = acked.value();
                low_watermark = Some(low_watermark.map_or(acked, |low| low.min(acked)));
            }
            drop(offsets);

            let Some(low_watermark) = low_watermark else {
                return Ok(0);
            };

            let mut messages = txn.open_table(MESSAGES_TABLE)?;
            let stale = messages
                .range(..=low_watermark)?
                .map(|result| result.map(|(key, _)| key.value()))
                .collect::<Result<Vec<u64>, _>>()?;
            for offset in &stale {
                messages.remove(*offset)?;
            }
            stale.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    // ========== Dead Letters ==========

    /// Persist a dead letter, returns its id
    pub fn dead_letter(&self, entry: &DeadLetterEntry) -> StoreResult<u64> {
        let value = serde_json::to_vec(entry)?;

        let txn = self.db.begin_write()?;
        let id = {
            let mut table = txn.open_table(DEAD_LETTERS_TABLE)?;
            let id = table.last()?.map(|(key, _)| key.value()).unwrap_or(0) + 1;
            table.insert(id, value.as_slice())?;
            id
        };
        txn.commit()?;
        Ok(id)
    }

    /// All dead letters with their ids
    pub fn dead_letters(&self) -> StoreResult<Vec<(u64, DeadLetterEntry)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTERS_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let entry: DeadLetterEntry = serde_json::from_slice(value.value())?;
            entries.push((key.value(), entry));
        }
        Ok(entries)
    }

    /// Remove a dead letter (after manual recovery), returns whether it existed
    pub fn remove_dead_letter(&self, id: u64) -> StoreResult<bool> {
        let txn = self.db.begin_write()?;
        let existed = {
            let mut table = txn.open_table(DEAD_LETTERS_TABLE)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(existed)
    }
}
