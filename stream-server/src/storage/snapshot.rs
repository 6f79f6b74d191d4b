//! Execution snapshot store
//!
//! One record per `(workflow_id, trigger_id)`, fully replaced on every write.
//! Retention is independent of the event log.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::execution::{ExecutionSnapshot, StreamKey, key::validate_id};
use shared::util::now_millis;
use std::sync::Arc;
use std::time::Duration;

use super::StoreResult;

/// key = (workflow_id, trigger_id), value = JSON-serialized SnapshotRecord
const SNAPSHOTS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("execution_snapshots");

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    expires_at: i64,
    snapshot: ExecutionSnapshot,
}

/// Snapshot store backed by redb
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
    retention: Duration,
}

impl SnapshotStore {
    pub fn new(db: Arc<Database>, retention: Duration) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SNAPSHOTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db, retention })
    }

    /// In-memory store (for testing)
    pub fn open_in_memory(retention: Duration) -> StoreResult<Self> {
        Self::new(super::open_in_memory()?, retention)
    }

    fn expires_at(&self, now: i64) -> i64 {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(retention)
    }

    /// Overwrite the snapshot for its execution (no merge)
    pub fn put(&self, snapshot: &ExecutionSnapshot) -> StoreResult<()> {
        let key = snapshot.stream_key()?;
        let record = SnapshotRecord {
            expires_at: self.expires_at(now_millis()),
            snapshot: snapshot.clone(),
        };
        let value = serde_json::to_vec(&record)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOTS_TABLE)?;
            table.insert((key.workflow_id(), key.trigger_id()), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// `None` when absent or expired
    pub fn get(&self, key: &StreamKey) -> StoreResult<Option<ExecutionSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SNAPSHOTS_TABLE)?;

        let Some(value) = table.get((key.workflow_id(), key.trigger_id()))? else {
            return Ok(None);
        };
        let record: SnapshotRecord = serde_json::from_slice(value.value())?;
        Ok((record.expires_at > now_millis()).then_some(record.snapshot))
    }

    /// Every live snapshot of one workflow, ordered by trigger id
    ///
    /// Reads one consistent view; writes committed after the scan starts are
    /// not observed.
    pub fn list_by_workflow(&self, workflow_id: &str) -> StoreResult<Vec<ExecutionSnapshot>> {
        validate_id("workflow_id", workflow_id)?;

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SNAPSHOTS_TABLE)?;
        let now = now_millis();

        let mut snapshots = Vec::new();
        for result in table.range((workflow_id, "")..)? {
            let (key, value) = result?;
            if key.value().0 != workflow_id {
                break;
            }
            let record: SnapshotRecord = serde_json::from_slice(value.value())?;
            if record.expires_at > now {
                snapshots.push(record.snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Remove expired snapshots, returns the count
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = now_millis();
        let txn = self.db.begin_write()?;
        let count = {
            let mut table = txn.open_table(SNAPSHOTS_TABLE)?;

            let mut expired: Vec<(String, String)> = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                let record: SnapshotRecord = serde_json::from_slice(value.value())?;
                if record.expires_at <= now {
                    let (wf, trig) = key.value();
                    expired.push((wf.to_string(), trig.to_string()));
                }
            }

            for (wf, trig) in &expired {
                table.remove((wf.as_str(), trig.as_str()))?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(count)
    }
}
