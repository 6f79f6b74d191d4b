//! redb-backed persistence for execution streams
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `stream_events` | `(workflow_id, trigger_id, sequence)` | `Event` | Ordered event collection |
//! | `stream_counters` | `(workflow_id, trigger_id)` | `StreamMeta` | Sequence counter + shared expiry |
//! | `execution_snapshots` | `(workflow_id, trigger_id)` | `SnapshotRecord` | Latest execution state |
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate` by default: a record is
//! persistent once `commit()` returns. Write transactions are serialized by
//! redb, which is the only synchronization the sequencer relies on.

pub mod event_log;
pub mod snapshot;

pub use event_log::{EventLogStore, StreamStatus};
pub use snapshot::SnapshotStore;

use redb::Database;
use shared::execution::KeyError;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] redb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid sequence {sequence} for stream {stream}")]
    InvalidSequence { stream: String, sequence: u64 },

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Storage task failed: {0}")]
    Task(String),
}

macro_rules! unavailable_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for StoreError {
                fn from(err: $err) -> Self {
                    StoreError::Unavailable(err.into())
                }
            }
        )*
    };
}

unavailable_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Open or create a database file
pub fn open_database(path: impl AsRef<Path>) -> StoreResult<Arc<Database>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(redb::Error::Io(e)))?;
    }
    Ok(Arc::new(Database::create(path)?))
}

/// Open an in-memory database (tests and ephemeral deployments)
pub fn open_in_memory() -> StoreResult<Arc<Database>> {
    let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
    Ok(Arc::new(db))
}

/// Run a blocking store call off the async runtime
pub async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
