//! Shared types for the workflow streaming service
//!
//! Types used by both the execution engine (producer side) and the
//! stream server: stream keys, events, execution snapshots and the
//! bus message envelope.

pub mod execution;
pub mod message;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use execution::{Event, EventPayload, ExecutionSnapshot, NodeExecution, StreamKey};
pub use message::BusMessage;
