//! Workflow Execution Module
//!
//! Types shared between the execution engine (producer) and the streaming
//! service:
//! - Keys: `(workflow_id, trigger_id)` identifying one execution
//! - Events: Immutable facts emitted while the workflow runs
//! - Snapshots: Latest materialized execution state

pub mod event;
pub mod key;
pub mod snapshot;

// Re-exports
pub use event::{
    AgentNotification, Event, EventPayload, LogLevel, NodeCompleted, NodeFailed, NodeLog,
    NodeResult, NodeStarted, WorkflowCompleted, WorkflowFailed, WorkflowStarted, kind,
};
pub use key::{KeyError, StreamKey, validate_id};
pub use snapshot::{ExecutionSnapshot, NodeExecution};
