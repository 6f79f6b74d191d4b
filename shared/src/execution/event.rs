//! Workflow events - immutable facts emitted while an execution runs
//!
//! Wire shape (camelCase):
//!
//! ```json
//! {
//!   "type": "node_completed",
//!   "workflowId": "w1",
//!   "triggerId": "t1",
//!   "sessionId": "s1",
//!   "sequence": 3,
//!   "timestamp": 1718000000000,
//!   "data": { "nodeId": "summarize", "output": "...", "executionTimeMs": 812 }
//! }
//! ```
//!
//! Unknown `type` values are kept as [`EventPayload::Opaque`] so newer
//! producers never break older consumers.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::key::{KeyError, StreamKey};

/// Event type names as they appear on the wire
pub mod kind {
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
    pub const NODE_STARTED: &str = "node_started";
    pub const NODE_COMPLETED: &str = "node_completed";
    pub const NODE_FAILED: &str = "node_failed";
    pub const NODE_RESULT: &str = "node_result";
    pub const NODE_LOG: &str = "node_log";
    pub const AGENT_NOTIFICATION: &str = "agent_notification";
}

/// Workflow event - immutable once persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub workflow_id: String,
    pub trigger_id: String,
    pub session_id: String,
    /// Per-stream sequence, assigned by the event log at append time (0 = unassigned)
    #[serde(default)]
    pub sequence: u64,
    /// Server timestamp (Unix milliseconds), assigned at append time
    #[serde(default)]
    pub timestamp: i64,
    /// `type` + `data`
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Create an unsequenced event for a stream
    pub fn new(key: &StreamKey, session_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            workflow_id: key.workflow_id().to_string(),
            trigger_id: key.trigger_id().to_string(),
            session_id: session_id.into(),
            sequence: 0,
            timestamp: 0,
            payload,
        }
    }

    /// Stream this event belongs to
    pub fn stream_key(&self) -> Result<StreamKey, KeyError> {
        StreamKey::new(self.workflow_id.as_str(), self.trigger_id.as_str())
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Workflow completed or failed - nothing follows on this stream
    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}

// ========== Payloads ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStarted {
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCompleted {
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFailed {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStarted {
    pub node_id: String,
    #[serde(default)]
    pub inputs: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCompleted {
    pub node_id: String,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailed {
    pub node_id: String,
    pub error: String,
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Intermediate / streamed node output (e.g. LLM token chunks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub result: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLog {
    pub node_id: String,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
}

/// Event payload variants
///
/// Serialized as `{"type": ..., "data": ...}` and flattened into [`Event`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawPayload")]
pub enum EventPayload {
    // ========== Workflow ==========
    WorkflowStarted(WorkflowStarted),
    WorkflowCompleted(WorkflowCompleted),
    WorkflowFailed(WorkflowFailed),

    // ========== Node ==========
    NodeStarted(NodeStarted),
    NodeCompleted(NodeCompleted),
    NodeFailed(NodeFailed),
    NodeResult(NodeResult),
    NodeLog(NodeLog),

    // ========== Agent ==========
    AgentNotification(AgentNotification),

    /// Unknown kind, carried through untouched
    Opaque { kind: String, data: Value },
}

impl EventPayload {
    /// Wire name of this payload
    pub fn kind(&self) -> &str {
        match self {
            Self::WorkflowStarted(_) => kind::WORKFLOW_STARTED,
            Self::WorkflowCompleted(_) => kind::WORKFLOW_COMPLETED,
            Self::WorkflowFailed(_) => kind::WORKFLOW_FAILED,
            Self::NodeStarted(_) => kind::NODE_STARTED,
            Self::NodeCompleted(_) => kind::NODE_COMPLETED,
            Self::NodeFailed(_) => kind::NODE_FAILED,
            Self::NodeResult(_) => kind::NODE_RESULT,
            Self::NodeLog(_) => kind::NODE_LOG,
            Self::AgentNotification(_) => kind::AGENT_NOTIFICATION,
            Self::Opaque { kind, .. } => kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowCompleted(_) | Self::WorkflowFailed(_))
    }

    /// Node this payload refers to, if node-scoped
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted(p) => Some(&p.node_id),
            Self::NodeCompleted(p) => Some(&p.node_id),
            Self::NodeFailed(p) => Some(&p.node_id),
            Self::NodeResult(p) => Some(&p.node_id),
            Self::NodeLog(p) => Some(&p.node_id),
            Self::WorkflowFailed(p) => p.node_id.as_deref(),
            Self::AgentNotification(p) => p.node_id.as_deref(),
            Self::WorkflowStarted(_) | Self::WorkflowCompleted(_) | Self::Opaque { .. } => None,
        }
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EventPayload", 2)?;
        state.serialize_field("type", self.kind())?;
        match self {
            Self::WorkflowStarted(p) => state.serialize_field("data", p)?,
            Self::WorkflowCompleted(p) => state.serialize_field("data", p)?,
            Self::WorkflowFailed(p) => state.serialize_field("data", p)?,
            Self::NodeStarted(p) => state.serialize_field("data", p)?,
            Self::NodeCompleted(p) => state.serialize_field("data", p)?,
            Self::NodeFailed(p) => state.serialize_field("data", p)?,
            Self::NodeResult(p) => state.serialize_field("data", p)?,
            Self::NodeLog(p) => state.serialize_field("data", p)?,
            Self::AgentNotification(p) => state.serialize_field("data", p)?,
            Self::Opaque { data, .. } => state.serialize_field("data", data)?,
        }
        state.end()
    }
}

/// Untyped wire form used during deserialization
#[derive(Deserialize)]
struct RawPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Typed payload; a missing `data` reads as an empty object
fn typed<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    match data {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        data => serde_json::from_value(data),
    }
}

impl TryFrom<RawPayload> for EventPayload {
    type Error = serde_json::Error;

    fn try_from(raw: RawPayload) -> Result<Self, Self::Error> {
        let RawPayload { kind, data } = raw;
        let payload = match kind.as_str() {
            kind::WORKFLOW_STARTED => Self::WorkflowStarted(typed(data)?),
            kind::WORKFLOW_COMPLETED => Self::WorkflowCompleted(typed(data)?),
            kind::WORKFLOW_FAILED => Self::WorkflowFailed(typed(data)?),
            kind::NODE_STARTED => Self::NodeStarted(typed(data)?),
            kind::NODE_COMPLETED => Self::NodeCompleted(typed(data)?),
            kind::NODE_FAILED => Self::NodeFailed(typed(data)?),
            kind::NODE_RESULT => Self::NodeResult(typed(data)?),
            kind::NODE_LOG => Self::NodeLog(typed(data)?),
            kind::AGENT_NOTIFICATION => Self::AgentNotification(typed(data)?),
            _ => Self::Opaque { kind, data },
        };
        Ok(payload)
    }
}
