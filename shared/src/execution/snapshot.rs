//! Execution snapshot - latest materialized state of one execution
//!
//! Written by the producer as nodes complete (last write wins, no history).
//! Distinct from the immutable event stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::key::{KeyError, StreamKey};

/// Result of a single node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Execution snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub workflow_id: String,
    pub session_id: String,
    pub trigger_id: String,
    #[serde(default)]
    pub workflow_inputs: Value,
    /// node_id -> result
    #[serde(default)]
    pub node_executions: BTreeMap<String, NodeExecution>,
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub all_nodes: Vec<String>,
}

impl ExecutionSnapshot {
    /// Create an empty snapshot for an execution
    pub fn new(key: &StreamKey, session_id: impl Into<String>) -> Self {
        Self {
            workflow_id: key.workflow_id().to_string(),
            session_id: session_id.into(),
            trigger_id: key.trigger_id().to_string(),
            workflow_inputs: Value::Null,
            node_executions: BTreeMap::new(),
            completed_nodes: Vec::new(),
            all_nodes: Vec::new(),
        }
    }

    pub fn stream_key(&self) -> Result<StreamKey, KeyError> {
        StreamKey::new(self.workflow_id.as_str(), self.trigger_id.as_str())
    }

    /// Record a finished node (replaces any earlier result for the same node)
    pub fn record_node(&mut self, execution: NodeExecution) {
        if !self.completed_nodes.contains(&execution.id) {
            self.completed_nodes.push(execution.id.clone());
        }
        self.node_executions.insert(execution.id.clone(), execution);
    }

    /// `(completed, total)`
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .all_nodes
            .iter()
            .filter(|id| self.completed_nodes.contains(id))
            .count();
        (completed, self.all_nodes.len())
    }

    /// Every declared node has completed
    pub fn is_complete(&self) -> bool {
        let (completed, total) = self.progress();
        total > 0 && completed == total
    }
}
