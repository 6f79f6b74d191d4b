#![allow(dead_code)]

use std::time::Duration;

use shared::execution::{EventPayload, NodeLog, StreamKey, WorkflowCompleted};
use stream_server::bus::RouterState;
use stream_server::core::BackgroundTasks;
use stream_server::{Config, ServerState};

pub fn config(work_dir: &str) -> Config {
    Config::with_overrides(work_dir, 0)
}

pub fn in_memory_state() -> ServerState {
    ServerState::in_memory(config("/tmp/stream-server-tests")).unwrap()
}

/// Start the router and wait until it consumes
pub async fn start(state: &ServerState) -> BackgroundTasks {
    let tasks = state.start_background_tasks();
    let mut watch = state.bus.router().watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| *s == RouterState::Running),
    )
    .await
    .unwrap()
    .unwrap();
    tasks
}

pub fn key(workflow_id: &str, trigger_id: &str) -> StreamKey {
    StreamKey::new(workflow_id, trigger_id).unwrap()
}

pub fn log(message: &str) -> EventPayload {
    EventPayload::NodeLog(NodeLog {
        node_id: "n1".to_string(),
        level: Default::default(),
        message: message.to_string(),
    })
}

pub fn completed() -> EventPayload {
    EventPayload::WorkflowCompleted(WorkflowCompleted::default())
}
