//! Execution snapshot API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use shared::execution::{ExecutionSnapshot, StreamKey, validate_id};

use crate::core::ServerState;
use crate::storage::blocking;
use crate::utils::{AppError, AppResult};

/// GET /api/workflows/{workflow_id}/executions - 列出快照
pub async fn list(
    State(state): State<ServerState>,
    Path(workflow_id): Path<String>,
) -> AppResult<Json<Vec<ExecutionSnapshot>>> {
    validate_id("workflow_id", &workflow_id)?;
    let snapshots = state.snapshots.clone();
    let list = blocking(move || snapshots.list_by_workflow(&workflow_id)).await?;
    Ok(Json(list))
}

/// GET /api/workflows/{workflow_id}/executions/{trigger_id} - 获取快照
pub async fn get_by_key(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
) -> AppResult<Json<ExecutionSnapshot>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    let snapshots = state.snapshots.clone();
    let lookup = key.clone();
    let snapshot = blocking(move || snapshots.get(&lookup))
        .await?
        .ok_or_else(|| AppError::not_found(format!("Execution {} not found", key)))?;
    Ok(Json(snapshot))
}

/// PUT /api/workflows/{workflow_id}/executions/{trigger_id} - 覆盖快照
pub async fn put(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Json(snapshot): Json<ExecutionSnapshot>,
) -> AppResult<Json<ExecutionSnapshot>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    if snapshot.stream_key()? != key {
        return Err(AppError::validation(format!(
            "Snapshot belongs to {}:{}, not {}",
            snapshot.workflow_id, snapshot.trigger_id, key
        )));
    }

    state.publisher.put_snapshot(snapshot.clone()).await?;
    tracing::debug!(stream = %key, nodes = snapshot.node_executions.len(), "Snapshot stored");
    Ok(Json(snapshot))
}
