//! Event stream API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use shared::execution::{Event, EventPayload, StreamKey};

use crate::core::ServerState;
use crate::storage::{StreamStatus, blocking};
use crate::utils::AppResult;

/// POST body: `{type, sessionId, data}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEventRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendEventResponse {
    pub sequence: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    #[serde(default)]
    pub from_sequence: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusResponse {
    pub workflow_id: String,
    pub trigger_id: String,
    #[serde(flatten)]
    pub status: StreamStatus,
}

/// POST /api/workflows/{workflow_id}/triggers/{trigger_id}/events - 追加事件
///
/// The correlation id bound by the request middleware travels to the bus.
pub async fn append(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Json(body): Json<AppendEventRequest>,
) -> AppResult<Json<AppendEventResponse>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    let event = state
        .publisher
        .publish(&key, body.session_id, body.payload)
        .await?;

    Ok(Json(AppendEventResponse {
        sequence: event.sequence,
    }))
}

/// GET /api/workflows/{workflow_id}/triggers/{trigger_id}/events - 读取事件
pub async fn list(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<Vec<Event>>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    let event_log = state.event_log.clone();
    let events = blocking(move || event_log.read_from(&key, query.from_sequence)).await?;
    Ok(Json(events))
}

/// GET /api/workflows/{workflow_id}/triggers/{trigger_id}/status - 流状态
pub async fn status(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
) -> AppResult<Json<StreamStatusResponse>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    let event_log = state.event_log.clone();
    let lookup = key.clone();
    let status = blocking(move || event_log.stream_status(&lookup)).await?;

    Ok(Json(StreamStatusResponse {
        workflow_id: key.workflow_id().to_string(),
        trigger_id: key.trigger_id().to_string(),
        status,
    }))
}
