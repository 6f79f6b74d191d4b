//! Streaming gateway - SSE 实时推送
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/workflows/{workflow_id}/triggers/{trigger_id}/stream | GET | SSE 事件流 |
//!
//! # 帧格式
//!
//! ```text
//! event: connected
//! data: {"type":"connected","workflowId":"w1","triggerId":"t1"}
//!
//! event: data
//! data: {"workflowId":"w1","triggerId":"t1","sessionId":"s1","sequence":3,...}
//! ```
//!
//! `?fromSequence=N` replays history from `N` before going live; events
//! below `N` are never sent. A failed history read answers 500 before the
//! stream starts.

pub mod session;

pub use session::{Frame, GatewaySession, Greeting, ReplayPolicy};

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use futures::{Stream, StreamExt, future, stream};
use serde::Deserialize;
use shared::execution::StreamKey;
use std::convert::Infallible;

use crate::core::ServerState;
use crate::utils::AppResult;

/// SSE event name for event frames
pub const DATA_EVENT: &str = "data";

/// SSE event name for the greeting
pub const CONNECTED_EVENT: &str = "connected";

pub fn router() -> Router<ServerState> {
    Router::new().route(
        "/api/workflows/{workflow_id}/triggers/{trigger_id}/stream",
        get(stream_events),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub from_sequence: Option<u64>,
}

/// GET /api/workflows/{workflow_id}/triggers/{trigger_id}/stream
async fn stream_events(
    State(state): State<ServerState>,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let key = StreamKey::new(workflow_id, trigger_id)?;
    let session = GatewaySession::open(
        &state.bus,
        state.event_log.clone(),
        key,
        ReplayPolicy::from(query.from_sequence),
        state.shutdown_token(),
    )
    .await?;

    Ok(Sse::new(into_stream(session)).keep_alive(KeepAlive::default()))
}

/// Drive a session as an SSE stream; the session is dropped with the stream
pub fn into_stream(session: GatewaySession) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream::unfold(session, |mut session| async move {
        let frame = session.next_frame().await?;
        Some((frame, session))
    })
    .filter_map(|frame| {
        future::ready(match render(&frame) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode SSE frame");
                None
            }
        })
    })
}

/// One frame → one SSE event
pub fn render(frame: &Frame) -> Result<SseEvent, axum::Error> {
    match frame {
        Frame::Greeting(greeting) => SseEvent::default()
            .event(CONNECTED_EVENT)
            .json_data(greeting),
        Frame::Event(event) => SseEvent::default()
            .event(DATA_EVENT)
            .json_data(event.as_ref()),
    }
}
