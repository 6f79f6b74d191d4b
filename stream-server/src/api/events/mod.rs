//! Event stream API 模块
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/workflows/{workflow_id}/triggers/{trigger_id}/events | POST | 追加事件 |
//! | /api/workflows/{workflow_id}/triggers/{trigger_id}/events | GET | 读取事件 (`?fromSequence=N`) |
//! | /api/workflows/{workflow_id}/triggers/{trigger_id}/status | GET | 流状态 |

mod handler;

pub use handler::{AppendEventRequest, AppendEventResponse, EventsQuery, StreamStatusResponse};

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route(
            "/api/workflows/{workflow_id}/triggers/{trigger_id}/events",
            get(handler::list).post(handler::append),
        )
        .route(
            "/api/workflows/{workflow_id}/triggers/{trigger_id}/status",
            get(handler::status),
        )
}
