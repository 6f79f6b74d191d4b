//! Execution snapshot API 模块
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/workflows/{workflow_id}/executions | GET | 列出工作流的所有快照 |
//! | /api/workflows/{workflow_id}/executions/{trigger_id} | GET | 获取快照 |
//! | /api/workflows/{workflow_id}/executions/{trigger_id} | PUT | 覆盖快照 |

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/workflows/{workflow_id}/executions", get(handler::list))
        .route(
            "/api/workflows/{workflow_id}/executions/{trigger_id}",
            get(handler::get_by_key).put(handler::put),
        )
}
