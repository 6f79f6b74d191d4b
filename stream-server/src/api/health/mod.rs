//! 健康检查路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /health | GET | 简单健康检查 |
//! | /health/detailed | GET | 详细健康检查 |
//!
//! # 响应示例
//!
//! ```json
//! {
//!   "status": "ok",
//!   "version": "0.1.0",
//!   "router": "running"
//! }
//! ```

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::bus::RouterState;
use crate::core::ServerState;
use crate::storage::blocking;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(detailed_health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    /// 状态 (ok | degraded)
    status: &'static str,
    version: &'static str,
    router: String,
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    status: &'static str,
    version: &'static str,
    /// 运行时间 (秒)
    uptime_seconds: u64,
    checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    router: RouterCheck,
    gateway: GatewayCheck,
}

#[derive(Serialize)]
pub struct RouterCheck {
    state: String,
    consumer_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    committed_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dead_letters: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct GatewayCheck {
    streams: usize,
    connections: usize,
}

fn status_of(router: RouterState) -> &'static str {
    if router == RouterState::Running {
        "ok"
    } else {
        "degraded"
    }
}

/// GET /health
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let router = state.bus.router().state();
    Json(HealthResponse {
        status: status_of(router),
        version: env!("CARGO_PKG_VERSION"),
        router: router.to_string(),
    })
}

/// GET /health/detailed
async fn detailed_health(State(state): State<ServerState>) -> Json<DetailedHealthResponse> {
    let router_state = state.bus.router().state();
    let group = state.bus.router().group().to_string();
    let topic = state.bus.topic().clone();

    let lookup_group = group.clone();
    let check = blocking(move || {
        Ok((
            topic.committed_offset(&lookup_group)?,
            topic.dead_letters()?.len(),
        ))
    })
    .await;

    let router = match check {
        Ok((committed_offset, dead_letters)) => RouterCheck {
            state: router_state.to_string(),
            consumer_group: group,
            committed_offset,
            dead_letters: Some(dead_letters),
            error: None,
        },
        Err(e) => RouterCheck {
            state: router_state.to_string(),
            consumer_group: group,
            committed_offset: None,
            dead_letters: None,
            error: Some(e.to_string()),
        },
    };
    let status = if router.error.is_some() {
        "degraded"
    } else {
        status_of(router_state)
    };

    let registry = state.bus.registry();
    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        checks: HealthChecks {
            router,
            gateway: GatewayCheck {
                streams: registry.stream_count(),
                connections: registry.total_subscribers(),
            },
        },
    })
}
