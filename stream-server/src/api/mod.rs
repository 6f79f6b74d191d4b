//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`events`] - 事件流追加 / 读取 / 状态
//! - [`executions`] - 执行快照
//! - [`bus`] - 死信管理
//! - [`crate::gateway`] - SSE 实时推送

pub mod bus;
pub mod events;
pub mod executions;
pub mod health;
pub mod middleware;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware as axum_middleware;
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::core::ServerState;

// Re-export common types for handlers
pub use crate::utils::{AppError, AppResult};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Custom request ID generator
#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Slow request/response handlers answer 408
fn timeout_layer(request_timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)
}

/// Build a router with all routes registered (no middleware, no state)
///
/// Request/response routes get `request_timeout`; the SSE route does not.
pub fn build_router(request_timeout: Duration) -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(events::router())
        .merge(executions::router())
        .merge(bus::router())
        .layer(timeout_layer(request_timeout))
        .merge(crate::gateway::router())
}

/// Build a fully configured application with all middleware and state
pub fn build_app(state: ServerState) -> Router {
    let request_timeout = Duration::from_millis(state.config.request_timeout_ms);

    build_router(request_timeout)
        // ========== Tower HTTP Middleware ==========
        // CORS - Handle cross-origin requests
        .layer(CorsLayer::permissive())
        // Request logging + correlation binding
        .layer(axum_middleware::from_fn(middleware::correlation_middleware))
        // Trace - Request tracing
        .layer(TraceLayer::new_for_http())
        // Request ID - Generate unique ID for each request
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID_HEADER),
            XRequestId,
        ))
        // Propagate request ID to response
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        .with_state(state)
}
