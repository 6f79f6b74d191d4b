//! 请求中间件
//!
//! Binds the request's correlation id for the duration of the handler and
//! echoes it on the response.

use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

use crate::correlation::{self, CORRELATION_HEADER};

/// 请求日志 + correlation 中间件
pub async fn correlation_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let correlation_id = correlation::from_headers(req.headers());

    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let mut response =
        correlation::with_correlation_id(correlation_id.clone(), next.run(req)).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    if status.is_server_error() {
        warn!(
            request_id = %request_id,
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            "Request failed"
        );
    } else {
        info!(
            request_id = %request_id,
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            "Request completed"
        );
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}
