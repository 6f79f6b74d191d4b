//! Correlation id propagation across async boundaries
//!
//! The id lives in task-local storage, so it follows the tokio task even
//! when it migrates between worker threads. It crosses the producer → topic →
//! router hop in [`BusMessage`] metadata and is rebound on the consuming side.

use http::HeaderMap;
use shared::message::BusMessage;

/// Request header carrying a caller-supplied correlation id
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Prefix of ids generated when none is bound
pub const GENERATED_PREFIX: &str = "gen-";

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// Fresh `gen-` prefixed id
pub fn generate() -> String {
    format!("{GENERATED_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Run `future` with `id` bound as the current correlation id
///
/// An empty id is replaced by a generated one.
pub async fn with_correlation_id<F>(id: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    let id = id.into();
    let id = if id.is_empty() { generate() } else { id };
    CORRELATION_ID.scope(id, future).await
}

/// The bound id, or a freshly generated one. Never empty.
pub fn correlation_id() -> String {
    current().unwrap_or_else(generate)
}

/// The bound id, if any
pub fn current() -> Option<String> {
    CORRELATION_ID
        .try_with(Clone::clone)
        .ok()
        .filter(|id| !id.is_empty())
}

/// Id carried by a bus message, or a generated one
pub fn from_message(message: &BusMessage) -> String {
    message
        .correlation_id()
        .map(str::to_string)
        .unwrap_or_else(generate)
}

/// Id from the `x-correlation-id` header, or a generated one
pub fn from_headers(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generate)
}
