//! SSE route over the full HTTP stack

mod common;

use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{completed, in_memory_state, key, log, start};
use stream_server::api::build_app;

const STREAM_URI: &str = "/api/workflows/w1/triggers/t1/stream";

async fn open(app: &axum::Router, uri: &str) -> http::Response<Body> {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn read_to_end(response: http::Response<Body>) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .unwrap()
        .unwrap()
        .to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_two_connections_receive_identical_frames() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let app = build_app(state.clone());
    let key = key("w1", "t1");

    let first = open(&app, STREAM_URI).await;
    let second = open(&app, STREAM_URI).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(state.bus.registry().subscriber_count(&key), 2);

    state.publisher.publish(&key, "s1", log("hello")).await.unwrap();
    state.publisher.publish(&key, "s1", completed()).await.unwrap();

    let (first, second) = tokio::join!(read_to_end(first), read_to_end(second));
    assert_eq!(first, second);

    assert!(first.starts_with("event: connected\n"));
    assert!(first.contains(r#""type":"connected""#));
    assert_eq!(first.matches("event: data\n").count(), 2);
    assert!(first.contains(r#""sequence":1"#));
    assert!(first.contains(r#""type":"workflow_completed""#));
    assert!(!first.contains("\nid:"));

    assert_eq!(state.bus.registry().subscriber_count(&key), 0);
    tasks.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_from_sequence_replays_history() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let app = build_app(state.clone());
    let key = key("w1", "t1");

    state.publisher.publish(&key, "s1", log("one")).await.unwrap();
    state.publisher.publish(&key, "s1", log("two")).await.unwrap();
    state.publisher.publish(&key, "s1", completed()).await.unwrap();

    let response = open(&app, &format!("{STREAM_URI}?fromSequence=2")).await;
    let body = read_to_end(response).await;

    assert_eq!(body.matches("event: data\n").count(), 2);
    assert!(!body.contains(r#""sequence":1,"#));
    assert!(body.contains(r#""sequence":2"#));
    assert!(body.contains(r#""sequence":3"#));

    tasks.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_invalid_key_is_rejected() {
    let state = in_memory_state();
    let app = build_app(state);

    let response = open(&app, "/api/workflows/w%3A1/triggers/t1/stream").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shutdown_closes_open_streams() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let app = build_app(state.clone());

    let response = open(&app, STREAM_URI).await;
    tasks.shutdown(Duration::from_secs(2)).await;

    let body = read_to_end(response).await;
    assert!(body.starts_with("event: connected\n"));
    assert!(!body.contains("event: data"));
}
