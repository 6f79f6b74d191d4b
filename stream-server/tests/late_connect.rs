//! A client that connects after events were produced catches up from the
//! log, then follows the live stream through topic and router.

mod common;

use std::time::Duration;

use common::{completed, in_memory_state, key, log, start};
use stream_server::gateway::{Frame, GatewaySession, ReplayPolicy};

async fn next_sequence(session: &mut GatewaySession) -> Option<u64> {
    match tokio::time::timeout(Duration::from_secs(5), session.next_frame())
        .await
        .unwrap()
    {
        Some(Frame::Event(event)) => Some(event.sequence),
        Some(Frame::Greeting(_)) => panic!("unexpected greeting"),
        None => None,
    }
}

#[tokio::test]
async fn test_late_client_reads_history_then_goes_live() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let key = key("w1", "t1");

    for message in ["a", "b", "c"] {
        state.publisher.publish(&key, "s1", log(message)).await.unwrap();
    }

    // Catch up from the log
    let history = state.event_log.read_from(&key, 0).unwrap();
    let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    // Live-only connection sees what comes next
    let mut session = GatewaySession::open(
        &state.bus,
        state.event_log.clone(),
        key.clone(),
        ReplayPolicy::LiveOnly,
        state.shutdown_token(),
    )
    .await
    .unwrap();
    assert!(matches!(session.next_frame().await, Some(Frame::Greeting(_))));

    state.publisher.publish(&key, "s1", completed()).await.unwrap();
    assert_eq!(next_sequence(&mut session).await, Some(4));
    assert_eq!(next_sequence(&mut session).await, None);

    drop(session);
    tasks.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_replay_from_last_seen_then_live_without_gap() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let key = key("w1", "t2");

    for message in ["a", "b", "c"] {
        state.publisher.publish(&key, "s1", log(message)).await.unwrap();
    }

    // Client saw sequence 1 before disconnecting
    let mut session = GatewaySession::open(
        &state.bus,
        state.event_log.clone(),
        key.clone(),
        ReplayPolicy::FromSequence(2),
        state.shutdown_token(),
    )
    .await
    .unwrap();
    session.next_frame().await;
    assert_eq!(next_sequence(&mut session).await, Some(2));
    assert_eq!(next_sequence(&mut session).await, Some(3));

    state.publisher.publish(&key, "s1", log("d")).await.unwrap();
    state.publisher.publish(&key, "s1", completed()).await.unwrap();
    assert_eq!(next_sequence(&mut session).await, Some(4));
    assert_eq!(next_sequence(&mut session).await, Some(5));
    assert_eq!(next_sequence(&mut session).await, None);

    drop(session);
    tasks.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_other_streams_are_not_delivered() {
    let state = in_memory_state();
    let tasks = start(&state).await;
    let watched = key("w1", "t1");
    let other = key("w1", "t10");

    let mut session = GatewaySession::open(
        &state.bus,
        state.event_log.clone(),
        watched.clone(),
        ReplayPolicy::LiveOnly,
        state.shutdown_token(),
    )
    .await
    .unwrap();
    session.next_frame().await;

    state.publisher.publish(&other, "s1", log("noise")).await.unwrap();
    state.publisher.publish(&watched, "s1", completed()).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(5), session.next_frame())
        .await
        .unwrap()
    {
        Some(Frame::Event(event)) => {
            assert_eq!(event.trigger_id, "t1");
            assert_eq!(event.sequence, 1);
        }
        other => panic!("expected event, got {other:?}"),
    }

    drop(session);
    tasks.shutdown(Duration::from_secs(2)).await;
}
