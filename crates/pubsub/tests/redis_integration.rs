//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_REDIS_URL` (default: redis://localhost:6380)

#![allow(clippy::unwrap_used)]

use kaiwa_core::services::broadcast::{ChatEvent, Group, GroupBroadcast, MessagePayload};
use kaiwa_pubsub::RedisGroupBroadcast;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6380".to_string())
}

fn payload(conversation_id: i64) -> MessagePayload {
    MessagePayload {
        id: 1,
        conversation_id,
        sender_id: 1,
        sender_username: "alice".to_string(),
        parent_id: 0,
        content: "hello over redis".to_string(),
        timestamp_ms: 1_700_000_000_000,
        is_recalled: false,
    }
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_publish_reaches_subscribed_group() {
    let broadcast = RedisGroupBroadcast::new(&redis_url(), "kaiwa_test")
        .await
        .unwrap();
    broadcast.start();

    let group = Group::Room(7);
    broadcast.subscribe(&group).await.unwrap();
    let mut rx = broadcast.events();

    // Subscription propagation is asynchronous
    tokio::time::sleep(Duration::from_millis(100)).await;

    let event = ChatEvent::Message {
        payload: payload(7),
    };
    broadcast.publish(&group, &event).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.0, group);
    assert_eq!(received.1, event);

    broadcast.unsubscribe(&group).await.unwrap();
    broadcast.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_unsubscribe_never_subscribed_is_idempotent() {
    let broadcast = RedisGroupBroadcast::new(&redis_url(), "kaiwa_test")
        .await
        .unwrap();

    // Must not error even though the group was never joined
    broadcast.unsubscribe(&Group::Inbox(999)).await.unwrap();
    broadcast.unsubscribe(&Group::Inbox(999)).await.unwrap();

    broadcast.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_shared_group_survives_one_unsubscribe() {
    let broadcast = RedisGroupBroadcast::new(&redis_url(), "kaiwa_test")
        .await
        .unwrap();
    broadcast.start();

    // Two connections of the same user share the inbox group
    let group = Group::Inbox(42);
    broadcast.subscribe(&group).await.unwrap();
    broadcast.subscribe(&group).await.unwrap();
    broadcast.unsubscribe(&group).await.unwrap();

    let mut rx = broadcast.events();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let event = ChatEvent::Blocked {
        reason: "still listening".to_string(),
    };
    broadcast.publish(&group, &event).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.0, group);

    broadcast.unsubscribe(&group).await.unwrap();
    broadcast.shutdown().await.unwrap();
}
