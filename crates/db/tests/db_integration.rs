//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `kaiwa_test`)
//!   `TEST_DB_PASSWORD` (default: `kaiwa_test`)
//!   `TEST_DB_NAME` (default: `kaiwa_test`)

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use kaiwa_db::entities::{message, user};
use kaiwa_db::repositories::{ConversationRepository, MessageRepository};
use kaiwa_db::test_utils::{TestDatabase, TestDbConfig};
use sea_orm::{ActiveModelTrait, Set};

async fn insert_user(db: &TestDatabase, username: &str) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        avatar_url: Set(None),
        created_at: Set(Utc::now().into()),
        ..Default::default()
    }
    .insert(db.connection())
    .await
    .unwrap()
}

async fn insert_message(
    messages: &MessageRepository,
    conversation_id: i64,
    sender_id: i64,
    content: &str,
) -> message::Model {
    messages
        .create(message::ActiveModel {
            conversation_id: Set(conversation_id),
            sender_id: Set(sender_id),
            content: Set(content.to_string()),
            parent_message_id: Set(None),
            is_recalled: Set(false),
            recalled_at: Set(None),
            recalled_by: Set(None),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(!config.username.is_empty());
    assert!(!config.database.is_empty());
}

#[test]
fn test_database_url_format() {
    let config = TestDbConfig {
        host: "testhost".to_string(),
        port: 5432,
        username: "testuser".to_string(),
        password: "testpass".to_string(),
        database: "testdb".to_string(),
    };

    let url = config.database_url();
    assert!(url.starts_with("postgres://"));
    assert!(url.contains("testhost"));
    assert!(url.contains("testdb"));
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_private_conversation_unique_per_pair() {
    let db = TestDatabase::create_unique().await.unwrap();
    let conn = db.connection_arc();
    let conversations = ConversationRepository::new(conn);

    let alice = insert_user(&db, "alice").await;
    let bob = insert_user(&db, "bob").await;

    let conv = conversations.create_private(alice.id, bob.id).await.unwrap();

    // Lookup is direction-independent
    let found = conversations
        .find_private_between(bob.id, alice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, conv.id);

    // A second row for the same pair violates the partial unique index
    let dup = conversations.create_private(bob.id, alice.id).await;
    assert!(dup.is_err());

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_participant_removal_keeps_history() {
    let db = TestDatabase::create_unique().await.unwrap();
    let conn = db.connection_arc();
    let conversations = ConversationRepository::new(conn.clone());
    let messages = MessageRepository::new(conn);

    let alice = insert_user(&db, "alice").await;
    let bob = insert_user(&db, "bob").await;

    let conv = conversations.create_private(alice.id, bob.id).await.unwrap();
    insert_message(&messages, conv.id, alice.id, "hi").await;

    let removed = conversations
        .remove_participant(conv.id, bob.id)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    // The conversation and its messages survive
    assert!(conversations.find_by_id(conv.id).await.unwrap().is_some());
    assert_eq!(messages.count_after(conv.id, None).await.unwrap(), 1);
    assert_eq!(conversations.participants(conv.id).await.unwrap().len(), 1);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_read_mark_advances_and_unread_counts() {
    let db = TestDatabase::create_unique().await.unwrap();
    let conn = db.connection_arc();
    let conversations = ConversationRepository::new(conn.clone());
    let messages = MessageRepository::new(conn);

    let alice = insert_user(&db, "alice").await;
    let bob = insert_user(&db, "bob").await;

    let conv = conversations.create_private(alice.id, bob.id).await.unwrap();

    let mut last_id = 0;
    for i in 0..5 {
        last_id = insert_message(&messages, conv.id, alice.id, &format!("msg {i}"))
            .await
            .id;
    }

    // Never-read participant counts every message as unread
    let participant = conversations
        .find_participant(conv.id, bob.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.read_up_to_message_id, None);
    assert_eq!(messages.count_after(conv.id, None).await.unwrap(), 5);

    // Marking read zeroes the count
    let updated = conversations
        .set_read_up_to(conv.id, bob.id, last_id)
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(messages.count_after(conv.id, Some(last_id)).await.unwrap(), 0);

    // A second identical call changes nothing
    let updated = conversations
        .set_read_up_to(conv.id, bob.id, last_id)
        .await
        .unwrap();
    assert_eq!(updated, 0);

    // The mark never moves backwards
    let updated = conversations
        .set_read_up_to(conv.id, bob.id, last_id - 1)
        .await
        .unwrap();
    assert_eq!(updated, 0);

    db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_message_page_newest_first() {
    let db = TestDatabase::create_unique().await.unwrap();
    let conn = db.connection_arc();
    let conversations = ConversationRepository::new(conn.clone());
    let messages = MessageRepository::new(conn);

    let alice = insert_user(&db, "alice").await;
    let bob = insert_user(&db, "bob").await;

    let conv = conversations.create_private(alice.id, bob.id).await.unwrap();
    for i in 0..25 {
        insert_message(&messages, conv.id, alice.id, &format!("msg {i}")).await;
    }

    let page = messages.find_page(conv.id, 1, 20).await.unwrap();
    assert_eq!(page.messages.len(), 20);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.total_pages, 2);
    assert!(page.messages[0].id > page.messages[19].id);

    // Out-of-range pages clamp to the last page
    let page = messages.find_page(conv.id, 99, 20).await.unwrap();
    assert_eq!(page.current_page, 2);
    assert_eq!(page.messages.len(), 5);

    db.drop_database().await.unwrap();
}
