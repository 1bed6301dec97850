//! Message endpoints.
//!
//! The send endpoint runs through the same fanout coordinator as the
//! live WebSocket path, so HTTP sends reach subscribed sessions too.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{DateTime, FixedOffset};
use kaiwa_common::AppResult;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create messages router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_messages))
        .route("/send", post(send_message))
        .route("/mark-read", post(mark_as_read))
        .route("/{id}/recall", post(recall_message))
}

/// One message in a history page.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub timestamp: DateTime<FixedOffset>,
    pub parent_message_id: Option<i64>,
    pub is_recalled: bool,
}

impl From<kaiwa_db::entities::message::Model> for MessageResponse {
    fn from(msg: kaiwa_db::entities::message::Model) -> Self {
        Self {
            message_id: msg.id,
            sender_id: msg.sender_id,
            content: msg.content,
            timestamp: msg.created_at,
            parent_message_id: msg.parent_message_id,
            is_recalled: msg.is_recalled,
        }
    }
}

/// History query.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub conversation_id: i64,
    #[serde(default = "default_page")]
    pub page: u64,
}

const fn default_page() -> u64 {
    1
}

/// History page response.
#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
    pub current_page: u64,
    pub total_pages: u64,
    pub has_next: bool,
}

/// One page of conversation history, newest first.
async fn list_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<ApiResponse<MessageListResponse>> {
    let page = state
        .conversation_service
        .history(query.conversation_id, user.id, query.page)
        .await?;

    Ok(ApiResponse::ok(MessageListResponse {
        messages: page.messages.into_iter().map(MessageResponse::from).collect(),
        current_page: page.current_page,
        total_pages: page.total_pages,
        has_next: page.current_page < page.total_pages,
    }))
}

/// Send message body.
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageBody {
    pub conversation_id: i64,
    #[validate(length(min = 1, max = 20000))]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// Sent message response.
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: i64,
    pub timestamp: DateTime<FixedOffset>,
}

/// Persist a message and fan it out to the room and inbox groups.
async fn send_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> AppResult<ApiResponse<SendMessageResponse>> {
    body.validate()?;

    info!(
        sender = user.id,
        conversation_id = body.conversation_id,
        "Sending message"
    );

    let message = state
        .chat_service
        .send(body.conversation_id, user.id, &body.content, body.parent_id)
        .await?;

    Ok(ApiResponse::ok(SendMessageResponse {
        message_id: message.id,
        timestamp: message.created_at,
    }))
}

/// Mark-read body.
#[derive(Debug, Deserialize)]
pub struct MarkReadBody {
    pub conversation_id: i64,
}

/// Advance the caller's read high-water mark to the newest message.
async fn mark_as_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MarkReadBody>,
) -> AppResult<ApiResponse<()>> {
    state
        .conversation_service
        .mark_read(body.conversation_id, user.id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Recall a message (sender only).
async fn recall_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> AppResult<ApiResponse<()>> {
    info!(user = user.id, message_id, "Recalling message");

    state.chat_service.recall(message_id, user.id).await?;

    Ok(ApiResponse::ok(()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_message_response_serialization() {
        let response = MessageResponse {
            message_id: 10,
            sender_id: 1,
            content: "hi".to_string(),
            timestamp: Utc::now().into(),
            parent_message_id: None,
            is_recalled: false,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"message_id\":10"));
        assert!(json.contains("\"is_recalled\":false"));
    }

    #[test]
    fn test_send_body_validation() {
        let body = SendMessageBody {
            conversation_id: 7,
            content: String::new(),
            parent_id: None,
        };
        assert!(body.validate().is_err());

        let body = SendMessageBody {
            conversation_id: 7,
            content: "a".repeat(20_001),
            parent_id: None,
        };
        assert!(body.validate().is_err());

        let body = SendMessageBody {
            conversation_id: 7,
            content: "hi".to_string(),
            parent_id: Some(3),
        };
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_history_query_default_page() {
        let query: HistoryQuery = serde_json::from_str(r#"{"conversation_id":7}"#).unwrap();
        assert_eq!(query.page, 1);
    }
}
