//! Conversation endpoints.
//!
//! These share the conversation service with the live path, so the
//! authorization and unread logic here can never diverge from it.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, FixedOffset};
use kaiwa_common::AppResult;
use kaiwa_db::entities::conversation::ConversationKind;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create conversations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_conversations))
        .route("/group", post(create_group))
        .route("/private", post(open_private))
        .route("/{id}/leave", post(leave))
        .route("/{id}/kick", post(kick))
        .route("/{id}/dissolve", post(dissolve))
}

/// Create group body.
#[derive(Debug, Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
    /// Participant user ids; the creator is always included.
    pub participants: Vec<i64>,
}

/// Created group response.
#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub conversation_id: i64,
    pub name: Option<String>,
}

/// Create a group conversation.
async fn create_group(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateGroupBody>,
) -> AppResult<ApiResponse<CreateGroupResponse>> {
    info!(creator = user.id, name = %body.name, "Creating group conversation");

    let conv = state
        .conversation_service
        .create_group(user.id, &body.name, &body.participants)
        .await?;

    Ok(ApiResponse::ok(CreateGroupResponse {
        conversation_id: conv.id,
        name: conv.name,
    }))
}

/// Open private conversation body.
#[derive(Debug, Deserialize)]
pub struct OpenPrivateBody {
    pub user_id: i64,
}

/// Opened private conversation response.
#[derive(Debug, Serialize)]
pub struct OpenPrivateResponse {
    pub conversation_id: i64,
}

/// Get or create the private conversation with another user.
async fn open_private(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<OpenPrivateBody>,
) -> AppResult<ApiResponse<OpenPrivateResponse>> {
    let conv = state
        .conversation_service
        .get_or_create_private(user.id, body.user_id)
        .await?;

    Ok(ApiResponse::ok(OpenPrivateResponse {
        conversation_id: conv.id,
    }))
}

/// Last message preview.
#[derive(Debug, Serialize)]
pub struct LastMessageResponse {
    pub content: Option<String>,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

/// One conversation summary.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: i64,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub last_message: LastMessageResponse,
    pub unread_count: u64,
    pub dissolved: bool,
}

/// List the caller's conversations with unread counts.
async fn list_conversations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<ConversationResponse>>> {
    let summaries = state.conversation_service.list(user.id).await?;

    let conversations = summaries
        .into_iter()
        .map(|s| ConversationResponse {
            conversation_id: s.conversation_id,
            kind: s.kind,
            name: s.name,
            last_message: LastMessageResponse {
                content: s.last_message.as_ref().map(|m| m.content.clone()),
                timestamp: s.last_message.as_ref().map(|m| m.created_at),
            },
            unread_count: s.unread_count,
            dissolved: s.dissolved,
        })
        .collect();

    Ok(ApiResponse::ok(conversations))
}

/// Leave a conversation.
async fn leave(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<ApiResponse<()>> {
    state.conversation_service.leave(conversation_id, user.id).await?;
    Ok(ApiResponse::ok(()))
}

/// Kick body.
#[derive(Debug, Deserialize)]
pub struct KickBody {
    pub user_id: i64,
}

/// Remove another participant from a group (creator only).
async fn kick(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<KickBody>,
) -> AppResult<ApiResponse<()>> {
    state
        .conversation_service
        .kick(conversation_id, user.id, body.user_id)
        .await?;
    Ok(ApiResponse::ok(()))
}

/// Close a group to new messages (creator only). History survives.
async fn dissolve(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> AppResult<ApiResponse<()>> {
    info!(conversation_id, by = user.id, "Dissolving group");

    state
        .conversation_service
        .dissolve(conversation_id, user.id)
        .await?;
    Ok(ApiResponse::ok(()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_response_serialization() {
        let response = ConversationResponse {
            conversation_id: 7,
            kind: ConversationKind::Private,
            name: Some("bob".to_string()),
            last_message: LastMessageResponse {
                content: Some("hi".to_string()),
                timestamp: None,
            },
            unread_count: 5,
            dissolved: false,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"kind\":\"private\""));
        assert!(json.contains("\"unread_count\":5"));
    }

    #[test]
    fn test_create_group_body_parsing() {
        let body: CreateGroupBody =
            serde_json::from_str(r#"{"name":"team","participants":[2,3]}"#).unwrap();
        assert_eq!(body.name, "team");
        assert_eq!(body.participants, vec![2, 3]);
    }
}
