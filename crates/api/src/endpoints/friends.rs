//! Friend graph endpoints.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{DateTime, FixedOffset};
use kaiwa_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create friends router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(friend_list))
        .route("/request/add", post(send_request))
        .route("/request/list", get(request_list))
        .route("/request/handle", post(handle_request))
        .route("/remove", post(remove_friend))
}

/// Send friend request body.
#[derive(Debug, Deserialize)]
pub struct SendRequestBody {
    pub receiver_id: i64,
}

/// Send a friend request.
async fn send_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<SendRequestBody>,
) -> AppResult<ApiResponse<()>> {
    info!(from = user.id, to = body.receiver_id, "Sending friend request");

    state
        .friend_service
        .send_request(user.id, body.receiver_id)
        .await?;

    Ok(ApiResponse::ok(()))
}

/// Friend request listing query.
#[derive(Debug, Deserialize)]
pub struct RequestListQuery {
    /// `in` for received requests (default), `out` for sent ones.
    #[serde(default = "default_direction", rename = "type")]
    pub direction: String,
}

fn default_direction() -> String {
    "in".to_string()
}

/// One pending friend request.
#[derive(Debug, Serialize)]
pub struct FriendRequestResponse {
    pub user_id: i64,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub requested_at: DateTime<FixedOffset>,
}

/// List pending friend requests.
async fn request_list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<RequestListQuery>,
) -> AppResult<ApiResponse<Vec<FriendRequestResponse>>> {
    let incoming = !query.direction.trim().eq_ignore_ascii_case("out");

    let requests = state.friend_service.pending_requests(user.id, incoming).await?;
    let requests = requests
        .into_iter()
        .map(|r| FriendRequestResponse {
            user_id: r.user_id,
            username: r.username,
            avatar_url: r.avatar_url,
            requested_at: r.requested_at,
        })
        .collect();

    Ok(ApiResponse::ok(requests))
}

/// Handle friend request body.
#[derive(Debug, Deserialize)]
pub struct HandleRequestBody {
    pub sender_id: i64,
    /// `accept` or `decline`.
    pub action: String,
}

/// Handle request response.
#[derive(Debug, Serialize)]
pub struct HandleRequestResponse {
    pub status: String,
}

/// Accept or decline a pending friend request.
async fn handle_request(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<HandleRequestBody>,
) -> AppResult<ApiResponse<HandleRequestResponse>> {
    let accept = match body.action.as_str() {
        "accept" => true,
        "decline" => false,
        _ => return Err(AppError::BadRequest("Invalid action".to_string())),
    };

    let updated = state
        .friend_service
        .handle_request(user.id, body.sender_id, accept)
        .await?;

    Ok(ApiResponse::ok(HandleRequestResponse {
        status: format!("{:?}", updated.status).to_lowercase(),
    }))
}

/// One friend entry.
#[derive(Debug, Serialize)]
pub struct FriendResponse {
    pub user_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// List accepted friends.
async fn friend_list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<Vec<FriendResponse>>> {
    let friends = state.friend_service.friends(user.id).await?;
    let friends = friends
        .into_iter()
        .map(|u| FriendResponse {
            user_id: u.id,
            username: u.username,
            avatar_url: u.avatar_url,
        })
        .collect();

    Ok(ApiResponse::ok(friends))
}

/// Remove friend body.
#[derive(Debug, Deserialize)]
pub struct RemoveFriendBody {
    pub friend_id: i64,
}

/// Remove a friendship. The private conversation goes mute; its history
/// survives.
async fn remove_friend(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<RemoveFriendBody>,
) -> AppResult<ApiResponse<()>> {
    info!(user = user.id, friend = body.friend_id, "Removing friendship");

    state.friend_service.unfriend(user.id, body.friend_id).await?;

    Ok(ApiResponse::ok(()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_list_query_default_direction() {
        let query: RequestListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.direction, "in");

        let query: RequestListQuery = serde_json::from_str(r#"{"type":"out"}"#).unwrap();
        assert_eq!(query.direction, "out");
    }

    #[test]
    fn test_friend_response_serialization() {
        let response = FriendResponse {
            user_id: 2,
            username: "bob".to_string(),
            avatar_url: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"user_id\":2"));
        assert!(json.contains("\"username\":\"bob\""));
    }
}
