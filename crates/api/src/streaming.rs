//! WebSocket chat session controller.
//!
//! One task per connection. The session authenticates from
//! transport-level context, joins the conversation's room group and the
//! user's personal inbox group, then multiplexes inbound frames against
//! broadcast deliveries until the socket closes. Frames from one
//! connection are handled strictly sequentially; connections proceed in
//! parallel with each other.
//!
//! The session holds no business logic: a chat-send frame is delegated
//! to the fanout coordinator, and group events are translated to frames.

#![allow(missing_docs)]

use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use axum_extra::extract::CookieJar;
use futures::{SinkExt, StreamExt};
use kaiwa_common::AppError;
use kaiwa_core::{ChatEvent, Group, MessagePayload};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::middleware::AppState;

/// Reserved heartbeat literals.
pub const HEARTBEAT_PROBE: &str = "ping";
pub const HEARTBEAT_REPLY: &str = "pong";

/// Close code sent when credential decoding fails.
pub const CLOSE_AUTH_FAILURE: u16 = 4401;

/// Streaming query parameters (credential fallback for clients that
/// cannot set cookies or headers on the upgrade request).
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// Client-to-server chat frame.
#[derive(Debug, Deserialize)]
pub struct ChatSendRequest {
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// A message for the currently open conversation.
    Normal { msg: MessagePayload },
    /// A cross-conversation notification for the unread badge.
    Inbox { msg: MessagePayload },
    /// A rejected send, visible only to this user.
    Blocked { reason: String },
}

/// WebSocket handler for a chat session.
pub async fn chat_socket_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<i64>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let credential = extract_credential(&headers, query.token);
    info!(conversation_id, "New chat connection");

    ws.on_upgrade(move |socket| handle_socket(socket, conversation_id, credential, state))
}

/// Credential resolution order: `token` cookie, `Authorization: Bearer`,
/// `token` query parameter.
fn extract_credential(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    CookieJar::from_headers(headers)
        .get("token")
        .map(|c| c.value().to_string())
        .or_else(|| {
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .or(query_token)
}

/// Drive one chat session from authentication to close.
async fn handle_socket(
    socket: WebSocket,
    conversation_id: i64,
    credential: Option<String>,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    // Authenticate before any group subscription
    let user = match credential {
        Some(raw) => state.account_service.decode_credential(&raw).await,
        None => Err(AppError::Unauthorized),
    };
    let user = match user {
        Ok(user) => user,
        Err(e) => {
            warn!(conversation_id, error = %e, "Chat auth failed");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_AUTH_FAILURE,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    let room = Group::Room(conversation_id);
    let inbox = Group::Inbox(user.id);

    // Take a receiver before joining so no event can slip between
    let mut events = state.broadcast.events();

    if let Err(e) = state.broadcast.subscribe(&room).await {
        error!(error = %e, conversation_id, "Failed to join room group");
        let _ = state.broadcast.unsubscribe(&room).await;
        return;
    }
    if let Err(e) = state.broadcast.subscribe(&inbox).await {
        error!(error = %e, user_id = user.id, "Failed to join inbox group");
        let _ = state.broadcast.unsubscribe(&room).await;
        let _ = state.broadcast.unsubscribe(&inbox).await;
        return;
    }

    info!(conversation_id, user_id = user.id, "Chat session subscribed");

    loop {
        tokio::select! {
            // Inbound frames, handled strictly in order
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == HEARTBEAT_PROBE {
                            if sender.send(Message::Text(HEARTBEAT_REPLY.into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        if let Some(frame) =
                            handle_send_frame(&state, conversation_id, user.id, &text).await
                        {
                            let json = serde_json::to_string(&frame).unwrap_or_default();
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(user_id = user.id, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            // Broadcast deliveries for the two joined groups
            event = events.recv() => {
                match event {
                    Ok((group, event)) => {
                        if let Some(frame) = frame_for(&group, event, &room, &inbox) {
                            let json = serde_json::to_string(&frame).unwrap_or_default();
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(user_id = user.id, lagged = n, "Chat session lagged behind broadcasts");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Unsubscription is attempted even after a partial subscribe
    let _ = state.broadcast.unsubscribe(&room).await;
    let _ = state.broadcast.unsubscribe(&inbox).await;
    info!(conversation_id, user_id = user.id, "Chat session closed");
}

/// Handle one chat-send frame. Returns a frame to write directly to this
/// socket, if any.
async fn handle_send_frame(
    state: &AppState,
    conversation_id: i64,
    user_id: i64,
    text: &str,
) -> Option<ServerFrame> {
    let request = match serde_json::from_str::<ChatSendRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            // Malformed frames are dropped without closing the connection
            warn!(user_id, error = %e, "Dropping malformed chat frame");
            return None;
        }
    };

    if request.text.trim().is_empty() {
        debug!(user_id, "Dropping empty chat frame");
        return None;
    }

    match state
        .chat_service
        .send(conversation_id, user_id, &request.text, request.parent_id)
        .await
    {
        // The room/inbox events carry the result; nothing to write here
        Ok(_) => None,
        // The sender's inbox already received the blocked event
        Err(AppError::Forbidden(_)) => None,
        Err(AppError::Database(e)) => {
            error!(user_id, conversation_id, error = %e, "Persist failed for chat frame");
            Some(ServerFrame::Blocked {
                reason: "Message could not be delivered".to_string(),
            })
        }
        Err(e) => {
            warn!(user_id, conversation_id, error = %e, "Rejected chat frame");
            Some(ServerFrame::Blocked {
                reason: e.to_string(),
            })
        }
    }
}

/// Translate a delivered group event into an outbound frame for a session
/// subscribed to `room` and `inbox`. Events for other groups, and event
/// kinds a group does not carry, produce nothing.
fn frame_for(
    group: &Group,
    event: ChatEvent,
    room: &Group,
    inbox: &Group,
) -> Option<ServerFrame> {
    if group == room {
        match event {
            ChatEvent::Message { payload } => Some(ServerFrame::Normal { msg: payload }),
            ChatEvent::Inbox { .. } | ChatEvent::Blocked { .. } => None,
        }
    } else if group == inbox {
        match event {
            ChatEvent::Inbox { payload } => Some(ServerFrame::Inbox { msg: payload }),
            ChatEvent::Blocked { reason } => Some(ServerFrame::Blocked { reason }),
            ChatEvent::Message { .. } => None,
        }
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(conversation_id: i64, sender_id: i64) -> MessagePayload {
        MessagePayload {
            id: 10,
            conversation_id,
            sender_id,
            sender_username: "alice".to_string(),
            parent_id: 0,
            content: "hi".to_string(),
            timestamp_ms: 1_700_000_000_000,
            is_recalled: false,
        }
    }

    #[test]
    fn test_room_message_becomes_normal_frame() {
        let room = Group::Room(7);
        let inbox = Group::Inbox(1);
        let event = ChatEvent::Message {
            payload: payload(7, 2),
        };

        let frame = frame_for(&Group::Room(7), event, &room, &inbox).unwrap();
        assert!(matches!(frame, ServerFrame::Normal { .. }));
    }

    #[test]
    fn test_inbox_event_becomes_inbox_frame() {
        let room = Group::Room(7);
        let inbox = Group::Inbox(1);
        let event = ChatEvent::Inbox {
            payload: payload(9, 2),
        };

        let frame = frame_for(&Group::Inbox(1), event, &room, &inbox).unwrap();
        assert!(matches!(frame, ServerFrame::Inbox { .. }));
    }

    #[test]
    fn test_blocked_event_becomes_blocked_frame() {
        let room = Group::Room(7);
        let inbox = Group::Inbox(1);
        let event = ChatEvent::Blocked {
            reason: "not a participant".to_string(),
        };

        let frame = frame_for(&Group::Inbox(1), event, &room, &inbox).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Blocked {
                reason: "not a participant".to_string()
            }
        );
    }

    #[test]
    fn test_foreign_group_events_ignored() {
        let room = Group::Room(7);
        let inbox = Group::Inbox(1);

        let event = ChatEvent::Message {
            payload: payload(8, 2),
        };
        assert!(frame_for(&Group::Room(8), event, &room, &inbox).is_none());

        let event = ChatEvent::Inbox {
            payload: payload(8, 2),
        };
        assert!(frame_for(&Group::Inbox(2), event, &room, &inbox).is_none());
    }

    #[test]
    fn test_kind_group_mismatch_ignored() {
        let room = Group::Room(7);
        let inbox = Group::Inbox(1);

        // A room never carries inbox events, and vice versa
        let event = ChatEvent::Inbox {
            payload: payload(7, 2),
        };
        assert!(frame_for(&Group::Room(7), event, &room, &inbox).is_none());

        let event = ChatEvent::Message {
            payload: payload(7, 2),
        };
        assert!(frame_for(&Group::Inbox(1), event, &room, &inbox).is_none());
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::Normal {
            msg: payload(7, 1),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"normal\""));
        assert!(json.contains("\"conversation_id\":7"));
        assert!(json.contains("\"timestamp_ms\":1700000000000"));

        let frame = ServerFrame::Blocked {
            reason: "nope".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"blocked\""));
    }

    #[test]
    fn test_send_request_parsing() {
        let parsed: ChatSendRequest = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(parsed.text, "hi");
        assert_eq!(parsed.parent_id, None);

        let parsed: ChatSendRequest =
            serde_json::from_str(r#"{"text":"re","parent_id":5}"#).unwrap();
        assert_eq!(parsed.parent_id, Some(5));

        assert!(serde_json::from_str::<ChatSendRequest>("{\"msg\":1}").is_err());
    }

    #[test]
    fn test_extract_credential_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", "token=cookie-token".parse().unwrap());
        headers.insert("Authorization", "Bearer header-token".parse().unwrap());

        assert_eq!(
            extract_credential(&headers, Some("query-token".to_string())),
            Some("cookie-token".to_string())
        );

        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer header-token".parse().unwrap());
        assert_eq!(
            extract_credential(&headers, Some("query-token".to_string())),
            Some("header-token".to_string())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            extract_credential(&headers, Some("query-token".to_string())),
            Some("query-token".to_string())
        );
        assert_eq!(extract_credential(&headers, None), None);
    }
}
