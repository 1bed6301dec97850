//! API middleware.

#![allow(missing_docs)]

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use axum_extra::extract::CookieJar;
use kaiwa_core::{
    AccountService, ChatService, ConversationService, FriendService, GroupBroadcastService,
};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub account_service: AccountService,
    pub chat_service: ChatService,
    pub conversation_service: ConversationService,
    pub friend_service: FriendService,
    pub broadcast: GroupBroadcastService,
}

/// Authentication middleware.
///
/// Decodes a bearer token (or `token` cookie) into a user row and stores
/// it in the request extensions. Requests without a valid credential pass
/// through unauthenticated; handlers that need a user reject them via the
/// `AuthUser` extractor.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    let credential = bearer.or_else(|| {
        CookieJar::from_headers(req.headers())
            .get("token")
            .map(|c| c.value().to_string())
    });

    if let Some(credential) = credential
        && let Ok(user) = state.account_service.decode_credential(&credential).await
    {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}
