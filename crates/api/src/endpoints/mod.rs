//! API endpoints.

mod conversations;
mod friends;
mod messages;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
#[must_use]
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/friends", friends::router())
        .nest("/conversations", conversations::router())
        .nest("/messages", messages::router())
}
