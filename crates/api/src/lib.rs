//! HTTP and WebSocket API surface for kaiwa.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod streaming;

pub use endpoints::router;
pub use middleware::AppState;
pub use streaming::chat_socket_handler;
