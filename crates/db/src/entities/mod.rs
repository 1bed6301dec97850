//! Database entities.

pub mod conversation;
pub mod conversation_participant;
pub mod friend_request;
pub mod message;
pub mod user;
