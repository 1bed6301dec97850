//! Database repositories.

mod conversation;
mod friend;
mod message;
mod user;

pub use conversation::ConversationRepository;
pub use friend::FriendRepository;
pub use message::{MessagePage, MessageRepository};
pub use user::UserRepository;
