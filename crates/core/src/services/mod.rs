//! Business services.

pub mod account;
pub mod broadcast;
pub mod chat;
pub mod conversation;
pub mod friend;
pub mod membership;

pub use account::AccountService;
pub use broadcast::{
    ChatEvent, Group, GroupBroadcast, GroupBroadcastService, InProcessBroadcast, MessagePayload,
};
pub use chat::ChatService;
pub use conversation::{ConversationService, ConversationSummary};
pub use friend::{FriendRequestView, FriendService};
pub use membership::MembershipService;
