//! Membership resolver.
//!
//! Computes who may post into a conversation and who receives its fanout.
//! Authorization runs per message: friendship and membership can erode
//! mid-session, so the answer is never cached across sends.

use kaiwa_db::{
    entities::conversation::{self, ConversationKind},
    repositories::ConversationRepository,
};
use kaiwa_common::AppResult;

/// Membership resolution service.
#[derive(Clone)]
pub struct MembershipService {
    conversation_repo: ConversationRepository,
}

impl MembershipService {
    /// Create a new membership service.
    #[must_use]
    pub const fn new(conversation_repo: ConversationRepository) -> Self {
        Self { conversation_repo }
    }

    /// Whether a user may post into a conversation right now.
    ///
    /// Group conversations require the sender's participant row and an
    /// undissolved group. Private conversations require **both** rows:
    /// once either side has left, the conversation is permanently mute
    /// (re-friending starts a new conversation instead).
    pub async fn authorized_to_post(
        &self,
        conversation: &conversation::Model,
        user_id: i64,
    ) -> AppResult<bool> {
        let participants = self.conversation_repo.participants(conversation.id).await?;
        let sender_present = participants.iter().any(|p| p.user_id == user_id);

        let authorized = match conversation.kind {
            ConversationKind::Group => sender_present && !conversation.dissolved,
            ConversationKind::Private => sender_present && participants.len() == 2,
        };

        Ok(authorized)
    }

    /// All participant user ids of a conversation except the sender.
    pub async fn recipients(
        &self,
        conversation_id: i64,
        exclude_user_id: i64,
    ) -> AppResult<Vec<i64>> {
        let participants = self.conversation_repo.participants(conversation_id).await?;
        Ok(participants
            .into_iter()
            .map(|p| p.user_id)
            .filter(|&id| id != exclude_user_id)
            .collect())
    }
}
