//! Conversation lifecycle service.

use crate::repositories::ConversationRepository;
use crate::types::{ChatError, ChatResult};
use sqlx::SqlitePool;
use studycircle_database::{Conversation, GroupPrivacy, StudyGroup};

pub struct ConversationService {
    conversations: ConversationRepository,
}

impl ConversationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            conversations: ConversationRepository::new(pool),
        }
    }

    /// Create a group, its conversation, and the creator's admin
    /// membership in one transaction. A group is never without an admin or
    /// a conversation, even transiently.
    pub async fn create_group(
        &self,
        name: &str,
        privacy: GroupPrivacy,
        max_members: Option<i64>,
        creator_id: i64,
    ) -> ChatResult<(StudyGroup, Conversation)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("group name cannot be empty"));
        }
        if let Some(max) = max_members {
            if max < 1 {
                return Err(ChatError::validation("max_members must be at least 1"));
            }
        }

        let (group, conversation, _membership) = self
            .conversations
            .create_group(name, privacy, max_members, creator_id)
            .await?;

        Ok((group, conversation))
    }

    /// Create the conversation backing a direct connection.
    pub async fn create_direct(&self, user_a: i64, user_b: i64) -> ChatResult<Conversation> {
        self.conversations.create_direct(user_a, user_b).await
    }

    pub async fn get(&self, public_id: &str) -> ChatResult<Conversation> {
        self.conversations
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| ChatError::conversation_not_found(public_id))
    }

    pub async fn get_group(&self, public_id: &str) -> ChatResult<StudyGroup> {
        self.conversations
            .find_group_by_public_id(public_id)
            .await?
            .ok_or_else(|| ChatError::group_not_found(public_id))
    }

    /// The conversation owned by a group, resolved by group public id.
    pub async fn get_group_conversation(&self, group_public_id: &str) -> ChatResult<Conversation> {
        let group = self.get_group(group_public_id).await?;
        self.conversations
            .find_group_conversation(group.id)
            .await?
            .ok_or_else(|| ChatError::conversation_not_found(group_public_id))
    }
}
