//! Message append, history, and read-receipt service.
//!
//! Authorization is evaluated here on every call against the current
//! membership table, never against state cached at connection time —
//! membership can change between connect and send.

use crate::repositories::{ConversationRepository, MembershipRepository, MessageRepository};
use crate::types::{ChatError, ChatResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sqlx::SqlitePool;
use studycircle_config::ChatConfig;
use studycircle_database::{Conversation, ConversationKind, Message};
use tracing::debug;

const CURSOR_PREFIX: &str = "m:";

/// One page of conversation history.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for the next page; `None` when this page was empty.
    pub next_cursor: Option<String>,
}

/// Result of a batch mark-read. `updated` counts only newly recorded
/// marks, so applying the same batch twice reports zero the second time.
#[derive(Debug, Clone)]
pub struct MarkReadOutcome {
    pub updated: u64,
    /// Public ids that belong to the conversation and were eligible for
    /// marking; unknown and foreign ids have already been dropped.
    pub message_ids: Vec<String>,
    pub read_at: String,
}

pub struct MessageService {
    messages: MessageRepository,
    conversations: ConversationRepository,
    memberships: MembershipRepository,
    limits: ChatConfig,
}

impl MessageService {
    pub fn new(pool: SqlitePool, limits: ChatConfig) -> Self {
        Self {
            messages: MessageRepository::new(pool.clone()),
            conversations: ConversationRepository::new(pool.clone()),
            memberships: MembershipRepository::new(pool),
            limits,
        }
    }

    /// Resolve a conversation and verify the user may participate in it
    /// right now: direct conversations require being one of the pair,
    /// group conversations an `active` membership.
    pub async fn authorize_participant(
        &self,
        conversation_public_id: &str,
        user_id: i64,
    ) -> ChatResult<Conversation> {
        let conversation = self
            .conversations
            .find_by_public_id(conversation_public_id)
            .await?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_public_id))?;

        match conversation.kind {
            ConversationKind::Direct => {
                if !conversation.has_direct_participant(user_id) {
                    return Err(ChatError::permission_denied(
                        "you are not a participant in this conversation",
                    ));
                }
            }
            ConversationKind::Group => {
                let group_id = conversation
                    .group_id
                    .ok_or_else(|| ChatError::conversation_not_found(conversation_public_id))?;
                let membership = self.memberships.find(group_id, user_id).await?;
                if !membership.map(|m| m.is_active()).unwrap_or(false) {
                    return Err(ChatError::permission_denied(
                        "you are not an active member of this group",
                    ));
                }
            }
        }

        Ok(conversation)
    }

    /// Append a message to the conversation. The insert is durably
    /// committed before this returns; any broadcast happens strictly
    /// afterwards in the caller.
    pub async fn append(
        &self,
        conversation_public_id: &str,
        sender_id: i64,
        content: &str,
    ) -> ChatResult<(Conversation, Message)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::validation("message content cannot be empty"));
        }
        if content.chars().count() > self.limits.max_message_length {
            return Err(ChatError::validation(format!(
                "message content exceeds {} characters",
                self.limits.max_message_length
            )));
        }

        let conversation = self
            .authorize_participant(conversation_public_id, sender_id)
            .await?;

        let message = self
            .messages
            .append(conversation.id, sender_id, content)
            .await?;

        Ok((conversation, message))
    }

    /// Ordered history after an opaque cursor. A client that reconnects
    /// with its last-seen cursor receives exactly the messages it missed.
    pub async fn list_since(
        &self,
        conversation_public_id: &str,
        user_id: i64,
        cursor: Option<&str>,
        limit: Option<i64>,
    ) -> ChatResult<MessagePage> {
        let conversation = self
            .authorize_participant(conversation_public_id, user_id)
            .await?;

        let after_id = match cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        let limit = limit
            .unwrap_or(self.limits.history_page_size)
            .clamp(1, self.limits.history_page_size.max(1));

        let messages = self
            .messages
            .list_after(conversation.id, after_id, limit)
            .await?;

        let next_cursor = messages.last().map(|message| encode_cursor(message.id));

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Record read marks for the given message public ids. Unknown ids,
    /// ids from other conversations, and the reader's own messages are
    /// silently dropped rather than failing the batch.
    pub async fn mark_read(
        &self,
        conversation_public_id: &str,
        user_id: i64,
        message_ids: &[String],
    ) -> ChatResult<MarkReadOutcome> {
        let conversation = self
            .authorize_participant(conversation_public_id, user_id)
            .await?;

        let read_at = chrono::Utc::now().to_rfc3339();
        let markable = self
            .messages
            .resolve_markable(conversation.id, user_id, message_ids)
            .await?;

        if markable.is_empty() {
            return Ok(MarkReadOutcome {
                updated: 0,
                message_ids: Vec::new(),
                read_at,
            });
        }

        let rowids: Vec<i64> = markable.iter().map(|(id, _)| *id).collect();
        let updated = self
            .messages
            .insert_read_marks(user_id, &rowids, &read_at)
            .await?;

        debug!(
            conversation = %conversation.public_id,
            user_id,
            requested = message_ids.len(),
            marked = updated,
            "recorded read marks"
        );

        Ok(MarkReadOutcome {
            updated,
            message_ids: markable.into_iter().map(|(_, public_id)| public_id).collect(),
            read_at,
        })
    }
}

/// Cursors are the base64 of the last-seen message rowid. Opaque to
/// clients; stable because the log is append-only.
pub fn encode_cursor(message_rowid: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{CURSOR_PREFIX}{message_rowid}"))
}

fn decode_cursor(cursor: &str) -> ChatResult<i64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ChatError::validation("malformed history cursor"))?;
    let decoded =
        String::from_utf8(bytes).map_err(|_| ChatError::validation("malformed history cursor"))?;
    decoded
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|id| *id >= 0)
        .ok_or_else(|| ChatError::validation("malformed history cursor"))
}
