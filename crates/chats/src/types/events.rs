//! Wire events for the conversation WebSocket protocol.
//!
//! Every frame is a JSON object with a mandatory `type` discriminator. An
//! unrecognized tag fails deserialization, which the protocol handler
//! surfaces as a validation error on that frame only.

use serde::{Deserialize, Serialize};

/// Client → server events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Append a message to the conversation
    ChatMessage { content: String },
    /// Advisory typing state, never persisted
    TypingIndicator { is_typing: bool },
    /// Acknowledge a batch of messages by public id
    MessageRead { message_ids: Vec<String> },
}

/// Server → client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after the session is registered
    ConnectionEstablished { message: String },
    /// A message was appended to the conversation
    ChatMessage {
        message_id: String,
        sender_id: String,
        sender_name: String,
        sender_avatar: Option<String>,
        content: String,
        created_at: String,
    },
    /// Another participant's typing state changed. Never echoed back to
    /// the originating user's own connections.
    TypingIndicator {
        user_id: String,
        user_name: String,
        is_typing: bool,
    },
    /// A participant acknowledged a batch of messages
    MessagesRead {
        user_id: String,
        message_ids: Vec<String>,
        read_at: String,
    },
    /// Per-event failure, delivered only to the offending connection
    Error { message: String },
}

impl ServerEvent {
    /// The user id that originated this event, where suppression of the
    /// sender's own echo applies.
    pub fn typing_origin(&self) -> Option<&str> {
        match self {
            ServerEvent::TypingIndicator { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}
