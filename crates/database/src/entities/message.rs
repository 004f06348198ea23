//! Message entity definitions

use serde::{Deserialize, Serialize};

/// An immutable entry in a conversation's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub public_id: String,
    pub conversation_id: i64,
    pub sender_id: i64,
    /// The sender's public id, resolved for the wire.
    pub sender_public_id: String,
    pub content: String,
    pub created_at: String,
    /// Public ids of users that have acknowledged this message. Grows
    /// monotonically; empty for a freshly appended message.
    #[serde(default)]
    pub read_by: Vec<String>,
}
