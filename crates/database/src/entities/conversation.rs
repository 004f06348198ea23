//! Conversation entity definitions

use serde::{Deserialize, Serialize};

/// The chat scope backing either a direct connection or a group. Exactly one
/// conversation exists per group and per direct pair, created in the same
/// transaction as its owning entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub public_id: String,
    pub kind: ConversationKind,
    pub group_id: Option<i64>,
    pub user_a: Option<i64>,
    pub user_b: Option<i64>,
    pub created_at: String,
}

impl Conversation {
    /// Direct-conversation participant check; group conversations are
    /// authorized against the membership table instead.
    pub fn has_direct_participant(&self, user_id: i64) -> bool {
        self.kind == ConversationKind::Direct
            && (self.user_a == Some(user_id) || self.user_b == Some(user_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }
}

impl From<&str> for ConversationKind {
    fn from(s: &str) -> Self {
        match s {
            "group" => ConversationKind::Group,
            _ => ConversationKind::Direct,
        }
    }
}
