//! Membership entity definitions

use serde::{Deserialize, Serialize};

/// A (group, user) record carrying role and status. Unique per pair; only
/// `active` memberships may participate in chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub invited_by: Option<i64>,
    pub joined_at: String,
    pub updated_at: String,
    pub left_at: Option<String>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Whether this membership grants moderation powers (admin counts).
    pub fn can_moderate(&self) -> bool {
        self.is_active()
            && matches!(self.role, MemberRole::Admin | MemberRole::Moderator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Moderator,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Moderator => "moderator",
            MemberRole::Member => "member",
        }
    }
}

impl From<&str> for MemberRole {
    fn from(s: &str) -> Self {
        match s {
            "admin" => MemberRole::Admin,
            "moderator" => MemberRole::Moderator,
            _ => MemberRole::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    /// Requested to join, awaiting approval.
    Pending,
    /// Invited by an admin or moderator, awaiting acceptance.
    Invited,
    Removed,
    Left,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Pending => "pending",
            MemberStatus::Invited => "invited",
            MemberStatus::Removed => "removed",
            MemberStatus::Left => "left",
        }
    }
}

impl From<&str> for MemberStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => MemberStatus::Active,
            "pending" => MemberStatus::Pending,
            "invited" => MemberStatus::Invited,
            "removed" => MemberStatus::Removed,
            _ => MemberStatus::Left,
        }
    }
}
