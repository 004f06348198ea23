//! Study group entity definitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyGroup {
    pub id: i64,
    pub public_id: String,
    pub name: String,
    pub privacy: GroupPrivacy,
    /// Maximum number of active members; `None` means unlimited.
    pub max_members: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPrivacy {
    /// Anyone can join directly.
    Public,
    /// Anyone can see the group, joining requires approval.
    Private,
    /// Only visible to members, joining requires an invite.
    InviteOnly,
}

impl GroupPrivacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupPrivacy::Public => "public",
            GroupPrivacy::Private => "private",
            GroupPrivacy::InviteOnly => "invite_only",
        }
    }
}

impl From<&str> for GroupPrivacy {
    fn from(s: &str) -> Self {
        match s {
            "private" => GroupPrivacy::Private,
            "invite_only" => GroupPrivacy::InviteOnly,
            _ => GroupPrivacy::Public,
        }
    }
}
