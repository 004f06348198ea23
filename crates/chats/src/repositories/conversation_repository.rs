//! Repository for conversations and their owning entities.
//!
//! A conversation never exists on its own: it is created in the same
//! transaction as the group (or direct pair) that owns it, so there is
//! exactly one per group and one per accepted connection.

use crate::types::{ChatError, ChatResult};
use sqlx::{Row, SqlitePool};
use studycircle_database::{
    Conversation, ConversationKind, GroupPrivacy, MemberRole, MemberStatus, Membership, StudyGroup,
};
use tracing::info;

pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a group together with its conversation and the creator's
    /// admin membership, atomically.
    pub async fn create_group(
        &self,
        name: &str,
        privacy: GroupPrivacy,
        max_members: Option<i64>,
        created_by: i64,
    ) -> ChatResult<(StudyGroup, Conversation, Membership)> {
        let now = chrono::Utc::now().to_rfc3339();
        let group_public_id = cuid2::create_id();
        let conversation_public_id = cuid2::create_id();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO study_groups (public_id, name, privacy, max_members, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&group_public_id)
        .bind(name)
        .bind(privacy.as_str())
        .bind(max_members)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let group_id = result.last_insert_rowid();

        let result = sqlx::query(
            "INSERT INTO conversations (public_id, kind, group_id, created_at) VALUES (?, 'group', ?, ?)",
        )
        .bind(&conversation_public_id)
        .bind(group_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let conversation_id = result.last_insert_rowid();

        let result = sqlx::query(
            "INSERT INTO memberships (group_id, user_id, role, status, joined_at, updated_at)
             VALUES (?, ?, 'admin', 'active', ?, ?)",
        )
        .bind(group_id)
        .bind(created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let membership_id = result.last_insert_rowid();

        tx.commit().await?;

        info!(group = %group_public_id, conversation = %conversation_public_id, "created group with conversation");

        let group = StudyGroup {
            id: group_id,
            public_id: group_public_id,
            name: name.to_string(),
            privacy,
            max_members,
            created_by: Some(created_by),
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let conversation = Conversation {
            id: conversation_id,
            public_id: conversation_public_id,
            kind: ConversationKind::Group,
            group_id: Some(group_id),
            user_a: None,
            user_b: None,
            created_at: now.clone(),
        };
        let membership = Membership {
            id: membership_id,
            group_id,
            user_id: created_by,
            role: MemberRole::Admin,
            status: MemberStatus::Active,
            invited_by: None,
            joined_at: now.clone(),
            updated_at: now,
            left_at: None,
        };

        Ok((group, conversation, membership))
    }

    /// Create the conversation backing a direct connection between two
    /// users. The pair is stored in normalized order so the unique index
    /// rejects duplicates regardless of argument order.
    pub async fn create_direct(&self, user_a: i64, user_b: i64) -> ChatResult<Conversation> {
        if user_a == user_b {
            return Err(ChatError::validation(
                "a direct conversation needs two distinct users",
            ));
        }

        let (first, second) = if user_a < user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        if self.find_direct_between(first, second).await?.is_some() {
            return Err(ChatError::conflict(
                "a conversation between these users already exists",
            ));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let public_id = cuid2::create_id();

        let result = sqlx::query(
            "INSERT INTO conversations (public_id, kind, user_a, user_b, created_at)
             VALUES (?, 'direct', ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(first)
        .bind(second)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(conversation = %public_id, "created direct conversation");

        Ok(Conversation {
            id: result.last_insert_rowid(),
            public_id,
            kind: ConversationKind::Direct,
            group_id: None,
            user_a: Some(first),
            user_b: Some(second),
            created_at: now,
        })
    }

    pub async fn find_by_public_id(&self, public_id: &str) -> ChatResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, public_id, kind, group_id, user_a, user_b, created_at
             FROM conversations WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_conversation).transpose()
    }

    pub async fn find_direct_between(
        &self,
        user_a: i64,
        user_b: i64,
    ) -> ChatResult<Option<Conversation>> {
        let (first, second) = if user_a < user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        let row = sqlx::query(
            "SELECT id, public_id, kind, group_id, user_a, user_b, created_at
             FROM conversations WHERE kind = 'direct' AND user_a = ? AND user_b = ?",
        )
        .bind(first)
        .bind(second)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_conversation).transpose()
    }

    pub async fn find_group_by_public_id(&self, public_id: &str) -> ChatResult<Option<StudyGroup>> {
        let row = sqlx::query(
            "SELECT id, public_id, name, privacy, max_members, created_by, created_at, updated_at
             FROM study_groups WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let privacy: String = row.try_get("privacy")?;
        Ok(Some(StudyGroup {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            name: row.try_get("name")?,
            privacy: GroupPrivacy::from(privacy.as_str()),
            max_members: row.try_get("max_members")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// The conversation owned by a group. Present for every group by
    /// construction.
    pub async fn find_group_conversation(&self, group_id: i64) -> ChatResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, public_id, kind, group_id, user_a, user_b, created_at
             FROM conversations WHERE kind = 'group' AND group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_conversation).transpose()
    }
}

fn map_conversation(row: sqlx::sqlite::SqliteRow) -> ChatResult<Conversation> {
    let kind: String = row.try_get("kind")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        kind: ConversationKind::from(kind.as_str()),
        group_id: row.try_get("group_id")?,
        user_a: row.try_get("user_a")?,
        user_b: row.try_get("user_b")?,
        created_at: row.try_get("created_at")?,
    })
}
