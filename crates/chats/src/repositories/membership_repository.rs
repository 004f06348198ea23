//! Repository for group membership rows.
//!
//! Role- and status-changing updates that could strip a group of its last
//! active admin are expressed as guarded single statements: the WHERE
//! clause re-counts active admins in a scalar subquery, so the check and
//! the write are atomic and concurrent demotions cannot both pass.

use crate::types::ChatResult;
use sqlx::{Row, SqlitePool};
use studycircle_database::{MemberRole, MemberStatus, Membership};

pub struct MembershipRepository {
    pool: SqlitePool,
}

impl MembershipRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, group_id: i64, user_id: i64) -> ChatResult<Option<Membership>> {
        let row = sqlx::query(
            "SELECT id, group_id, user_id, role, status, invited_by, joined_at, updated_at, left_at
             FROM memberships WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(map_membership).transpose()
    }

    pub async fn insert(
        &self,
        group_id: i64,
        user_id: i64,
        role: MemberRole,
        status: MemberStatus,
        invited_by: Option<i64>,
    ) -> ChatResult<Membership> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO memberships (group_id, user_id, role, status, invited_by, joined_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(status.as_str())
        .bind(invited_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Membership {
            id: result.last_insert_rowid(),
            group_id,
            user_id,
            role,
            status,
            invited_by,
            joined_at: now.clone(),
            updated_at: now,
            left_at: None,
        })
    }

    /// Reuse a `left`/`removed` row for a fresh join or invite. The unique
    /// (group, user) pair means the old record is the only place the new
    /// state can live.
    pub async fn revive(
        &self,
        membership_id: i64,
        role: MemberRole,
        status: MemberStatus,
        invited_by: Option<i64>,
    ) -> ChatResult<()> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE memberships
             SET role = ?, status = ?, invited_by = ?, left_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(role.as_str())
        .bind(status.as_str())
        .bind(invited_by)
        .bind(&now)
        .bind(membership_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_status(
        &self,
        membership_id: i64,
        status: MemberStatus,
        set_left_at: bool,
    ) -> ChatResult<()> {
        let now = chrono::Utc::now().to_rfc3339();

        if set_left_at {
            sqlx::query("UPDATE memberships SET status = ?, left_at = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&now)
                .bind(&now)
                .bind(membership_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE memberships SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(&now)
                .bind(membership_id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Change an active member's role unless that would leave the group
    /// without an active admin. Returns the number of affected rows; zero
    /// means the guard (or a concurrent status change) blocked the write.
    pub async fn update_role_guarded(
        &self,
        group_id: i64,
        user_id: i64,
        new_role: MemberRole,
    ) -> ChatResult<u64> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE memberships SET role = ?, updated_at = ?
             WHERE group_id = ? AND user_id = ? AND status = 'active'
               AND (role != 'admin'
                    OR (SELECT COUNT(*) FROM memberships m2
                        WHERE m2.group_id = memberships.group_id
                          AND m2.role = 'admin' AND m2.status = 'active') > 1)",
        )
        .bind(new_role.as_str())
        .bind(&now)
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Move an active membership to `left`/`removed` unless the member is
    /// the sole active admin. Same guarded-statement contract as
    /// [`update_role_guarded`].
    pub async fn deactivate_guarded(
        &self,
        group_id: i64,
        user_id: i64,
        new_status: MemberStatus,
    ) -> ChatResult<u64> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE memberships SET status = ?, left_at = ?, updated_at = ?
             WHERE group_id = ? AND user_id = ? AND status = 'active'
               AND (role != 'admin'
                    OR (SELECT COUNT(*) FROM memberships m2
                        WHERE m2.group_id = memberships.group_id
                          AND m2.role = 'admin' AND m2.status = 'active') > 1)",
        )
        .bind(new_status.as_str())
        .bind(&now)
        .bind(&now)
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn active_member_count(&self, group_id: i64) -> ChatResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM memberships WHERE group_id = ? AND status = 'active'",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }

    pub async fn active_admin_count(&self, group_id: i64) -> ChatResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM memberships
             WHERE group_id = ? AND role = 'admin' AND status = 'active'",
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }
}

fn map_membership(row: sqlx::sqlite::SqliteRow) -> ChatResult<Membership> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(Membership {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        user_id: row.try_get("user_id")?,
        role: MemberRole::from(role.as_str()),
        status: MemberStatus::from(status.as_str()),
        invited_by: row.try_get("invited_by")?,
        joined_at: row.try_get("joined_at")?,
        updated_at: row.try_get("updated_at")?,
        left_at: row.try_get("left_at")?,
    })
}
