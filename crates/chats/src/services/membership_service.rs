//! Group membership state machine.
//!
//! Transitions per (group, user): `pending → active` (accept),
//! `pending → removed` (reject), `invited → active` (accept invite),
//! `invited → removed` (decline), `active → left` (self-leave),
//! `active → removed` (removal). Every group keeps at least one active
//! admin; operations that would break that fail with
//! [`ChatError::InvariantViolation`] and leave state unchanged.

use crate::repositories::{ConversationRepository, MembershipRepository};
use crate::types::{ChatError, ChatResult};
use sqlx::SqlitePool;
use studycircle_database::{GroupPrivacy, MemberRole, MemberStatus, Membership, StudyGroup};
use tracing::info;

pub struct MembershipService {
    memberships: MembershipRepository,
    conversations: ConversationRepository,
}

impl MembershipService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            memberships: MembershipRepository::new(pool.clone()),
            conversations: ConversationRepository::new(pool),
        }
    }

    /// Join or request to join a group. Public groups admit immediately,
    /// private groups queue a pending request, invite-only groups require
    /// an existing invite (which this accepts).
    pub async fn request_join(
        &self,
        group_public_id: &str,
        user_id: i64,
    ) -> ChatResult<Membership> {
        let group = self.require_group(group_public_id).await?;
        let existing = self.memberships.find(group.id, user_id).await?;

        if let Some(membership) = &existing {
            match membership.status {
                MemberStatus::Active => {
                    return Err(ChatError::conflict("you are already a member of this group"))
                }
                MemberStatus::Pending => {
                    return Err(ChatError::conflict("your join request is already pending"))
                }
                MemberStatus::Invited => {
                    // Joining with an outstanding invite accepts it.
                    self.memberships
                        .update_status(membership.id, MemberStatus::Active, false)
                        .await?;
                    info!(group = %group.public_id, user_id, "invite accepted via join");
                    return self.require_membership(group.id, user_id).await;
                }
                MemberStatus::Removed | MemberStatus::Left => {}
            }
        }

        self.ensure_capacity(&group).await?;

        let status = match group.privacy {
            GroupPrivacy::Public => MemberStatus::Active,
            GroupPrivacy::Private => MemberStatus::Pending,
            GroupPrivacy::InviteOnly => {
                return Err(ChatError::permission_denied(
                    "this group is invite-only; you must be invited to join",
                ))
            }
        };

        let membership = match existing {
            Some(previous) => {
                self.memberships
                    .revive(previous.id, MemberRole::Member, status, None)
                    .await?;
                self.require_membership(group.id, user_id).await?
            }
            None => {
                self.memberships
                    .insert(group.id, user_id, MemberRole::Member, status, None)
                    .await?
            }
        };

        info!(group = %group.public_id, user_id, status = status.as_str(), "join processed");
        Ok(membership)
    }

    /// Invite a user. Requires an active admin or moderator; overwrites a
    /// stale left/removed record, conflicts with any live one.
    pub async fn invite(
        &self,
        group_public_id: &str,
        inviter_id: i64,
        target_user_id: i64,
    ) -> ChatResult<Membership> {
        let group = self.require_group(group_public_id).await?;
        self.require_moderator(group.id, inviter_id).await?;

        let existing = self.memberships.find(group.id, target_user_id).await?;
        if let Some(membership) = &existing {
            match membership.status {
                MemberStatus::Active => {
                    return Err(ChatError::conflict("user is already a member of this group"))
                }
                MemberStatus::Invited | MemberStatus::Pending => {
                    return Err(ChatError::conflict(
                        "user already has a pending invitation or request",
                    ))
                }
                MemberStatus::Removed | MemberStatus::Left => {}
            }
        }

        let membership = match existing {
            Some(previous) => {
                self.memberships
                    .revive(
                        previous.id,
                        MemberRole::Member,
                        MemberStatus::Invited,
                        Some(inviter_id),
                    )
                    .await?;
                self.require_membership(group.id, target_user_id).await?
            }
            None => {
                self.memberships
                    .insert(
                        group.id,
                        target_user_id,
                        MemberRole::Member,
                        MemberStatus::Invited,
                        Some(inviter_id),
                    )
                    .await?
            }
        };

        info!(group = %group.public_id, inviter_id, target_user_id, "invite created");
        Ok(membership)
    }

    /// Approve a pending join request.
    pub async fn accept_request(
        &self,
        group_public_id: &str,
        actor_id: i64,
        target_user_id: i64,
    ) -> ChatResult<Membership> {
        let group = self.require_group(group_public_id).await?;
        self.require_moderator(group.id, actor_id).await?;

        let membership = self.require_membership(group.id, target_user_id).await?;
        if membership.status != MemberStatus::Pending {
            return Err(ChatError::conflict("this membership is not pending"));
        }

        self.ensure_capacity(&group).await?;
        self.memberships
            .update_status(membership.id, MemberStatus::Active, false)
            .await?;

        info!(group = %group.public_id, actor_id, target_user_id, "join request accepted");
        self.require_membership(group.id, target_user_id).await
    }

    /// Reject a pending join request.
    pub async fn reject_request(
        &self,
        group_public_id: &str,
        actor_id: i64,
        target_user_id: i64,
    ) -> ChatResult<()> {
        let group = self.require_group(group_public_id).await?;
        self.require_moderator(group.id, actor_id).await?;

        let membership = self.require_membership(group.id, target_user_id).await?;
        if membership.status != MemberStatus::Pending {
            return Err(ChatError::conflict("this membership is not pending"));
        }

        self.memberships
            .update_status(membership.id, MemberStatus::Removed, true)
            .await?;

        info!(group = %group.public_id, actor_id, target_user_id, "join request rejected");
        Ok(())
    }

    /// Decline one's own outstanding invite.
    pub async fn decline_invite(&self, group_public_id: &str, user_id: i64) -> ChatResult<()> {
        let group = self.require_group(group_public_id).await?;

        let membership = self.require_membership(group.id, user_id).await?;
        if membership.status != MemberStatus::Invited {
            return Err(ChatError::conflict("you have no outstanding invite"));
        }

        self.memberships
            .update_status(membership.id, MemberStatus::Removed, true)
            .await?;

        info!(group = %group.public_id, user_id, "invite declined");
        Ok(())
    }

    /// Change an active member's role. Admin-only; demoting the sole
    /// active admin is rejected atomically.
    pub async fn set_role(
        &self,
        group_public_id: &str,
        actor_id: i64,
        target_user_id: i64,
        new_role: MemberRole,
    ) -> ChatResult<Membership> {
        let group = self.require_group(group_public_id).await?;
        self.require_admin(group.id, actor_id).await?;

        let membership = self.require_membership(group.id, target_user_id).await?;
        if membership.status != MemberStatus::Active {
            return Err(ChatError::conflict("only active members can change role"));
        }
        if membership.role == new_role {
            return Ok(membership);
        }

        let affected = self
            .memberships
            .update_role_guarded(group.id, target_user_id, new_role)
            .await?;

        if affected == 0 {
            if membership.role == MemberRole::Admin && new_role != MemberRole::Admin {
                return Err(ChatError::invariant_violation(
                    "cannot demote the last active admin; promote another member first",
                ));
            }
            return Err(ChatError::conflict("membership changed concurrently"));
        }

        info!(
            group = %group.public_id,
            actor_id,
            target_user_id,
            role = new_role.as_str(),
            "member role updated"
        );
        self.require_membership(group.id, target_user_id).await
    }

    /// Remove an active member. Admin-only; removing the sole active
    /// admin is rejected atomically.
    pub async fn remove(
        &self,
        group_public_id: &str,
        actor_id: i64,
        target_user_id: i64,
    ) -> ChatResult<()> {
        let group = self.require_group(group_public_id).await?;
        self.require_admin(group.id, actor_id).await?;

        let membership = self.require_membership(group.id, target_user_id).await?;
        if membership.status != MemberStatus::Active {
            return Err(ChatError::conflict("user is not an active member"));
        }

        let affected = self
            .memberships
            .deactivate_guarded(group.id, target_user_id, MemberStatus::Removed)
            .await?;

        if affected == 0 {
            if membership.role == MemberRole::Admin {
                return Err(ChatError::invariant_violation(
                    "cannot remove the last active admin",
                ));
            }
            return Err(ChatError::conflict("membership changed concurrently"));
        }

        info!(group = %group.public_id, actor_id, target_user_id, "member removed");
        Ok(())
    }

    /// Leave a group. The sole active admin must promote a successor
    /// before leaving.
    pub async fn leave(&self, group_public_id: &str, user_id: i64) -> ChatResult<()> {
        let group = self.require_group(group_public_id).await?;

        let membership = self.require_membership(group.id, user_id).await?;
        if membership.status != MemberStatus::Active {
            return Err(ChatError::conflict("you are not an active member of this group"));
        }

        let affected = self
            .memberships
            .deactivate_guarded(group.id, user_id, MemberStatus::Left)
            .await?;

        if affected == 0 {
            if membership.role == MemberRole::Admin {
                return Err(ChatError::invariant_violation(
                    "you are the last admin; promote another member before leaving",
                ));
            }
            return Err(ChatError::conflict("membership changed concurrently"));
        }

        info!(group = %group.public_id, user_id, "member left group");
        Ok(())
    }

    pub async fn get(&self, group_public_id: &str, user_id: i64) -> ChatResult<Option<Membership>> {
        let group = self.require_group(group_public_id).await?;
        self.memberships.find(group.id, user_id).await
    }

    async fn require_group(&self, group_public_id: &str) -> ChatResult<StudyGroup> {
        self.conversations
            .find_group_by_public_id(group_public_id)
            .await?
            .ok_or_else(|| ChatError::group_not_found(group_public_id))
    }

    async fn require_membership(&self, group_id: i64, user_id: i64) -> ChatResult<Membership> {
        self.memberships
            .find(group_id, user_id)
            .await?
            .ok_or(ChatError::MembershipNotFound)
    }

    async fn require_moderator(&self, group_id: i64, user_id: i64) -> ChatResult<Membership> {
        let membership = self.memberships.find(group_id, user_id).await?;
        match membership {
            Some(membership) if membership.can_moderate() => Ok(membership),
            _ => Err(ChatError::permission_denied(
                "this action requires an admin or moderator",
            )),
        }
    }

    async fn require_admin(&self, group_id: i64, user_id: i64) -> ChatResult<Membership> {
        let membership = self.memberships.find(group_id, user_id).await?;
        match membership {
            Some(membership)
                if membership.is_active() && membership.role == MemberRole::Admin =>
            {
                Ok(membership)
            }
            _ => Err(ChatError::permission_denied("this action requires an admin")),
        }
    }

    async fn ensure_capacity(&self, group: &StudyGroup) -> ChatResult<()> {
        if let Some(max) = group.max_members {
            let active = self.memberships.active_member_count(group.id).await?;
            if active >= max {
                return Err(ChatError::conflict("this group is full"));
            }
        }
        Ok(())
    }
}
