//! Group membership endpoints: the role state machine that gates chat
//! access. Path user ids are public ids; the gateway resolves them before
//! calling into the membership service.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use studycircle_auth::UserIdentity;
use studycircle_database::{MemberRole, Membership};

use crate::error::{GatewayError, GatewayResult};
use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub group_id: String,
    pub user_id: String,
    pub role: String,
    pub status: String,
    pub invited_by: Option<String>,
    pub joined_at: String,
    pub updated_at: String,
    pub left_at: Option<String>,
}

impl MembershipResponse {
    async fn resolve(
        state: &GatewayState,
        group_id: &str,
        membership: Membership,
    ) -> GatewayResult<Self> {
        let user = state.authenticator.fetch_identity(membership.user_id).await?;
        let invited_by = match membership.invited_by {
            Some(inviter_id) => Some(
                state
                    .authenticator
                    .fetch_identity(inviter_id)
                    .await?
                    .public_id,
            ),
            None => None,
        };

        Ok(Self {
            group_id: group_id.to_string(),
            user_id: user.public_id,
            role: membership.role.as_str().to_string(),
            status: membership.status.as_str().to_string(),
            invited_by,
            joined_at: membership.joined_at,
            updated_at: membership.updated_at,
            left_at: membership.left_at,
        })
    }
}

/// `POST /api/groups/:group_id/join` — join or request to join.
pub async fn join_group(
    State(state): State<Arc<GatewayState>>,
    Path(group_id): Path<String>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<MembershipResponse>> {
    let membership = state
        .membership_service
        .request_join(&group_id, identity.id)
        .await?;
    Ok(Json(
        MembershipResponse::resolve(&state, &group_id, membership).await?,
    ))
}

/// `POST /api/groups/:group_id/leave`
pub async fn leave_group(
    State(state): State<Arc<GatewayState>>,
    Path(group_id): Path<String>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<Value>> {
    state.membership_service.leave(&group_id, identity.id).await?;
    Ok(Json(json!({ "message": "you have left the group" })))
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub user_id: String,
}

/// `POST /api/groups/:group_id/invite` — admin/moderator only.
pub async fn invite_member(
    State(state): State<Arc<GatewayState>>,
    Path(group_id): Path<String>,
    Extension(identity): Extension<UserIdentity>,
    Json(request): Json<InviteRequest>,
) -> GatewayResult<Json<MembershipResponse>> {
    let target = state
        .authenticator
        .fetch_identity_by_public_id(&request.user_id)
        .await
        .map_err(|_| GatewayError::NotFound(format!("user {} not found", request.user_id)))?;

    let membership = state
        .membership_service
        .invite(&group_id, identity.id, target.id)
        .await?;
    Ok(Json(
        MembershipResponse::resolve(&state, &group_id, membership).await?,
    ))
}

/// `POST /api/groups/:group_id/invite/decline` — decline one's own invite.
pub async fn decline_invite(
    State(state): State<Arc<GatewayState>>,
    Path(group_id): Path<String>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<Value>> {
    state
        .membership_service
        .decline_invite(&group_id, identity.id)
        .await?;
    Ok(Json(json!({ "message": "invite declined" })))
}

/// `POST /api/groups/:group_id/members/:user_id/accept`
pub async fn accept_request(
    State(state): State<Arc<GatewayState>>,
    Path((group_id, user_id)): Path<(String, String)>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<MembershipResponse>> {
    let target = state
        .authenticator
        .fetch_identity_by_public_id(&user_id)
        .await
        .map_err(|_| GatewayError::NotFound(format!("user {user_id} not found")))?;

    let membership = state
        .membership_service
        .accept_request(&group_id, identity.id, target.id)
        .await?;
    Ok(Json(
        MembershipResponse::resolve(&state, &group_id, membership).await?,
    ))
}

/// `POST /api/groups/:group_id/members/:user_id/reject`
pub async fn reject_request(
    State(state): State<Arc<GatewayState>>,
    Path((group_id, user_id)): Path<(String, String)>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<Value>> {
    let target = state
        .authenticator
        .fetch_identity_by_public_id(&user_id)
        .await
        .map_err(|_| GatewayError::NotFound(format!("user {user_id} not found")))?;

    state
        .membership_service
        .reject_request(&group_id, identity.id, target.id)
        .await?;
    Ok(Json(json!({ "message": "join request rejected" })))
}

/// `POST /api/groups/:group_id/members/:user_id/remove` — admin only.
pub async fn remove_member(
    State(state): State<Arc<GatewayState>>,
    Path((group_id, user_id)): Path<(String, String)>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<Value>> {
    let target = state
        .authenticator
        .fetch_identity_by_public_id(&user_id)
        .await
        .map_err(|_| GatewayError::NotFound(format!("user {user_id} not found")))?;

    state
        .membership_service
        .remove(&group_id, identity.id, target.id)
        .await?;
    Ok(Json(json!({ "message": "member removed from group" })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// `PATCH /api/groups/:group_id/members/:user_id/role` — admin only.
pub async fn update_member_role(
    State(state): State<Arc<GatewayState>>,
    Path((group_id, user_id)): Path<(String, String)>,
    Extension(identity): Extension<UserIdentity>,
    Json(request): Json<UpdateRoleRequest>,
) -> GatewayResult<Json<MembershipResponse>> {
    let new_role = match request.role.as_str() {
        "admin" => MemberRole::Admin,
        "moderator" => MemberRole::Moderator,
        "member" => MemberRole::Member,
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "unknown role: {other}"
            )))
        }
    };

    let target = state
        .authenticator
        .fetch_identity_by_public_id(&user_id)
        .await
        .map_err(|_| GatewayError::NotFound(format!("user {user_id} not found")))?;

    let membership = state
        .membership_service
        .set_role(&group_id, identity.id, target.id, new_role)
        .await?;
    Ok(Json(
        MembershipResponse::resolve(&state, &group_id, membership).await?,
    ))
}
