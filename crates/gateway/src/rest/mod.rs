//! REST endpoints for the gateway.
//!
//! The companion surface to the WebSocket protocol: history backfill and
//! batch read marks share the exact service calls the protocol handler
//! uses, so REST and WebSocket clients observe identical state. Group
//! CRUD itself belongs to the surrounding platform; only the membership
//! operations that gate chat access live here.

pub mod health;
pub mod members;
pub mod messages;

use axum::{
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::middleware::auth_middleware;
use crate::state::GatewayState;

/// Create all REST routes
pub fn create_rest_routes(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route(
            "/api/conversations/:conversation_id/messages",
            get(messages::list_messages),
        )
        .route(
            "/api/conversations/:conversation_id/messages/read",
            post(messages::mark_read),
        )
        .route("/api/groups/:group_id/join", post(members::join_group))
        .route("/api/groups/:group_id/leave", post(members::leave_group))
        .route("/api/groups/:group_id/invite", post(members::invite_member))
        .route(
            "/api/groups/:group_id/invite/decline",
            post(members::decline_invite),
        )
        .route(
            "/api/groups/:group_id/members/:user_id/accept",
            post(members::accept_request),
        )
        .route(
            "/api/groups/:group_id/members/:user_id/reject",
            post(members::reject_request),
        )
        .route(
            "/api/groups/:group_id/members/:user_id/remove",
            post(members::remove_member),
        )
        .route(
            "/api/groups/:group_id/members/:user_id/role",
            patch(members::update_member_role),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
}
