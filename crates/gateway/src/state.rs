//! Shared application state for the gateway

use std::sync::Arc;

use sqlx::SqlitePool;
use studycircle_auth::Authenticator;
use studycircle_chats::{MembershipService, MessageService};
use studycircle_config::ChatConfig;

use crate::websocket::{BroadcastRouter, SessionManager};

/// Shared application state containing the domain services, the session
/// registry, and the broadcast router handle.
pub struct GatewayState {
    pub pool: SqlitePool,
    pub authenticator: Authenticator,
    pub message_service: MessageService,
    pub membership_service: MembershipService,
    pub sessions: Arc<SessionManager>,
    pub router: BroadcastRouter,
}

impl GatewayState {
    pub fn new(
        pool: SqlitePool,
        authenticator: Authenticator,
        router: BroadcastRouter,
        chat_config: ChatConfig,
    ) -> Self {
        Self {
            message_service: MessageService::new(pool.clone(), chat_config),
            membership_service: MembershipService::new(pool.clone()),
            sessions: Arc::new(SessionManager::new(router.registry())),
            pool,
            authenticator,
            router,
        }
    }
}
