//! WebSocket endpoints for the gateway

pub mod broker;
pub mod chat;
pub mod session;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::state::GatewayState;

pub use broker::{BroadcastRouter, TopicRegistry};
pub use session::{SessionGuard, SessionManager};

/// Create all WebSocket routes
pub fn create_websocket_routes() -> Router<Arc<GatewayState>> {
    Router::new().route(
        "/ws/conversations/:conversation_id",
        get(chat::conversation_websocket_handler),
    )
}
