//! # StudyCircle Gateway Crate
//!
//! The HTTP surface of the messaging core: WebSocket sessions for
//! real-time chat plus the companion REST endpoints for history backfill
//! and membership operations.
//!
//! ## Architecture
//!
//! - **websocket**: session manager, broadcast router, per-connection
//!   protocol handler
//! - **rest**: history backfill, read marks, membership role operations
//! - **state**: shared services behind one `Arc`
//! - **middleware**: bearer-credential authentication

pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
pub use state::GatewayState;
pub use websocket::{BroadcastRouter, SessionManager};

use axum::{http::Method, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(rest::create_rest_routes(state.clone()))
        .merge(websocket::create_websocket_routes().with_state(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
