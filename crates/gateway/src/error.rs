//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("broadcast error: {0}")]
    BroadcastError(String),

    #[error("internal server error: {0}")]
    InternalError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) | GatewayError::InvariantViolation(_) => StatusCode::CONFLICT,
            GatewayError::DatabaseError(_)
            | GatewayError::BroadcastError(_)
            | GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": status.as_str(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<studycircle_chats::ChatError> for GatewayError {
    fn from(error: studycircle_chats::ChatError) -> Self {
        use studycircle_chats::ChatError;
        match error {
            ChatError::ConversationNotFound { id } => {
                GatewayError::NotFound(format!("conversation {id} not found"))
            }
            ChatError::GroupNotFound { id } => {
                GatewayError::NotFound(format!("group {id} not found"))
            }
            ChatError::MembershipNotFound => {
                GatewayError::NotFound("membership not found".to_string())
            }
            ChatError::PermissionDenied { reason } => GatewayError::AuthorizationFailed(reason),
            ChatError::Validation { message } => GatewayError::InvalidRequest(message),
            ChatError::InvariantViolation { message } => GatewayError::InvariantViolation(message),
            ChatError::Conflict { message } => GatewayError::Conflict(message),
            ChatError::Database(error) => GatewayError::DatabaseError(error.to_string()),
        }
    }
}

impl From<studycircle_auth::AuthError> for GatewayError {
    fn from(error: studycircle_auth::AuthError) -> Self {
        use studycircle_auth::AuthError;
        match error {
            AuthError::SessionNotFound | AuthError::SessionExpired | AuthError::InvalidSession => {
                GatewayError::AuthenticationFailed(error.to_string())
            }
            AuthError::UserNotFound => GatewayError::NotFound("user not found".to_string()),
            AuthError::Database(error) => GatewayError::DatabaseError(error.to_string()),
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(error: sqlx::Error) -> Self {
        GatewayError::DatabaseError(error.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        GatewayError::InvalidRequest(format!("JSON serialization error: {}", error))
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(error: redis::RedisError) -> Self {
        GatewayError::BroadcastError(error.to_string())
    }
}
