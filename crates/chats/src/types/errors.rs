//! Error types for the messaging core.

use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the messaging core
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("group not found: {id}")]
    GroupNotFound { id: String },

    #[error("membership not found")]
    MembershipNotFound,

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },
}

impl ChatError {
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::ConversationNotFound { id: id.into() }
    }

    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::GroupNotFound { id: id.into() }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}
