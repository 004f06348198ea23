//! Message history and read-mark endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use studycircle_auth::UserIdentity;
use studycircle_chats::ServerEvent;
use studycircle_database::Message;
use tracing::warn;

use crate::error::GatewayResult;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
    pub read_by: Vec<String>,
}

impl MessageResponse {
    fn from_message(conversation_id: &str, message: Message) -> Self {
        Self {
            id: message.public_id,
            conversation_id: conversation_id.to_string(),
            sender_id: message.sender_public_id,
            content: message.content,
            created_at: message.created_at,
            read_by: message.read_by,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessagePageResponse {
    pub messages: Vec<MessageResponse>,
    pub next_cursor: Option<String>,
}

/// `GET /api/conversations/:conversation_id/messages`
///
/// Ordered ascending, paginated by opaque cursor. The backfill path for
/// reconnecting clients; semantics are identical to what the WebSocket
/// layer observes.
pub async fn list_messages(
    State(state): State<Arc<GatewayState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
    Extension(identity): Extension<UserIdentity>,
) -> GatewayResult<Json<MessagePageResponse>> {
    let page = state
        .message_service
        .list_since(
            &conversation_id,
            identity.id,
            query.cursor.as_deref(),
            query.limit,
        )
        .await?;

    Ok(Json(MessagePageResponse {
        messages: page
            .messages
            .into_iter()
            .map(|message| MessageResponse::from_message(&conversation_id, message))
            .collect(),
        next_cursor: page.next_cursor,
    }))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
    pub message_ids: Vec<String>,
    pub read_at: String,
}

/// `POST /api/conversations/:conversation_id/messages/read`
///
/// Batch read marks with the same silent-ignore and idempotency semantics
/// as the WebSocket `message_read` event, including the broadcast.
pub async fn mark_read(
    State(state): State<Arc<GatewayState>>,
    Path(conversation_id): Path<String>,
    Extension(identity): Extension<UserIdentity>,
    Json(request): Json<MarkReadRequest>,
) -> GatewayResult<Json<MarkReadResponse>> {
    let outcome = state
        .message_service
        .mark_read(&conversation_id, identity.id, &request.message_ids)
        .await?;

    if outcome.updated > 0 {
        let event = ServerEvent::MessagesRead {
            user_id: identity.public_id.clone(),
            message_ids: outcome.message_ids.clone(),
            read_at: outcome.read_at.clone(),
        };
        if let Err(error) = state.router.publish(&conversation_id, &event).await {
            warn!(conversation = %conversation_id, %error, "read-receipt broadcast failed");
        }
    }

    Ok(Json(MarkReadResponse {
        updated: outcome.updated,
        message_ids: outcome.message_ids,
        read_at: outcome.read_at,
    }))
}
