//! Per-connection WebSocket protocol handler.
//!
//! Connection lifecycle: authenticate and authorize before the upgrade is
//! accepted (a failed check closes the connection without ever registering
//! a session), register with the session manager, emit
//! `connection_established`, then process inbound frames strictly in
//! arrival order. A malformed frame or failed authorization answers only
//! the offending connection with an `error` event; the connection stays
//! open. Cleanup runs exactly once through a drop guard, including on
//! abnormal closes and server shutdown.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use studycircle_auth::UserIdentity;
use studycircle_chats::{ChatResult, ClientEvent, ServerEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::middleware::extract_token;
use crate::state::GatewayState;

use super::session::SessionGuard;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// `GET /ws/conversations/:conversation_id`
pub async fn conversation_websocket_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    Query(query): Query<WebSocketQuery>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Result<Response, GatewayError> {
    let token = extract_token(&headers, None)
        .or(query.token)
        .ok_or_else(|| {
            GatewayError::AuthenticationFailed("missing authentication token".to_string())
        })?;

    let (identity, _session) = state.authenticator.authenticate_token(&token).await?;

    // Authorize before the upgrade: a caller without an active membership
    // (or direct participation) is refused and never registered.
    state
        .message_service
        .authorize_participant(&conversation_id, identity.id)
        .await?;

    Ok(ws.on_upgrade(move |socket| {
        handle_conversation_socket(socket, state, identity, conversation_id)
    }))
}

async fn handle_conversation_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    identity: UserIdentity,
    conversation_id: String,
) {
    let (session_id, events) = state.sessions.register(&conversation_id, &identity);
    let _guard = SessionGuard::new(state.sessions.clone(), session_id);

    let (sink, mut stream) = socket.split();

    // Direct lane for events addressed to this connection only: the
    // welcome frame and per-event errors.
    let (direct_tx, direct_rx) = mpsc::channel::<ServerEvent>(16);

    let send_task = tokio::spawn(send_pump(
        sink,
        events,
        direct_rx,
        identity.public_id.clone(),
    ));

    let _ = direct_tx
        .send(ServerEvent::ConnectionEstablished {
            message: "Connected to conversation".to_string(),
        })
        .await;

    // One frame at a time, each handled to completion before the next is
    // read. A client's `chat_message` followed by `message_read` on its
    // own message therefore persists in that order.
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                debug!(session = %session_id, %error, "websocket read failed");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                handle_frame(&state, &identity, &conversation_id, &text, &direct_tx).await;
            }
            Message::Binary(_) => {
                let _ = direct_tx
                    .send(ServerEvent::Error {
                        message: "binary frames are not supported".to_string(),
                    })
                    .await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    send_task.abort();
    // _guard drops here and deregisters the session exactly once, also
    // when this task is cancelled during shutdown.
}

async fn send_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<ServerEvent>,
    mut direct_rx: mpsc::Receiver<ServerEvent>,
    own_public_id: String,
) {
    loop {
        let event = tokio::select! {
            direct = direct_rx.recv() => match direct {
                Some(event) => event,
                None => break,
            },
            broadcasted = events.recv() => match broadcasted {
                Ok(event) => {
                    // A typing indicator is never echoed back to the user
                    // who produced it.
                    if event.typing_origin() == Some(own_public_id.as_str()) {
                        continue;
                    }
                    event
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The client reconciles through history backfill.
                    warn!(skipped, "session lagged behind conversation broadcast");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn handle_frame(
    state: &Arc<GatewayState>,
    identity: &UserIdentity,
    conversation_id: &str,
    text: &str,
    direct_tx: &mpsc::Sender<ServerEvent>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(error) => {
            debug!(user = %identity.public_id, %error, "rejected malformed frame");
            let _ = direct_tx
                .send(ServerEvent::Error {
                    message: "invalid or unknown message type".to_string(),
                })
                .await;
            return;
        }
    };

    let result = match event {
        ClientEvent::ChatMessage { content } => {
            handle_chat_message(state, identity, conversation_id, &content).await
        }
        ClientEvent::TypingIndicator { is_typing } => {
            handle_typing_indicator(state, identity, conversation_id, is_typing).await
        }
        ClientEvent::MessageRead { message_ids } => {
            handle_message_read(state, identity, conversation_id, &message_ids).await
        }
    };

    if let Err(error) = result {
        debug!(user = %identity.public_id, %error, "inbound event rejected");
        let _ = direct_tx
            .send(ServerEvent::Error {
                message: error.to_string(),
            })
            .await;
    }
}

async fn handle_chat_message(
    state: &Arc<GatewayState>,
    identity: &UserIdentity,
    conversation_id: &str,
    content: &str,
) -> ChatResult<()> {
    // Persist first; the broadcast below only ever follows the committed
    // insert, so a receiver can immediately fetch the message via history.
    let (_conversation, message) = state
        .message_service
        .append(conversation_id, identity.id, content)
        .await?;

    let event = ServerEvent::ChatMessage {
        message_id: message.public_id,
        sender_id: identity.public_id.clone(),
        sender_name: identity.display_label().to_string(),
        sender_avatar: identity.avatar_url.clone(),
        content: message.content,
        created_at: message.created_at,
    };

    if let Err(error) = state.router.publish(conversation_id, &event).await {
        // The message is durable; the sender is not shown an error and the
        // persist is never retried.
        warn!(conversation = %conversation_id, %error, "broadcast failed after persist");
    }

    Ok(())
}

async fn handle_typing_indicator(
    state: &Arc<GatewayState>,
    identity: &UserIdentity,
    conversation_id: &str,
    is_typing: bool,
) -> ChatResult<()> {
    // Membership may have changed since connect; re-check on every event.
    state
        .message_service
        .authorize_participant(conversation_id, identity.id)
        .await?;

    state
        .sessions
        .set_typing(conversation_id, identity.id, is_typing);

    let event = ServerEvent::TypingIndicator {
        user_id: identity.public_id.clone(),
        user_name: identity.display_label().to_string(),
        is_typing,
    };

    if let Err(error) = state.router.publish(conversation_id, &event).await {
        warn!(conversation = %conversation_id, %error, "typing broadcast failed");
    }

    Ok(())
}

async fn handle_message_read(
    state: &Arc<GatewayState>,
    identity: &UserIdentity,
    conversation_id: &str,
    message_ids: &[String],
) -> ChatResult<()> {
    let outcome = state
        .message_service
        .mark_read(conversation_id, identity.id, message_ids)
        .await?;

    if outcome.updated > 0 {
        let event = ServerEvent::MessagesRead {
            user_id: identity.public_id.clone(),
            message_ids: outcome.message_ids,
            read_at: outcome.read_at,
        };
        if let Err(error) = state.router.publish(conversation_id, &event).await {
            warn!(conversation = %conversation_id, %error, "read-receipt broadcast failed");
        }
    }

    Ok(())
}
