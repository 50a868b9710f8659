//! Chat socket: one connection per user carrying `{"event", "data"}` frames.
//!
//! The handler only authenticates, parses frames and calls `MessageService`.
//! Outbound events reach the socket through the connection's channel, drained
//! by a writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::{authenticate, extract_token};
use super::error::ApiError;
use super::metrics::{ws_connection_closed, ws_connection_opened};
use crate::chat::{ClientEvent, ConnectionHandle, NewMessage, ServerEvent};
use crate::engine::ServiceError;
use crate::AppState;

#[derive(Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// GET /api/ws?token=<accessToken>; the `accessToken` cookie also works
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .or_else(|| extract_token(&headers))
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    let user = authenticate(&state, &token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user.id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (handle, mut events) = ConnectionHandle::channel();
    let own = handle.clone();
    let connection_id = handle.connection_id().to_string();

    state.registry.register(&user_id, handle);
    ws_connection_opened();
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "Socket connected");

    if let Err(e) = state.messages.set_presence(&user_id, true).await {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to record presence");
    }

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sender.send(Message::Text(event.to_json())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&state, &user_id, &own, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = %e, "Socket read error");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    ws_connection_closed();

    // A newer connection for the same user keeps them online
    if state.registry.unregister(&user_id, &connection_id) {
        if let Err(e) = state.messages.set_presence(&user_id, false).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to record presence");
        }
    }
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "Socket disconnected");
}

/// Parse and dispatch one text frame. Failures become an `error` event on
/// the originating connection; the socket stays open.
async fn handle_client_frame(state: &AppState, user_id: &str, own: &ConnectionHandle, text: &str) {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(message) => {
            tracing::debug!(user_id = %user_id, error = %message, "Rejected socket frame");
            own.send(ServerEvent::error(message, None));
            return;
        }
    };

    let name = event.name();
    if let Err(e) = dispatch(state, user_id, own, event).await {
        own.send(ServerEvent::error(error_message(&e), Some(name)));
    }
}

fn error_message(err: &ServiceError) -> String {
    match err {
        ServiceError::Database(e) => {
            tracing::error!(error = %e, "Database error while handling socket event");
            "Internal server error".to_string()
        }
        other => other.to_string(),
    }
}

async fn dispatch(
    state: &AppState,
    user_id: &str,
    own: &ConnectionHandle,
    event: ClientEvent,
) -> Result<(), ServiceError> {
    let name = event.name();
    match event {
        ClientEvent::SendMessage(payload) => {
            // messageSent goes back to the sender from the service
            state
                .messages
                .send_message(
                    user_id,
                    NewMessage {
                        content: payload.content,
                        receiver_id: payload.receiver_id,
                        conversation_id: payload.conversation_id,
                        message_type: payload.message_type,
                    },
                )
                .await?;
        }
        ClientEvent::EditMessage(payload) => {
            let message = state
                .messages
                .edit_message(user_id, &payload.message_id, &payload.content)
                .await?;
            own.send(ServerEvent::MessageEdited(message));
        }
        ClientEvent::DeleteMessage(payload) => {
            let deleted = state
                .messages
                .delete_message(user_id, &payload.message_id)
                .await?;
            own.send(ServerEvent::MessageDeleted {
                message_id: deleted.message_id,
                conversation_id: deleted.conversation_id,
            });
        }
        ClientEvent::MarkAsRead(payload) => {
            state
                .messages
                .mark_as_read(user_id, &payload.conversation_id)
                .await?;
        }
        ClientEvent::GetOnlineUsers => {
            own.send(ServerEvent::OnlineUsers(state.messages.online_users()));
        }
        ClientEvent::CallUser(payload) => {
            let event = ServerEvent::IncomingCall {
                from: user_id.to_string(),
                signal: payload.signal,
                call_type: payload.call_type,
            };
            relay(state, own, &payload.to, event, name);
        }
        ClientEvent::AcceptCall(payload) => {
            let event = ServerEvent::CallAccepted {
                from: user_id.to_string(),
                signal: payload.signal,
            };
            relay(state, own, &payload.to, event, name);
        }
        ClientEvent::RejectCall(payload) => {
            let event = ServerEvent::CallRejected {
                from: user_id.to_string(),
                reason: payload.reason,
            };
            relay(state, own, &payload.to, event, name);
        }
    }
    Ok(())
}

fn relay(state: &AppState, own: &ConnectionHandle, to: &str, event: ServerEvent, name: &str) {
    if !state.messages.relay_call(to, event) {
        own.send(ServerEvent::error("User is offline", Some(name)));
    }
}
