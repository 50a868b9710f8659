//! REST surface of the chat: the same `MessageService` operations the socket
//! exposes, so both paths share validation, persistence and fan-out.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::chat::{DeletedMessage, NewMessage, ReactionResult, ReadResult};
use crate::db::{
    ConversationResponse, CreateConversationRequest, EditMessageRequest, MessageHistoryQuery,
    MessageResponse, PostMessageRequest, ReactionRequest,
};
use crate::AppState;

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let conversations = state.messages.list_conversations(auth.id()).await?;
    Ok(Json(conversations))
}

/// Find or create the two-party conversation with `participantId`
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation = state
        .messages
        .find_or_create_conversation(auth.id(), &req.participant_id)
        .await?;
    let response = state
        .messages
        .get_conversation(auth.id(), &conversation.id)
        .await?;
    Ok(Json(response))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageHistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = state
        .messages
        .list_messages(auth.id(), &conversation_id, query.before.as_deref(), query.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(conversation_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let message = state
        .messages
        .send_message(
            auth.id(),
            NewMessage {
                content: req.content,
                receiver_id: None,
                conversation_id: Some(conversation_id),
                message_type: req.message_type.unwrap_or_default(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<ReadResult>, ApiError> {
    let result = state.messages.mark_as_read(auth.id(), &conversation_id).await?;
    Ok(Json(result))
}

pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = state
        .messages
        .edit_message(auth.id(), &message_id, &req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<DeletedMessage>, ApiError> {
    let deleted = state.messages.delete_message(auth.id(), &message_id).await?;
    Ok(Json(deleted))
}

/// Toggle the caller's reaction on a message
pub async fn react_to_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<ReactionResult>, ApiError> {
    let result = state
        .messages
        .toggle_reaction(auth.id(), &message_id, &req.emoji)
        .await?;
    Ok(Json(result))
}
