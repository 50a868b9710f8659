//! Conversation and message business logic.
//!
//! Transport code (socket and HTTP handlers) parses input and calls into
//! `MessageService`; persistence and fan-out happen here. Fan-out is
//! best-effort: offline participants are skipped and nothing is replayed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;

use super::events::ServerEvent;
use super::registry::ConnectionRegistry;
use crate::api::metrics::record_message_sent;
use crate::config::ChatConfig;
use crate::db::{
    begin_write, now_rfc3339, participant_key, Conversation, ConversationParticipant,
    ConversationResponse, DbPool, Message, MessageResponse, MessageType, ParticipantSummary,
    Reaction, ReadReceipt,
};
use crate::engine::{ServiceError, ServiceResult};

pub const MAX_MESSAGE_LENGTH: usize = 5000;
pub const MAX_EMOJI_LENGTH: usize = 16;

/// Input of `MessageService::send_message`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub receiver_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub conversation_id: String,
    pub read_at: String,
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResult {
    pub message_id: String,
    pub conversation_id: String,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub message_id: String,
    pub conversation_id: String,
}

fn validate_content(content: &str) -> ServiceResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation("content", "Message content cannot be empty"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ServiceError::validation(
            "content",
            format!("Message content cannot exceed {} characters", MAX_MESSAGE_LENGTH),
        ));
    }
    Ok(trimmed.to_string())
}

/// Whether a message created at `created_at` may still be edited at `now`
pub fn within_edit_window(created_at: &str, now: DateTime<Utc>, window_minutes: i64) -> bool {
    DateTime::parse_from_rfc3339(created_at)
        .map(|created| now - created.with_timezone(&Utc) <= Duration::minutes(window_minutes))
        .unwrap_or(false)
}

async fn fetch_message(conn: &mut SqliteConnection, message_id: &str) -> ServiceResult<Message> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
        .bind(message_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Message"))
}

async fn fetch_conversation(conn: &mut SqliteConnection, conversation_id: &str) -> ServiceResult<Conversation> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Conversation"))
}

async fn participant_ids(conn: &mut SqliteConnection, conversation_id: &str) -> ServiceResult<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT user_id FROM conversation_participants WHERE conversation_id = ? ORDER BY user_id",
    )
    .bind(conversation_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// The caller's participant row; `Forbidden` when they are not in the conversation
async fn require_participant(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    user_id: &str,
) -> ServiceResult<ConversationParticipant> {
    fetch_conversation(conn, conversation_id).await?;
    sqlx::query_as::<_, ConversationParticipant>(
        "SELECT * FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ServiceError::forbidden("You are not a participant in this conversation"))
}

async fn message_extras(
    conn: &mut SqliteConnection,
    message_id: &str,
) -> ServiceResult<(Vec<ReadReceipt>, Vec<Reaction>)> {
    let read_by = sqlx::query_as::<_, ReadReceipt>(
        "SELECT user_id, read_at FROM message_reads WHERE message_id = ? ORDER BY read_at",
    )
    .bind(message_id)
    .fetch_all(&mut *conn)
    .await?;
    let reactions = sqlx::query_as::<_, Reaction>(
        "SELECT user_id, emoji FROM message_reactions WHERE message_id = ? ORDER BY created_at, user_id",
    )
    .bind(message_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok((read_by, reactions))
}

pub struct MessageService {
    db: DbPool,
    registry: Arc<ConnectionRegistry>,
    config: ChatConfig,
}

impl MessageService {
    pub fn new(db: DbPool, registry: Arc<ConnectionRegistry>, config: ChatConfig) -> Self {
        Self { db, registry, config }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `event` to every participant except `skip`
    fn fan_out(&self, participants: &[String], skip: &str, event: &ServerEvent) -> usize {
        participants
            .iter()
            .filter(|id| id.as_str() != skip)
            .filter(|id| self.registry.send(id, event.clone()))
            .count()
    }

    /// Find the two-party conversation between `user_id` and `other_id`,
    /// creating it on first contact
    pub async fn find_or_create_conversation(
        &self,
        user_id: &str,
        other_id: &str,
    ) -> ServiceResult<Conversation> {
        if user_id == other_id {
            return Err(ServiceError::validation(
                "participantId",
                "You cannot start a conversation with yourself",
            ));
        }

        let mut tx = begin_write(&self.db).await?;

        let other_active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = ?")
            .bind(other_id)
            .fetch_optional(&mut *tx)
            .await?;
        if other_active != Some(true) {
            return Err(ServiceError::not_found("User"));
        }

        let key = participant_key(user_id, other_id);
        let now = now_rfc3339();
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversations (id, participant_key, last_activity, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&key)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE participant_key = ?",
        )
        .bind(&key)
        .fetch_one(&mut *tx)
        .await?;

        for participant in [user_id, other_id] {
            sqlx::query(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(&conversation.id)
            .bind(participant)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(conversation_id = %conversation.id, "Conversation created");
        }
        Ok(conversation)
    }

    /// Persist a message and push it to the other participants.
    ///
    /// The message row, the last-message snapshot and the unread counters
    /// are written in one transaction; events go out after commit.
    pub async fn send_message(&self, sender_id: &str, input: NewMessage) -> ServiceResult<MessageResponse> {
        let content = validate_content(&input.content)?;

        let conversation_id = match (&input.conversation_id, &input.receiver_id) {
            (Some(id), _) => {
                let mut conn = self.db.acquire().await?;
                require_participant(&mut conn, id, sender_id).await?;
                id.clone()
            }
            (None, Some(receiver_id)) => {
                self.find_or_create_conversation(sender_id, receiver_id)
                    .await?
                    .id
            }
            (None, None) => {
                return Err(ServiceError::validation(
                    "receiverId",
                    "Either a receiver or a conversation is required",
                ))
            }
        };

        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.to_string(),
            content,
            message_type: input.message_type.as_str().to_string(),
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: now_rfc3339(),
        };

        let mut tx = begin_write(&self.db).await?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, message_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(&message.message_type)
        .bind(&message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations SET
                last_message_id = ?, last_message_content = ?, last_message_sender_id = ?,
                last_message_type = ?, last_message_at = ?, last_activity = ?
            WHERE id = ?
            "#,
        )
        .bind(&message.id)
        .bind(&message.content)
        .bind(&message.sender_id)
        .bind(&message.message_type)
        .bind(&message.created_at)
        .bind(&message.created_at)
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET unread_count = CASE WHEN user_id = ? THEN 0 ELSE unread_count + 1 END
            WHERE conversation_id = ?
            "#,
        )
        .bind(sender_id)
        .bind(&conversation_id)
        .execute(&mut *tx)
        .await?;

        let participants = participant_ids(&mut tx, &conversation_id).await?;
        tx.commit().await?;

        let response = MessageResponse::new(message, Vec::new(), Vec::new());
        let delivered = self.fan_out(
            &participants,
            sender_id,
            &ServerEvent::ReceiveMessage(response.clone()),
        );
        self.registry
            .send(sender_id, ServerEvent::MessageSent(response.clone()));

        record_message_sent();
        tracing::debug!(
            message_id = %response.id,
            conversation_id = %conversation_id,
            recipients = participants.len().saturating_sub(1),
            delivered,
            "Message sent"
        );

        Ok(response)
    }

    /// Edit a message's content. Only the sender may edit, only within the
    /// configured window, and never after deletion.
    pub async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> ServiceResult<MessageResponse> {
        let content = validate_content(content)?;
        let mut tx = begin_write(&self.db).await?;

        let message = fetch_message(&mut tx, message_id).await?;
        if message.sender_id != user_id {
            return Err(ServiceError::forbidden("You can only edit your own messages"));
        }
        if message.is_deleted {
            return Err(ServiceError::forbidden("Deleted messages cannot be edited"));
        }
        if !within_edit_window(&message.created_at, Utc::now(), self.config.edit_window_minutes) {
            return Err(ServiceError::forbidden(format!(
                "Messages can only be edited within {} minutes",
                self.config.edit_window_minutes
            )));
        }

        let now = now_rfc3339();
        sqlx::query("UPDATE messages SET content = ?, is_edited = 1, edited_at = ? WHERE id = ?")
            .bind(&content)
            .bind(&now)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE conversations SET last_message_content = ? WHERE id = ? AND last_message_id = ?")
            .bind(&content)
            .bind(&message.conversation_id)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        let updated = fetch_message(&mut tx, message_id).await?;
        let (read_by, reactions) = message_extras(&mut tx, message_id).await?;
        let participants = participant_ids(&mut tx, &message.conversation_id).await?;
        tx.commit().await?;

        let response = MessageResponse::new(updated, read_by, reactions);
        self.fan_out(&participants, user_id, &ServerEvent::MessageEdited(response.clone()));
        Ok(response)
    }

    /// Soft-delete a message: the row stays, its content is cleared
    pub async fn delete_message(&self, user_id: &str, message_id: &str) -> ServiceResult<DeletedMessage> {
        let mut tx = begin_write(&self.db).await?;

        let message = fetch_message(&mut tx, message_id).await?;
        if message.sender_id != user_id {
            return Err(ServiceError::forbidden("You can only delete your own messages"));
        }

        sqlx::query("UPDATE messages SET content = '', is_deleted = 1 WHERE id = ?")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE conversations SET last_message_content = '' WHERE id = ? AND last_message_id = ?")
            .bind(&message.conversation_id)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        let participants = participant_ids(&mut tx, &message.conversation_id).await?;
        tx.commit().await?;

        let deleted = DeletedMessage {
            message_id: message.id,
            conversation_id: message.conversation_id,
        };
        self.fan_out(
            &participants,
            user_id,
            &ServerEvent::MessageDeleted {
                message_id: deleted.message_id.clone(),
                conversation_id: deleted.conversation_id.clone(),
            },
        );
        Ok(deleted)
    }

    /// Zero the caller's unread counter and record read receipts
    pub async fn mark_as_read(&self, user_id: &str, conversation_id: &str) -> ServiceResult<ReadResult> {
        let mut tx = begin_write(&self.db).await?;
        require_participant(&mut tx, conversation_id, user_id).await?;

        let read_at = now_rfc3339();
        sqlx::query(
            r#"
            UPDATE conversation_participants SET unread_count = 0, last_read_at = ?
            WHERE conversation_id = ? AND user_id = ?
            "#,
        )
        .bind(&read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
            SELECT id, ?, ? FROM messages
            WHERE conversation_id = ? AND sender_id != ? AND is_deleted = 0
            "#,
        )
        .bind(user_id)
        .bind(&read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let participants = participant_ids(&mut tx, conversation_id).await?;
        tx.commit().await?;

        self.registry.send(
            user_id,
            ServerEvent::UnreadCountReset {
                conversation_id: conversation_id.to_string(),
            },
        );
        self.fan_out(
            &participants,
            user_id,
            &ServerEvent::ConversationRead {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                read_at: read_at.clone(),
            },
        );

        Ok(ReadResult {
            conversation_id: conversation_id.to_string(),
            read_at,
            unread_count: 0,
        })
    }

    /// Add the caller's reaction, replace it with a different emoji, or
    /// remove it when the same emoji is sent again
    pub async fn toggle_reaction(
        &self,
        user_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> ServiceResult<ReactionResult> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_LENGTH {
            return Err(ServiceError::validation("emoji", "Invalid emoji"));
        }

        let mut tx = begin_write(&self.db).await?;
        let message = fetch_message(&mut tx, message_id).await?;
        require_participant(&mut tx, &message.conversation_id, user_id).await?;
        if message.is_deleted {
            return Err(ServiceError::validation("messageId", "Cannot react to a deleted message"));
        }

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT emoji FROM message_reactions WHERE message_id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.as_deref() == Some(emoji) {
            sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
                .bind(message_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(message_id, user_id) DO UPDATE SET emoji = excluded.emoji
                "#,
            )
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .bind(now_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        let (_, reactions) = message_extras(&mut tx, message_id).await?;
        let participants = participant_ids(&mut tx, &message.conversation_id).await?;
        tx.commit().await?;

        let result = ReactionResult {
            message_id: message.id,
            conversation_id: message.conversation_id,
            reactions,
        };
        let event = ServerEvent::MessageReaction {
            message_id: result.message_id.clone(),
            conversation_id: result.conversation_id.clone(),
            reactions: result.reactions.clone(),
        };
        for participant in &participants {
            self.registry.send(participant, event.clone());
        }
        Ok(result)
    }

    /// Conversations of `user_id`, most recently active first
    pub async fn list_conversations(&self, user_id: &str) -> ServiceResult<Vec<ConversationResponse>> {
        let mut conn = self.db.acquire().await?;
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT c.* FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = ?
            ORDER BY c.last_activity DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut views = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            views.push(self.conversation_view(&mut conn, user_id, conversation).await?);
        }
        Ok(views)
    }

    /// A single conversation as seen by `user_id`
    pub async fn get_conversation(&self, user_id: &str, conversation_id: &str) -> ServiceResult<ConversationResponse> {
        let mut conn = self.db.acquire().await?;
        require_participant(&mut conn, conversation_id, user_id).await?;
        let conversation = fetch_conversation(&mut conn, conversation_id).await?;
        self.conversation_view(&mut conn, user_id, conversation).await
    }

    async fn conversation_view(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        conversation: Conversation,
    ) -> ServiceResult<ConversationResponse> {
        let participants = sqlx::query_as::<_, ParticipantSummary>(
            r#"
            SELECT u.id, u.name, u.avatar_url, u.role FROM users u
            JOIN conversation_participants p ON p.user_id = u.id
            WHERE p.conversation_id = ?
            ORDER BY u.name
            "#,
        )
        .bind(&conversation.id)
        .fetch_all(&mut *conn)
        .await?;

        let own: Option<(i64, Option<String>)> = sqlx::query_as(
            "SELECT unread_count, last_read_at FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(&conversation.id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        let (unread_count, last_read_at) = own.unwrap_or((0, None));

        Ok(ConversationResponse {
            last_message: conversation.last_message(),
            id: conversation.id,
            participants,
            last_activity: conversation.last_activity,
            unread_count,
            last_read_at,
        })
    }

    /// Message history, oldest first. `before` pages backwards.
    pub async fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        before: Option<&str>,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<MessageResponse>> {
        let limit = limit
            .unwrap_or(self.config.history_limit)
            .clamp(1, self.config.history_limit.max(1));

        let mut conn = self.db.acquire().await?;
        require_participant(&mut conn, conversation_id, user_id).await?;

        let mut messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ? AND (? IS NULL OR created_at < ?)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        messages.reverse();
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; messages.len()].join(", ");
        let reads_sql = format!(
            "SELECT message_id, user_id, read_at FROM message_reads \
             WHERE message_id IN ({}) ORDER BY read_at",
            placeholders
        );
        let reactions_sql = format!(
            "SELECT message_id, user_id, emoji FROM message_reactions \
             WHERE message_id IN ({}) ORDER BY created_at, user_id",
            placeholders
        );

        let mut reads_query = sqlx::query_as::<_, (String, String, String)>(&reads_sql);
        let mut reactions_query = sqlx::query_as::<_, (String, String, String)>(&reactions_sql);
        for message in &messages {
            reads_query = reads_query.bind(&message.id);
            reactions_query = reactions_query.bind(&message.id);
        }
        let reads = reads_query.fetch_all(&mut *conn).await?;
        let reactions = reactions_query.fetch_all(&mut *conn).await?;

        let mut reads_by_message: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
        for (message_id, user_id, read_at) in reads {
            reads_by_message
                .entry(message_id)
                .or_default()
                .push(ReadReceipt { user_id, read_at });
        }
        let mut reactions_by_message: HashMap<String, Vec<Reaction>> = HashMap::new();
        for (message_id, user_id, emoji) in reactions {
            reactions_by_message
                .entry(message_id)
                .or_default()
                .push(Reaction { user_id, emoji });
        }

        Ok(messages
            .into_iter()
            .map(|m| {
                let read_by = reads_by_message.remove(&m.id).unwrap_or_default();
                let reactions = reactions_by_message.remove(&m.id).unwrap_or_default();
                MessageResponse::new(m, read_by, reactions)
            })
            .collect())
    }

    /// Record a presence change and broadcast it to everyone else online
    pub async fn set_presence(&self, user_id: &str, online: bool) -> ServiceResult<()> {
        let now = now_rfc3339();
        sqlx::query("UPDATE users SET last_online = ? WHERE id = ?")
            .bind(&now)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        self.registry.broadcast_except(
            Some(user_id),
            &ServerEvent::UserStatus {
                user_id: user_id.to_string(),
                is_online: online,
                last_online: now,
            },
        );
        Ok(())
    }

    pub fn online_users(&self) -> Vec<String> {
        self.registry.online_users()
    }

    /// Relay a call-signalling event to `to`. Returns false when `to` is offline.
    pub fn relay_call(&self, to: &str, event: ServerEvent) -> bool {
        self.registry.send(to, event)
    }
}
