//! Conversation and message models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Call,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Call => "call",
            MessageType::System => "system",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "call" => Ok(MessageType::Call),
            "system" => Ok(MessageType::System),
            _ => Err(format!("Unknown message type: {}", s)),
        }
    }
}

/// Order-independent key for a two-party conversation
pub fn participant_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: String,
    pub participant_key: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_type: Option<String>,
    pub last_message_at: Option<String>,
    pub last_activity: String,
    pub created_at: String,
}

impl Conversation {
    pub fn last_message(&self) -> Option<LastMessage> {
        Some(LastMessage {
            id: self.last_message_id.clone()?,
            content: self.last_message_content.clone().unwrap_or_default(),
            sender_id: self.last_message_sender_id.clone().unwrap_or_default(),
            message_type: self
                .last_message_type
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
            created_at: self.last_message_at.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationParticipant {
    pub conversation_id: String,
    pub user_id: String,
    pub unread_count: i64,
    pub last_read_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
}

impl Message {
    pub fn message_type_enum(&self) -> MessageType {
        self.message_type.parse().unwrap_or_default()
    }
}

/// Denormalized snapshot of a conversation's latest message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
    pub read_by: Vec<ReadReceipt>,
    pub reactions: Vec<Reaction>,
}

impl MessageResponse {
    pub fn new(message: Message, read_by: Vec<ReadReceipt>, reactions: Vec<Reaction>) -> Self {
        let message_type = message.message_type_enum();
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            is_deleted: message.is_deleted,
            created_at: message.created_at,
            read_by,
            reactions,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: String,
}

/// A conversation as seen by one of its participants
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub id: String,
    pub participants: Vec<ParticipantSummary>,
    pub last_message: Option<LastMessage>,
    pub last_activity: String,
    pub unread_count: i64,
    pub last_read_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub content: String,
    pub message_type: Option<MessageType>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    /// Only messages created strictly before this timestamp
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_key_is_order_independent() {
        assert_eq!(participant_key("b", "a"), "a:b");
        assert_eq!(participant_key("a", "b"), participant_key("b", "a"));
    }

    #[test]
    fn test_last_message_requires_id() {
        let mut conversation = Conversation {
            id: "c1".into(),
            participant_key: Some("a:b".into()),
            last_message_id: None,
            last_message_content: None,
            last_message_sender_id: None,
            last_message_type: None,
            last_message_at: None,
            last_activity: "2024-06-01T09:00:00.000Z".into(),
            created_at: "2024-06-01T09:00:00.000Z".into(),
        };
        assert!(conversation.last_message().is_none());

        conversation.last_message_id = Some("m1".into());
        conversation.last_message_content = Some("xin chào".into());
        conversation.last_message_type = Some("image".into());
        let last = conversation.last_message().unwrap();
        assert_eq!(last.content, "xin chào");
        assert_eq!(last.message_type, MessageType::Image);
    }
}
