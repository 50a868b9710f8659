//! Socket event contracts.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Client frames are parsed by name first so that an unknown event or a bad
//! payload can be answered with an `error` event naming the culprit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{MessageResponse, MessageType, Reaction};

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: Option<String>,
    pub conversation_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdPayload {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIdPayload {
    pub conversation_id: String,
}

/// Call signalling payload; `signal` is relayed untouched
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    #[serde(alias = "userToCall")]
    pub to: String,
    #[serde(default, alias = "signalData")]
    pub signal: Value,
    pub call_type: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SendMessage(SendMessagePayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(MessageIdPayload),
    MarkAsRead(ConversationIdPayload),
    GetOnlineUsers,
    CallUser(CallPayload),
    AcceptCall(CallPayload),
    RejectCall(CallPayload),
}

impl ClientEvent {
    /// Parse a text frame. The error string is suitable for an `error` event.
    pub fn parse(text: &str) -> Result<Self, String> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| format!("Malformed frame: {}", e))?;

        fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, String> {
            serde_json::from_value(data).map_err(|e| format!("Invalid payload for {}: {}", event, e))
        }

        let event = frame.event.as_str();
        match event {
            "sendMessage" => payload(event, frame.data).map(ClientEvent::SendMessage),
            "editMessage" => payload(event, frame.data).map(ClientEvent::EditMessage),
            "deleteMessage" => payload(event, frame.data).map(ClientEvent::DeleteMessage),
            "markAsRead" => payload(event, frame.data).map(ClientEvent::MarkAsRead),
            "getOnlineUsers" => Ok(ClientEvent::GetOnlineUsers),
            "call-user" => payload(event, frame.data).map(ClientEvent::CallUser),
            "accept-call" => payload(event, frame.data).map(ClientEvent::AcceptCall),
            "reject-call" => payload(event, frame.data).map(ClientEvent::RejectCall),
            other => Err(format!("Unknown event: {}", other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::EditMessage(_) => "editMessage",
            ClientEvent::DeleteMessage(_) => "deleteMessage",
            ClientEvent::MarkAsRead(_) => "markAsRead",
            ClientEvent::GetOnlineUsers => "getOnlineUsers",
            ClientEvent::CallUser(_) => "call-user",
            ClientEvent::AcceptCall(_) => "accept-call",
            ClientEvent::RejectCall(_) => "reject-call",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(MessageResponse),
    #[serde(rename = "messageSent")]
    MessageSent(MessageResponse),
    #[serde(rename = "messageEdited")]
    MessageEdited(MessageResponse),
    #[serde(rename = "messageDeleted")]
    MessageDeleted {
        message_id: String,
        conversation_id: String,
    },
    #[serde(rename = "messageReaction")]
    MessageReaction {
        message_id: String,
        conversation_id: String,
        reactions: Vec<Reaction>,
    },
    #[serde(rename = "unreadCountReset")]
    UnreadCountReset { conversation_id: String },
    #[serde(rename = "conversationRead")]
    ConversationRead {
        conversation_id: String,
        user_id: String,
        read_at: String,
    },
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),
    #[serde(rename = "userStatus")]
    UserStatus {
        user_id: String,
        is_online: bool,
        last_online: String,
    },
    #[serde(rename = "incoming-call")]
    IncomingCall {
        from: String,
        signal: Value,
        call_type: Option<String>,
    },
    #[serde(rename = "call-accepted")]
    CallAccepted { from: String, signal: Value },
    #[serde(rename = "call-rejected")]
    CallRejected { from: String, reason: Option<String> },
    #[serde(rename = "error")]
    Error {
        message: String,
        event: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>, event: Option<&str>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            event: event.map(str::to_string),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize server event");
            r#"{"event":"error","data":{"message":"Internal error"}}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_send_message() {
        let event = ClientEvent::parse(
            r#"{"event":"sendMessage","data":{"receiverId":"u2","content":"Chào bạn"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(p) => {
                assert_eq!(p.receiver_id.as_deref(), Some("u2"));
                assert_eq!(p.message_type, MessageType::Text);
                assert!(p.conversation_id.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_events_without_data() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"getOnlineUsers"}"#).unwrap(),
            ClientEvent::GetOnlineUsers
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"getOnlineUsers","data":{}}"#).unwrap(),
            ClientEvent::GetOnlineUsers
        );
    }

    #[test]
    fn test_parse_call_aliases() {
        let event = ClientEvent::parse(
            r#"{"event":"call-user","data":{"userToCall":"u9","signalData":{"sdp":"x"}}}"#,
        )
        .unwrap();
        assert_eq!(event.name(), "call-user");
        match event {
            ClientEvent::CallUser(p) => {
                assert_eq!(p.to, "u9");
                assert_eq!(p.signal, json!({"sdp": "x"}));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_name_the_problem() {
        let err = ClientEvent::parse(r#"{"event":"launchRocket","data":{}}"#).unwrap_err();
        assert!(err.contains("launchRocket"));

        let err = ClientEvent::parse(r#"{"event":"editMessage","data":{"content":"x"}}"#).unwrap_err();
        assert!(err.contains("editMessage"));

        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn test_server_event_wire_shape() {
        let value: Value = serde_json::from_str(
            &ServerEvent::UnreadCountReset {
                conversation_id: "c1".to_string(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(value, json!({"event": "unreadCountReset", "data": {"conversationId": "c1"}}));

        let value = serde_json::to_value(ServerEvent::OnlineUsers(vec!["a".into()])).unwrap();
        assert_eq!(value, json!({"event": "onlineUsers", "data": ["a"]}));

        let value = serde_json::to_value(ServerEvent::CallRejected {
            from: "u1".into(),
            reason: None,
        })
        .unwrap();
        assert_eq!(value["event"], "call-rejected");
        assert_eq!(value["data"]["from"], "u1");
    }
}
