use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::MessageRecord;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers {
        #[serde(rename = "payload")]
        user_ids: Vec<String>,
    },
    #[serde(rename = "userStatusUpdate", rename_all = "camelCase")]
    UserStatusUpdate {
        user_id: String,
        last_seen: Option<DateTime<Utc>>,
        is_online: bool,
    },
    #[serde(rename = "newMessage")]
    NewMessage {
        #[serde(rename = "payload")]
        message: MessageRecord,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "shutdown", rename_all = "camelCase")]
    Shutdown {
        reason: String,
        reconnect_after_seconds: u64,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn new_message(message: MessageRecord) -> Self {
        Self::NewMessage { message }
    }
}

/// What actually travels through a connection's outbound channel.
///
/// Fan-out paths serialize once and share the text across every channel.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(message)?;
        Ok(Self::Preserialized(Arc::from(text)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(text) => Ok(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_status_update_wire_format() {
        let msg = ServerMessage::UserStatusUpdate {
            user_id: "u1".to_string(),
            last_seen: None,
            is_online: true,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "userStatusUpdate", "userId": "u1", "lastSeen": null, "isOnline": true})
        );
    }

    #[test]
    fn test_online_users_wire_format() {
        let msg = ServerMessage::OnlineUsers {
            user_ids: vec!["a".into(), "b".into()],
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "getOnlineUsers", "payload": ["a", "b"]}));
    }

    #[test]
    fn test_client_ping_parses() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::Ping));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let msg = ServerMessage::Heartbeat;
        let raw = OutboundMessage::Raw(msg.clone()).to_json().unwrap();
        let pre = OutboundMessage::preserialized(&msg).unwrap().to_json().unwrap();
        assert_eq!(raw, pre);
    }
}
