use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::websocket::ServerMessage;

/// A change in who is online, as seen by every connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Every user currently in the registry
    FullOnlineList(BTreeSet<String>),
    /// One user came online (`last_seen == None`) or went offline
    StatusChange {
        user_id: String,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
}

impl PresenceEvent {
    pub fn online(user_id: impl Into<String>) -> Self {
        Self::StatusChange {
            user_id: user_id.into(),
            is_online: true,
            last_seen: None,
        }
    }

    pub fn offline(user_id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self::StatusChange {
            user_id: user_id.into(),
            is_online: false,
            last_seen: Some(last_seen),
        }
    }

    /// Label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullOnlineList(_) => "online_list",
            Self::StatusChange { .. } => "status_change",
        }
    }
}

impl From<PresenceEvent> for ServerMessage {
    fn from(event: PresenceEvent) -> Self {
        match event {
            PresenceEvent::FullOnlineList(users) => ServerMessage::OnlineUsers {
                user_ids: users.into_iter().collect(),
            },
            PresenceEvent::StatusChange {
                user_id,
                is_online,
                last_seen,
            } => ServerMessage::UserStatusUpdate {
                user_id,
                last_seen,
                is_online,
            },
        }
    }
}
