//! Connection handle and related types

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single live WebSocket channel.
///
/// `id` is minted per accepted socket and doubles as the connection-instance
/// token: two connections of the same user never share it.
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Identity supplied at handshake; `None` for anonymous channels
    pub user_id: Option<String>,
    sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Server-side request to end this connection
    close: Notify,
}

impl ConnectionHandle {
    pub fn new(user_id: Option<String>, sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            sender,
            connected_at: Utc::now(),
            close: Notify::new(),
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.user_id.is_some()
    }

    /// Ask the socket task to end the connection. The request is kept until
    /// `close_requested` observes it.
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `request_close` has been called
    pub async fn close_requested(&self) {
        self.close.notified().await;
    }

    /// True once the socket writer has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Send a ServerMessage (will be serialized when sent to WebSocket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized message (for efficient multi-send scenarios)
    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Connection statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub open_channels: usize,
    pub online_users: usize,
    pub anonymous_channels: usize,
}
