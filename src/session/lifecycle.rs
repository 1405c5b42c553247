use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, OpenChannels};
use crate::metrics::ConnectionMetrics;
use crate::presence::{PresenceBroadcaster, PresenceEvent};

use super::LastSeenWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// One accepted channel as it moves through `Connecting -> Active -> Closed`.
#[derive(Debug)]
pub struct Session {
    handle: Arc<ConnectionHandle>,
    state: SessionState,
}

impl Session {
    pub fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            handle,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.handle.user_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

/// Applies the connect and disconnect side effects for each session.
///
/// This is the only writer of the connection registry.
pub struct SessionLifecycleManager {
    registry: Arc<ConnectionRegistry>,
    channels: Arc<OpenChannels>,
    broadcaster: Arc<PresenceBroadcaster>,
    writer: LastSeenWriter,
    guard_stale_disconnect: bool,
}

impl SessionLifecycleManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        channels: Arc<OpenChannels>,
        broadcaster: Arc<PresenceBroadcaster>,
        writer: LastSeenWriter,
        guard_stale_disconnect: bool,
    ) -> Self {
        Self {
            registry,
            channels,
            broadcaster,
            writer,
            guard_stale_disconnect,
        }
    }

    pub fn writer(&self) -> &LastSeenWriter {
        &self.writer
    }

    /// `Connecting -> Active`.
    ///
    /// Tracked: register, persist "online", broadcast the status change and
    /// then the full online list. Anonymous: the channel alone gets the
    /// current online list.
    #[tracing::instrument(
        name = "session.connect",
        skip(self, session),
        fields(connection_id = %session.id(), user_id = ?session.user_id())
    )]
    pub async fn connect(&self, session: &mut Session) {
        if session.state != SessionState::Connecting {
            return;
        }

        let handle = session.handle.clone();
        self.channels.attach(handle.clone());
        session.state = SessionState::Active;
        ConnectionMetrics::record_opened(self.channels.len());

        let Some(user_id) = handle.user_id.as_deref() else {
            let online = self.registry.list_online().await;
            self.broadcaster
                .send_to(&handle, PresenceEvent::FullOnlineList(online))
                .await;
            tracing::debug!("Anonymous session active");
            return;
        };

        if let Some(previous) = self.registry.register(user_id, handle.clone()).await {
            ConnectionMetrics::record_replaced();
            tracing::debug!(
                replaced_connection_id = %previous.id,
                "User reconnected, newer connection takes over"
            );
        }
        ConnectionMetrics::set_users_online(self.registry.online_count().await);

        self.writer.submit(user_id, None);

        self.broadcaster.broadcast(PresenceEvent::online(user_id)).await;
        let online = self.registry.list_online().await;
        self.broadcaster
            .broadcast(PresenceEvent::FullOnlineList(online))
            .await;

        tracing::info!("User online");
    }

    /// `Active -> Closed`. Runs to completion once started; calling it again
    /// on a closed session does nothing.
    #[tracing::instrument(
        name = "session.disconnect",
        skip(self, session),
        fields(connection_id = %session.id(), user_id = ?session.user_id())
    )]
    pub async fn disconnect(&self, session: &mut Session) {
        if session.state == SessionState::Closed {
            return;
        }
        session.state = SessionState::Closed;

        let handle = session.handle.clone();
        if let Some(user_id) = handle.user_id.as_deref() {
            self.go_offline(user_id, &handle).await;
        } else {
            tracing::debug!("Anonymous session closed");
        }

        // detached last: a closing channel that can still write sees its own offline event
        self.channels.detach(handle.id);
        let duration = (Utc::now() - handle.connected_at).num_milliseconds() as f64 / 1000.0;
        ConnectionMetrics::record_closed(self.channels.len(), duration);
    }

    /// Take every user still in the registry offline, as if each of their
    /// sessions had closed at the same instant. Returns how many users that was.
    ///
    /// Runs at shutdown for sockets that never closed. A `disconnect` of one of
    /// those sessions afterwards finds no entry and, when guarded, does nothing.
    #[tracing::instrument(name = "session.close_remaining", skip(self))]
    pub async fn close_remaining(&self) -> usize {
        let entries = self.registry.drain().await;
        if entries.is_empty() {
            return 0;
        }
        ConnectionMetrics::set_users_online(self.registry.online_count().await);

        let now = Utc::now();
        for (user_id, handle) in &entries {
            self.writer.submit(user_id, Some(now));
            self.broadcaster
                .broadcast(PresenceEvent::offline(user_id.as_str(), now))
                .await;
            handle.request_close();
        }
        let online = self.registry.list_online().await;
        self.broadcaster
            .broadcast(PresenceEvent::FullOnlineList(online))
            .await;

        tracing::info!(users = entries.len(), last_seen = %now, "Remaining users taken offline");
        entries.len()
    }

    async fn go_offline(&self, user_id: &str, handle: &ConnectionHandle) {
        let now = Utc::now();

        if self.guard_stale_disconnect {
            if !self.registry.unregister_connection(user_id, handle.id).await {
                ConnectionMetrics::record_stale_disconnect();
                tracing::info!("Superseded connection closed, user stays online");
                return;
            }
        } else {
            self.registry.unregister(user_id).await;
        }
        ConnectionMetrics::set_users_online(self.registry.online_count().await);

        self.writer.submit(user_id, Some(now));

        self.broadcaster
            .broadcast(PresenceEvent::offline(user_id, now))
            .await;
        let online = self.registry.list_online().await;
        self.broadcaster
            .broadcast(PresenceEvent::FullOnlineList(online))
            .await;

        tracing::info!(last_seen = %now, "User offline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::storage::{MemoryStorage, NewUser, UserStore};
    use crate::websocket::{OutboundMessage, ServerMessage};

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryStorage>,
        lifecycle: SessionLifecycleManager,
    }

    async fn harness(guard: bool, users: &[&str]) -> Harness {
        let store = Arc::new(MemoryStorage::new());
        for user in users {
            store
                .create_user(NewUser {
                    id: Some(user.to_string()),
                    full_name: user.to_string(),
                    email: format!("{}@example.com", user),
                    profile_pic: None,
                })
                .await
                .unwrap();
        }
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(OpenChannels::new());
        let broadcaster = Arc::new(PresenceBroadcaster::new(
            channels.clone(),
            Duration::from_millis(100),
        ));
        let (writer, _task) = LastSeenWriter::spawn(store.clone());
        let lifecycle =
            SessionLifecycleManager::new(registry.clone(), channels, broadcaster, writer, guard);
        Harness {
            registry,
            store,
            lifecycle,
        }
    }

    fn session(user: Option<&str>) -> (Session, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = Arc::new(ConnectionHandle::new(user.map(str::to_string), tx));
        (Session::new(handle), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let json = msg.to_json().unwrap();
            out.push(serde_json::from_str(&json).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let h = harness(true, &["alice"]).await;
        let (mut s, mut rx) = session(Some("alice"));

        h.lifecycle.connect(&mut s).await;
        assert_eq!(s.state(), SessionState::Active);
        assert!(h.registry.is_online("alice").await);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ServerMessage::UserStatusUpdate { user_id, is_online: true, last_seen: None } if user_id == "alice"
        ));
        assert_eq!(
            events[1],
            ServerMessage::OnlineUsers {
                user_ids: vec!["alice".to_string()]
            }
        );

        h.lifecycle.disconnect(&mut s).await;
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!h.registry.is_online("alice").await);

        assert!(h.lifecycle.writer().flush().await);
        let user = h.store.find_user_by_id("alice").await.unwrap().unwrap();
        assert!(user.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = harness(true, &["alice"]).await;
        let (mut observer, mut observer_rx) = session(None);
        h.lifecycle.connect(&mut observer).await;

        let (mut s, _rx) = session(Some("alice"));
        h.lifecycle.connect(&mut s).await;
        drain(&mut observer_rx);

        h.lifecycle.disconnect(&mut s).await;
        h.lifecycle.disconnect(&mut s).await;

        let offline = drain(&mut observer_rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::UserStatusUpdate { is_online: false, .. }))
            .count();
        assert_eq!(offline, 1);
    }

    #[tokio::test]
    async fn test_anonymous_session_only_receives_online_list() {
        let h = harness(true, &["alice"]).await;
        let (mut alice, _alice_rx) = session(Some("alice"));
        h.lifecycle.connect(&mut alice).await;

        let (mut anon, mut anon_rx) = session(None);
        h.lifecycle.connect(&mut anon).await;
        assert_eq!(h.registry.online_count().await, 1);
        assert_eq!(
            drain(&mut anon_rx),
            vec![ServerMessage::OnlineUsers {
                user_ids: vec!["alice".to_string()]
            }]
        );

        h.lifecycle.disconnect(&mut anon).await;
        assert_eq!(h.registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_disconnect_is_ignored_when_guarded() {
        let h = harness(true, &["alice"]).await;
        let (mut first, _rx1) = session(Some("alice"));
        let (mut second, mut rx2) = session(Some("alice"));

        h.lifecycle.connect(&mut first).await;
        h.lifecycle.connect(&mut second).await;
        drain(&mut rx2);

        h.lifecycle.disconnect(&mut first).await;
        assert_eq!(
            h.registry.lookup("alice").await.map(|c| c.id),
            Some(second.id())
        );
        assert!(drain(&mut rx2).is_empty());

        assert!(h.lifecycle.writer().flush().await);
        let user = h.store.find_user_by_id("alice").await.unwrap().unwrap();
        assert_eq!(user.last_seen, None);
    }

    #[tokio::test]
    async fn test_stale_disconnect_evicts_when_unguarded() {
        let h = harness(false, &["alice"]).await;
        let (mut first, _rx1) = session(Some("alice"));
        let (mut second, mut rx2) = session(Some("alice"));

        h.lifecycle.connect(&mut first).await;
        h.lifecycle.connect(&mut second).await;
        drain(&mut rx2);

        h.lifecycle.disconnect(&mut first).await;
        assert!(!h.registry.is_online("alice").await);

        let events = drain(&mut rx2);
        assert!(events
            .iter()
            .any(|m| matches!(m, ServerMessage::UserStatusUpdate { is_online: false, .. })));
    }

    #[tokio::test]
    async fn test_close_remaining_takes_everyone_offline() {
        let h = harness(true, &["alice", "bob"]).await;
        let (mut alice, _alice_rx) = session(Some("alice"));
        let (mut bob, mut bob_rx) = session(Some("bob"));
        let (mut anon, mut anon_rx) = session(None);
        h.lifecycle.connect(&mut alice).await;
        h.lifecycle.connect(&mut bob).await;
        h.lifecycle.connect(&mut anon).await;
        drain(&mut bob_rx);
        drain(&mut anon_rx);

        assert_eq!(h.lifecycle.close_remaining().await, 2);
        assert!(h.registry.list_online().await.is_empty());

        let offline = drain(&mut anon_rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::UserStatusUpdate { is_online: false, .. }))
            .count();
        assert_eq!(offline, 2);

        // the sockets finish closing later; that must not broadcast again
        h.lifecycle.disconnect(&mut alice).await;
        h.lifecycle.disconnect(&mut bob).await;
        assert!(drain(&mut anon_rx).is_empty());

        assert!(h.lifecycle.writer().flush().await);
        for user in ["alice", "bob"] {
            let stored = h.store.find_user_by_id(user).await.unwrap().unwrap();
            assert!(stored.last_seen.is_some());
        }
        assert_eq!(h.lifecycle.close_remaining().await, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_block_presence() {
        // "ghost" has no user row, so every lastSeen write fails
        let h = harness(true, &[]).await;
        let (mut s, mut rx) = session(Some("ghost"));

        h.lifecycle.connect(&mut s).await;
        assert!(h.registry.is_online("ghost").await);
        assert_eq!(drain(&mut rx).len(), 2);

        h.lifecycle.disconnect(&mut s).await;
        assert!(!h.registry.is_online("ghost").await);
        assert!(h.lifecycle.writer().flush().await);
    }
}
