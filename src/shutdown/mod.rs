//! Graceful shutdown.
//!
//! 1. Tell every open channel the server is going away
//! 2. Signal background tasks to stop
//! 3. Give clients a moment to close so their disconnect runs normally
//! 4. Take everyone still connected offline and ask their sockets to close
//! 5. Flush pending lastSeen writes to storage

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::PresenceConfig;
use crate::connection_manager::OpenChannels;
use crate::session::SessionLifecycleManager;
use crate::websocket::ServerMessage;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified
    pub client_notification_timeout: Duration,
    /// Time to wait for open channels to close
    pub drain_timeout: Duration,
    /// Time to wait for pending lastSeen writes
    pub flush_timeout: Duration,
    /// Suggested reconnect delay sent to clients
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(5),
            reconnect_after_seconds: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn from_presence(presence: &PresenceConfig) -> Self {
        Self {
            flush_timeout: Duration::from_secs(presence.flush_timeout_seconds),
            ..Default::default()
        }
    }
}

pub struct GracefulShutdown {
    channels: Arc<OpenChannels>,
    lifecycle: Arc<SessionLifecycleManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        channels: Arc<OpenChannels>,
        lifecycle: Arc<SessionLifecycleManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            channels,
            lifecycle,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(open_channels = self.channels.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 4: Closing remaining sessions");
        result.sessions_closed = self.close_remaining_sessions().await;

        tracing::info!("Phase 5: Flushing presence writes");
        result.presence_flushed = self.flush_presence().await;

        result.duration = start.elapsed();

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            sessions_closed = result.sessions_closed,
            presence_flushed = result.presence_flushed,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn notify_clients(&self, reason: &str) -> usize {
        let channels = self.channels.all();
        if channels.is_empty() {
            return 0;
        }

        let message = ServerMessage::Shutdown {
            reason: reason.to_string(),
            reconnect_after_seconds: self.config.reconnect_after_seconds,
        };
        let mut futures = FuturesUnordered::new();
        let mut notified = 0;

        for handle in channels {
            let msg = message.clone();
            futures.push(async move {
                matches!(
                    timeout(Duration::from_secs(2), handle.send(msg)).await,
                    Ok(Ok(()))
                )
            });
        }

        let notify_future = async {
            while let Some(success) = futures.next().await {
                if success {
                    notified += 1;
                }
            }
        };
        let _ = timeout(self.config.client_notification_timeout, notify_future).await;

        tracing::info!(notified = notified, "Shutdown notifications sent");
        notified
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.channels.len();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while !self.channels.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.channels.len();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
        }
        initial.saturating_sub(remaining)
    }

    /// Sockets still open after the drain never reach their own disconnect
    /// before the runtime stops, so their users are taken offline here.
    async fn close_remaining_sessions(&self) -> usize {
        let closed = self.lifecycle.close_remaining().await;
        for handle in self.channels.all() {
            handle.request_close();
        }
        closed
    }

    async fn flush_presence(&self) -> bool {
        match timeout(self.config.flush_timeout, self.lifecycle.writer().flush()).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("Presence writer already stopped");
                false
            }
            Err(_) => {
                tracing::warn!("Presence flush timed out, some lastSeen updates may be lost");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub clients_notified: usize,
    pub connections_closed: usize,
    /// Users taken offline because their socket was still open after the drain
    pub sessions_closed: usize,
    /// Whether every pending lastSeen write reached storage
    pub presence_flushed: bool,
    pub duration: Duration,
}
