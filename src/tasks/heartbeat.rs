use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::connection_manager::OpenChannels;
use crate::metrics::HeartbeatMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Sends in flight at once during a round
const MAX_CONCURRENT_HEARTBEATS: usize = 1000;

/// Periodic keepalive frames to every open channel.
///
/// Only sends; a failed heartbeat never removes anything. Channels leave the
/// registry through the session lifecycle when their socket closes.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    channels: Arc<OpenChannels>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        channels: Arc<OpenChannels>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            channels,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn send_heartbeats(&self) {
        let channels = self.channels.all();
        if channels.is_empty() {
            return;
        }

        let outbound = OutboundMessage::preserialized(&ServerMessage::Heartbeat)
            .unwrap_or(OutboundMessage::Raw(ServerMessage::Heartbeat));
        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
        let start = Instant::now();
        let mut tally = BeatTally::default();

        for batch in channels.chunks(MAX_CONCURRENT_HEARTBEATS) {
            let beats = join_all(batch.iter().map(|handle| {
                let msg = outbound.clone();
                async move {
                    match timeout(send_timeout, handle.send_preserialized(msg)).await {
                        Ok(Ok(())) => Beat::Sent,
                        Ok(Err(_)) => {
                            tracing::debug!(connection_id = %handle.id, "Heartbeat to closing channel");
                            Beat::Closed
                        }
                        Err(_) => {
                            tracing::debug!(connection_id = %handle.id, "Heartbeat send timed out");
                            Beat::TimedOut
                        }
                    }
                }
            }))
            .await;
            beats.into_iter().for_each(|beat| tally.add(beat));
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        if tally.timed_out > 0 {
            HeartbeatMetrics::record_timeouts(tally.timed_out);
        }

        tracing::debug!(
            channels = channels.len(),
            sent = tally.sent,
            closed = tally.closed,
            timed_out = tally.timed_out,
            elapsed_ms,
            "Heartbeat round completed"
        );

        let interval_ms = self.config.heartbeat_interval * 1000;
        if elapsed_ms > interval_ms / 2 {
            tracing::warn!(
                elapsed_ms,
                heartbeat_interval_ms = interval_ms,
                channels = channels.len(),
                "Heartbeat round took more than half the interval"
            );
        }
    }
}

enum Beat {
    Sent,
    Closed,
    TimedOut,
}

#[derive(Default)]
struct BeatTally {
    sent: u64,
    closed: u64,
    timed_out: u64,
}

impl BeatTally {
    fn add(&mut self, beat: Beat) {
        match beat {
            Beat::Sent => self.sent += 1,
            Beat::Closed => self.closed += 1,
            Beat::TimedOut => self.timed_out += 1,
        }
    }
}
