use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::timeout;

use crate::connection_manager::{ConnectionHandle, OpenChannels};
use crate::metrics::PresenceMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

use super::PresenceEvent;

/// Maximum number of concurrent channel sends per broadcast
const MAX_CONCURRENT_SENDS: usize = 100;

/// Outcome of one fan-out, for logging and metrics only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Relays presence events to every open channel.
///
/// Holds no presence state of its own. Channels that close or stall while a
/// broadcast is in flight simply miss it; nothing is surfaced to the caller.
pub struct PresenceBroadcaster {
    channels: Arc<OpenChannels>,
    send_timeout: Duration,
}

impl PresenceBroadcaster {
    pub fn new(channels: Arc<OpenChannels>, send_timeout: Duration) -> Self {
        Self {
            channels,
            send_timeout,
        }
    }

    /// Deliver `event` to all open channels, including the one that caused it
    #[tracing::instrument(
        name = "presence.broadcast",
        skip(self, event),
        fields(kind = event.kind())
    )]
    pub async fn broadcast(&self, event: PresenceEvent) -> BroadcastReport {
        let kind = event.kind();
        let message: ServerMessage = event.into();
        let targets = self.channels.all();

        let outbound = match OutboundMessage::preserialized(&message) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize presence event");
                OutboundMessage::Raw(message)
            }
        };

        let report = self.fan_out(&targets, outbound).await;

        PresenceMetrics::record_event(kind);
        PresenceMetrics::record_fanout(report.delivered, report.failed);

        tracing::debug!(
            kind = kind,
            delivered = report.delivered,
            failed = report.failed,
            "Presence event broadcast"
        );

        report
    }

    /// Deliver `event` to a single channel
    pub async fn send_to(&self, handle: &ConnectionHandle, event: PresenceEvent) -> bool {
        let message: ServerMessage = event.into();
        matches!(
            timeout(self.send_timeout, handle.send(message)).await,
            Ok(Ok(()))
        )
    }

    async fn fan_out(
        &self,
        targets: &[Arc<ConnectionHandle>],
        outbound: OutboundMessage,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut futures = FuturesUnordered::new();

        for handle in targets {
            let handle = handle.clone();
            let msg = outbound.clone();
            let send_timeout = self.send_timeout;
            futures.push(async move {
                match timeout(send_timeout, handle.send_preserialized(msg)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        tracing::trace!(connection_id = %handle.id, "Channel closed during broadcast");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %handle.id, "Broadcast send timed out");
                        false
                    }
                }
            });

            while futures.len() >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => report.delivered += 1,
                    Some(false) => report.failed += 1,
                    None => break,
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        report
    }
}
