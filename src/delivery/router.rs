use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::connection_manager::ConnectionRegistry;
use crate::metrics::DeliveryMetrics;
use crate::storage::MessageRecord;
use crate::websocket::ServerMessage;

/// What happened to a live push. None of these is an error: the message is
/// already persisted and the recipient sees it on their next fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    RecipientOffline,
    /// The registered channel closed or stalled before the push landed
    ChannelClosed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::RecipientOffline => "recipient_offline",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub delivered: AtomicU64,
    pub recipient_offline: AtomicU64,
    pub channel_closed: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            recipient_offline: self.recipient_offline.load(Ordering::Relaxed),
            channel_closed: self.channel_closed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub delivered: u64,
    pub recipient_offline: u64,
    pub channel_closed: u64,
}

/// Pushes freshly persisted messages to their recipient's live connection.
///
/// One lookup, at most one push. No retry, no queue, no acknowledgement.
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    stats: DeliveryStats,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
            stats: DeliveryStats::default(),
        }
    }

    #[tracing::instrument(
        name = "delivery.deliver",
        skip(self, record),
        fields(message_id = %record.id)
    )]
    pub async fn deliver(&self, recipient: &str, record: &MessageRecord) -> DeliveryOutcome {
        let outcome = match self.registry.lookup(recipient).await {
            None => DeliveryOutcome::RecipientOffline,
            Some(handle) => {
                let push = handle.send(ServerMessage::new_message(record.clone()));
                match timeout(self.send_timeout, push).await {
                    Ok(Ok(())) => DeliveryOutcome::Delivered,
                    Ok(Err(_)) => {
                        tracing::debug!(connection_id = %handle.id, "Recipient channel closed");
                        DeliveryOutcome::ChannelClosed
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %handle.id, "Recipient channel stalled");
                        DeliveryOutcome::ChannelClosed
                    }
                }
            }
        };

        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.stats.delivered,
            DeliveryOutcome::RecipientOffline => &self.stats.recipient_offline,
            DeliveryOutcome::ChannelClosed => &self.stats.channel_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_routed(outcome.as_str());

        tracing::debug!(outcome = outcome.as_str(), "Message routed");
        outcome
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }
}
