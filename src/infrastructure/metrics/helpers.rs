//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCAST_SENDS_TOTAL, CONNECTIONS_OPEN, HEARTBEAT_DURATION_MS, HEARTBEAT_TIMEOUTS,
    MEDIA_UPLOADS_TOTAL, MESSAGES_PERSISTED_TOTAL, MESSAGES_REPLAYED_TOTAL,
    MESSAGES_ROUTED_TOTAL, PRESENCE_EVENTS_TOTAL, REGISTRY_REPLACED_TOTAL,
    STALE_DISCONNECTS_TOTAL, STORAGE_WRITE_FAILURES_TOTAL, USERS_ONLINE, WS_CONNECTIONS_CLOSED,
    WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(open_channels: usize) {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_OPEN.set(open_channels as i64);
    }

    pub fn record_closed(open_channels: usize, duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_OPEN.set(open_channels as i64);
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn set_users_online(count: usize) {
        USERS_ONLINE.set(count as i64);
    }

    pub fn record_replaced() {
        REGISTRY_REPLACED_TOTAL.inc();
    }

    pub fn record_stale_disconnect() {
        STALE_DISCONNECTS_TOTAL.inc();
    }
}

/// Helper struct for presence broadcast metrics
pub struct PresenceMetrics;

impl PresenceMetrics {
    pub fn record_event(kind: &str) {
        PRESENCE_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_fanout(delivered: usize, failed: usize) {
        BROADCAST_SENDS_TOTAL
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        if failed > 0 {
            BROADCAST_SENDS_TOTAL
                .with_label_values(&["failed"])
                .inc_by(failed as u64);
        }
    }
}

/// Helper struct for message delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_persisted() {
        MESSAGES_PERSISTED_TOTAL.inc();
    }

    pub fn record_routed(outcome: &str) {
        MESSAGES_ROUTED_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_replayed() {
        MESSAGES_REPLAYED_TOTAL.inc();
    }
}

/// Helper struct for storage metrics
pub struct StorageMetrics;

impl StorageMetrics {
    pub fn record_write_failure(operation: &str) {
        STORAGE_WRITE_FAILURES_TOTAL
            .with_label_values(&[operation])
            .inc();
    }
}

/// Helper struct for media upload metrics
pub struct MediaMetrics;

impl MediaMetrics {
    pub fn record_upload(kind: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        MEDIA_UPLOADS_TOTAL.with_label_values(&[kind, result]).inc();
    }
}

/// Helper struct for WebSocket frame metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_ping() {
        WS_MESSAGES_RECEIVED.with_label_values(&["ping"]).inc();
    }

    pub fn record_invalid() {
        WS_MESSAGES_RECEIVED.with_label_values(&["invalid"]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    /// Record heartbeat timeouts
    pub fn record_timeouts(count: u64) {
        HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}
