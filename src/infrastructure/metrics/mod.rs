//! Prometheus metrics for the messaging service.
//!
//! - Connection metrics (open channels, online users, connection lifetime)
//! - Presence metrics (events broadcast, per-channel fan-out results)
//! - Delivery metrics (messages persisted, routed live or left for history)
//! - Persistence and media metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, DeliveryMetrics, HeartbeatMetrics, MediaMetrics,
    PresenceMetrics, StorageMetrics, WsMessageMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dm";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Open WebSocket channels, tracked and anonymous
    pub static ref CONNECTIONS_OPEN: IntGauge = register_int_gauge!(
        format!("{}_connections_open", METRIC_PREFIX),
        "Number of open WebSocket channels"
    ).unwrap();

    /// Users currently present in the connection registry
    pub static ref USERS_ONLINE: IntGauge = register_int_gauge!(
        format!("{}_users_online", METRIC_PREFIX),
        "Number of users with a registered connection"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Client frames received by type",
        &["type"]
    ).unwrap();

    /// A register call replaced an existing entry for the same user
    pub static ref REGISTRY_REPLACED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_registry_replaced_total", METRIC_PREFIX),
        "Registrations that overwrote an existing connection for the same user"
    ).unwrap();

    /// Disconnects ignored because a newer connection owns the registry entry
    pub static ref STALE_DISCONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_stale_disconnects_total", METRIC_PREFIX),
        "Disconnects of superseded connections that left the registry untouched"
    ).unwrap();

    // ============================================================================
    // Presence Metrics
    // ============================================================================

    pub static ref PRESENCE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_presence_events_total", METRIC_PREFIX),
        "Presence events broadcast by kind",
        &["kind"]
    ).unwrap();

    pub static ref BROADCAST_SENDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcast_sends_total", METRIC_PREFIX),
        "Per-channel presence sends by result",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref MESSAGES_PERSISTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_persisted_total", METRIC_PREFIX),
        "Messages written to storage"
    ).unwrap();

    pub static ref MESSAGES_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_routed_total", METRIC_PREFIX),
        "Live routing outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref MESSAGES_REPLAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_replayed_total", METRIC_PREFIX),
        "Send retries answered with the already persisted message"
    ).unwrap();

    // ============================================================================
    // Persistence / Media Metrics
    // ============================================================================

    pub static ref STORAGE_WRITE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_storage_write_failures_total", METRIC_PREFIX),
        "Best-effort storage writes that failed",
        &["operation"]
    ).unwrap();

    pub static ref MEDIA_UPLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_media_uploads_total", METRIC_PREFIX),
        "Media uploads by kind and result",
        &["kind", "result"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    pub static ref HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Heartbeat sends that timed out"
    ).unwrap();
}
