//! Prometheus metrics for feed connections
//!
//! Per-feed connection status, inbound event counts, reconnect attempts and
//! outbound emit outcomes.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_EVENT: &str = "event";
const LABEL_OUTCOME: &str = "outcome";

/// Event label for inbound events with no registered handler
pub const UNHANDLED_EVENT_LABEL: &str = "unhandled";

/// Connection status per feed (1 = connected, 0 = not connected)
static FEED_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "transitedge_feed_connected",
        "Feed connection status (1=connected, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register feed_connected metric")
});

/// Inbound events received per feed and event name
static EVENTS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "transitedge_feed_events_received_total",
        "Inbound events received per feed",
        &[LABEL_FEED, LABEL_EVENT]
    )
    .expect("Failed to register events_received metric")
});

/// Reconnect attempts scheduled per feed
static RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "transitedge_feed_reconnects_total",
        "Reconnect attempts scheduled per feed",
        &[LABEL_FEED]
    )
    .expect("Failed to register reconnects metric")
});

/// Outbound events per feed, event name and outcome (sent / rejected)
static EMITS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "transitedge_feed_emits_total",
        "Outbound events per feed and outcome",
        &[LABEL_FEED, LABEL_EVENT, LABEL_OUTCOME]
    )
    .expect("Failed to register emits metric")
});

/// Handle for recording metrics for one feed
#[derive(Debug, Clone)]
pub struct FeedMetrics {
    feed: String,
}

impl FeedMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn set_connected(&self, connected: bool) {
        FEED_CONNECTED
            .with_label_values(&[&self.feed])
            .set(i64::from(connected));
    }

    pub fn is_connected(&self) -> bool {
        FEED_CONNECTED.with_label_values(&[&self.feed]).get() == 1
    }

    pub fn inc_event(&self, event: &str) {
        EVENTS_RECEIVED
            .with_label_values(&[&self.feed, event])
            .inc();
    }

    pub fn events_received(&self, event: &str) -> u64 {
        EVENTS_RECEIVED
            .with_label_values(&[&self.feed, event])
            .get()
    }

    pub fn inc_reconnect(&self) {
        RECONNECTS.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_emit_sent(&self, event: &str) {
        EMITS.with_label_values(&[&self.feed, event, "sent"]).inc();
    }

    pub fn inc_emit_rejected(&self, event: &str) {
        EMITS
            .with_label_values(&[&self.feed, event, "rejected"])
            .inc();
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
