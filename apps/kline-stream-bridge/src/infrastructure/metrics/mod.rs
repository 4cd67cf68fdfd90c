//! Prometheus Metrics Module
//!
//! Exposes bridge metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: received, late or rejected (dropped by the bar builder),
//!   malformed frames
//! - **Bars**: emitted to subscribers
//! - **Connections**: open state, reconnects, heartbeats, dropped sends
//! - **Subscriptions**: active subscription counts
//! - **Latency**: per-tick routing time
//!
//! Every series carries a `feed` label (`equity` or `generic`).
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::instrument::FeedClass;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed (another recorder is already
/// set for the process).
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!("kline_bridge_ticks_received_total", "Ticks decoded from the feed");
    describe_counter!(
        "kline_bridge_ticks_late_total",
        "Tick applications dropped because their bucket was older than the current bar"
    );
    describe_counter!(
        "kline_bridge_ticks_rejected_total",
        "Tick applications dropped because the bucket or volume overflowed"
    );
    describe_counter!(
        "kline_bridge_malformed_frames_total",
        "Inbound frames that could not be decoded"
    );
    describe_counter!("kline_bridge_bars_emitted_total", "Bars delivered to subscriber callbacks");

    describe_gauge!(
        "kline_bridge_connection_open",
        "1 while the feed connection is open, 0 otherwise"
    );
    describe_counter!("kline_bridge_reconnects_total", "Feed reconnection attempts");
    describe_counter!("kline_bridge_heartbeats_sent_total", "Keep-alive commands sent");
    describe_counter!(
        "kline_bridge_commands_sent_total",
        "Outbound commands written to the socket"
    );
    describe_counter!(
        "kline_bridge_sends_dropped_total",
        "Outbound commands dropped because the connection was not open or the queue was full"
    );

    describe_gauge!("kline_bridge_subscriptions", "Active bar subscriptions");

    describe_histogram!(
        "kline_bridge_tick_processing_seconds",
        "Time to aggregate one tick and fan it out"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded tick.
pub fn record_tick_received(feed: FeedClass) {
    counter!("kline_bridge_ticks_received_total", "feed" => feed.as_str()).increment(1);
}

/// Record a tick dropped for one resolution as late.
pub fn record_tick_late(feed: FeedClass) {
    counter!("kline_bridge_ticks_late_total", "feed" => feed.as_str()).increment(1);
}

/// Record a tick dropped for one resolution because it could not be folded.
pub fn record_tick_rejected(feed: FeedClass) {
    counter!("kline_bridge_ticks_rejected_total", "feed" => feed.as_str()).increment(1);
}

/// Record an undecodable inbound frame.
pub fn record_malformed_frame(feed: FeedClass) {
    counter!("kline_bridge_malformed_frames_total", "feed" => feed.as_str()).increment(1);
}

/// Record bars handed to subscriber callbacks.
pub fn record_bars_emitted(feed: FeedClass, count: u64) {
    counter!("kline_bridge_bars_emitted_total", "feed" => feed.as_str()).increment(count);
}

/// Update the open/closed gauge for a feed.
pub fn set_connection_open(feed: FeedClass, open: bool) {
    gauge!("kline_bridge_connection_open", "feed" => feed.as_str()).set(if open {
        1.0
    } else {
        0.0
    });
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: FeedClass) {
    counter!("kline_bridge_reconnects_total", "feed" => feed.as_str()).increment(1);
}

/// Record a keep-alive command.
pub fn record_heartbeat_sent(feed: FeedClass) {
    counter!("kline_bridge_heartbeats_sent_total", "feed" => feed.as_str()).increment(1);
}

/// Record an outbound command written to the socket.
pub fn record_command_sent(feed: FeedClass, command: &'static str) {
    counter!(
        "kline_bridge_commands_sent_total",
        "feed" => feed.as_str(),
        "command" => command
    )
    .increment(1);
}

/// Record an outbound command that was dropped.
pub fn record_send_dropped(feed: FeedClass, command: &'static str) {
    counter!(
        "kline_bridge_sends_dropped_total",
        "feed" => feed.as_str(),
        "command" => command
    )
    .increment(1);
}

/// Update the active subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(feed: FeedClass, count: usize) {
    gauge!("kline_bridge_subscriptions", "feed" => feed.as_str()).set(count as f64);
}

/// Record how long one tick took to route.
pub fn record_processing_duration(feed: FeedClass, duration: Duration) {
    histogram!("kline_bridge_tick_processing_seconds", "feed" => feed.as_str())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
