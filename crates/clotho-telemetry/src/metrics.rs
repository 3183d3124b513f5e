//! Prometheus metrics for the Clotho engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`: a failure means duplicate metric
//! names, a programming error that should crash at startup. Registration
//! only happens during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// WebSocket connection state (1 = opened, 0 = closed).
pub static WS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "clotho_ws_connected",
        "WebSocket connection state (1=opened)"
    )
    .unwrap()
});

/// Reconnect attempts. Labels: reason (stale/closed/protocol)
pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Orders acknowledged by the exchange. Labels: book (main/stop/position)
pub static ORDERS_PLACED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_orders_placed_total",
        "Orders placed and tracked",
        &["book"]
    )
    .unwrap()
});

pub static ORDERS_CANCELLED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_orders_cancelled_total",
        "Tracked orders cancelled",
        &["book"]
    )
    .unwrap()
});

/// Failed exchange calls. Labels: op (place/cancel/cancel_all/positions/...)
pub static ORDER_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_order_errors_total",
        "Failed exchange operations",
        &["op"]
    )
    .unwrap()
});

pub static LADDER_REBUILDS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("clotho_ladder_rebuilds_total", "Ladder rebuilds started").unwrap()
});

/// Ticks that did not rebuild. Labels: reason (unchanged/threshold/busy)
pub static LADDER_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_ladder_skipped_total",
        "Price ticks that did not trigger a rebuild",
        &["reason"]
    )
    .unwrap()
});

/// Position-closing orders. Labels: reason (profit/loss)
pub static POSITION_CLOSES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_position_closes_total",
        "Offsetting orders submitted for open positions",
        &["reason"]
    )
    .unwrap()
});

pub static RECONCILE_PRUNED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "clotho_reconcile_pruned_total",
        "Tracked orders pruned because they are no longer live",
        &["book"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn order_placed(book: &str) {
        ORDERS_PLACED_TOTAL.with_label_values(&[book]).inc();
    }

    pub fn order_cancelled(book: &str) {
        ORDERS_CANCELLED_TOTAL.with_label_values(&[book]).inc();
    }

    pub fn order_error(op: &str) {
        ORDER_ERRORS_TOTAL.with_label_values(&[op]).inc();
    }

    pub fn ladder_rebuild() {
        LADDER_REBUILDS_TOTAL.inc();
    }

    pub fn ladder_skipped(reason: &str) {
        LADDER_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn position_close(reason: &str) {
        POSITION_CLOSES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn reconcile_pruned(book: &str, count: u64) {
        RECONCILE_PRUNED_TOTAL.with_label_values(&[book]).inc_by(count);
    }

    /// Text exposition of every registered metric.
    pub fn render() -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::ladder_rebuild();
        Metrics::order_placed("main");
        Metrics::ws_connected();

        let text = Metrics::render();
        assert!(text.contains("clotho_ladder_rebuilds_total"));
        assert!(text.contains("clotho_orders_placed_total{book=\"main\"}"));
        assert!(text.contains("clotho_ws_connected 1"));
    }
}
