//! Prometheus metrics for latency tracking and monitoring.
//!
//! This module provides metrics for:
//! - Order submission and signing latency
//! - Stream message processing and price updates
//! - Opportunity detection, dispatch and skip reasons
//! - Leg compensation and unresolved exposure
//! - Directory scans and HTTP request latency

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

// === Metric Name Constants ===

/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Opportunity detection latency metric name.
pub const METRIC_OPPORTUNITY_DETECTION_LATENCY: &str = "opportunity_detection_latency_ms";
/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "signing_latency_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities handed to the executor.
pub const METRIC_OPPORTUNITIES_DISPATCHED: &str = "opportunities_dispatched_total";
/// Opportunities dropped before execution, labelled by reason.
pub const METRIC_OPPORTUNITIES_SKIPPED: &str = "opportunities_skipped_total";
/// Two-leg trades completed.
pub const METRIC_TRADES_EXECUTED: &str = "trades_executed_total";
/// Leg-1 unwinds after a leg-2 failure.
pub const METRIC_COMPENSATIONS: &str = "compensations_total";
/// Unwinds that failed and left a position open.
pub const METRIC_EXPOSURES: &str = "unresolved_exposures_total";
/// Settlement sells.
pub const METRIC_POSITIONS_SETTLED: &str = "positions_settled_total";
/// Price updates applied to the cache.
pub const METRIC_PRICE_UPDATES: &str = "price_updates_total";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Directory scans completed.
pub const METRIC_DIRECTORY_SCANS: &str = "directory_scans_total";
/// Pairs currently watched.
pub const METRIC_ACTIVE_PAIRS: &str = "active_pairs";
/// Tokens subscribed on the stream.
pub const METRIC_SUBSCRIBED_TOKENS: &str = "subscribed_tokens";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "WebSocket message processing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_OPPORTUNITY_DETECTION_LATENCY,
        "Time to scan all pairs for inversions in milliseconds"
    );
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "HTTP request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_SIGNING_LATENCY,
        "Cryptographic signing latency in milliseconds"
    );

    // Counters
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of pricing inversions detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_DISPATCHED,
        "Total number of opportunities sent to the executor"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_SKIPPED,
        "Opportunities not traded, by reason"
    );
    describe_counter!(METRIC_TRADES_EXECUTED, "Two-leg trades with both legs placed");
    describe_counter!(METRIC_COMPENSATIONS, "Leg-1 positions unwound after leg 2 failed");
    describe_counter!(METRIC_EXPOSURES, "Failed unwinds leaving an open position");
    describe_counter!(METRIC_POSITIONS_SETTLED, "Positions liquidated by the settlement sweep");
    describe_counter!(METRIC_PRICE_UPDATES, "Price updates applied to the cache");
    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(
        METRIC_WS_RECONNECTS,
        "Total number of WebSocket reconnections"
    );
    describe_counter!(METRIC_DIRECTORY_SCANS, "Market directory scans completed");

    // Gauges
    describe_gauge!(METRIC_ACTIVE_PAIRS, "Hierarchical pairs currently watched");
    describe_gauge!(METRIC_SUBSCRIBED_TOKENS, "Tokens subscribed on the price stream");

    debug!("Metrics initialized");
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Record WebSocket message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(latency_ms);
}

/// Record HTTP request latency.
pub fn record_http_latency(start: Instant, endpoint: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "endpoint" => endpoint.to_string()).record(latency_ms);
}

/// Increment order submitted counter.
pub fn inc_orders_submitted() {
    counter!(METRIC_ORDERS_SUBMITTED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Add to the opportunities detected counter.
pub fn add_opportunities_detected(count: u64) {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(count);
}

pub fn inc_opportunities_dispatched() {
    counter!(METRIC_OPPORTUNITIES_DISPATCHED).increment(1);
}

/// Count an opportunity dropped for `reason` (cooldown, stale, sizing, ...).
pub fn inc_opportunities_skipped(reason: &'static str) {
    counter!(METRIC_OPPORTUNITIES_SKIPPED, "reason" => reason).increment(1);
}

pub fn inc_trades_executed() {
    counter!(METRIC_TRADES_EXECUTED).increment(1);
}

pub fn inc_compensations() {
    counter!(METRIC_COMPENSATIONS).increment(1);
}

pub fn inc_exposures() {
    counter!(METRIC_EXPOSURES).increment(1);
}

pub fn inc_positions_settled() {
    counter!(METRIC_POSITIONS_SETTLED).increment(1);
}

pub fn inc_price_updates() {
    counter!(METRIC_PRICE_UPDATES).increment(1);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

pub fn inc_directory_scans() {
    counter!(METRIC_DIRECTORY_SCANS).increment(1);
}

pub fn set_active_pairs(count: usize) {
    gauge!(METRIC_ACTIVE_PAIRS).set(count as f64);
}

pub fn set_subscribed_tokens(count: usize) {
    gauge!(METRIC_SUBSCRIBED_TOKENS).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

/// Create a latency timer for order submission.
pub fn timer_order_submit() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDER_SUBMIT_LATENCY)
}

/// Create a latency timer for opportunity detection.
pub fn timer_opportunity_detection() -> LatencyTimer {
    LatencyTimer::new(METRIC_OPPORTUNITY_DETECTION_LATENCY)
}

/// Create a latency timer for signing operations.
pub fn timer_signing() -> LatencyTimer {
    LatencyTimer::new(METRIC_SIGNING_LATENCY)
}
