//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener when `METRICS_PORT` is
//! non-zero. Recording functions are no-ops until a recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_upstream_requests_total` - Upstream calls (labels: outcome, status)
//! - `gateway_rate_limited_total` - Requests rejected with 429
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - End-to-end request duration (labels: method, status)
//! - `gateway_upstream_duration_seconds` - Upstream call duration (labels: outcome)
//!
//! ## Gauges
//! - `gateway_rate_limit_tracked_clients` - Client windows currently held in memory

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const UPSTREAM_REQUESTS_TOTAL: &str = "gateway_upstream_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "gateway_rate_limit_tracked_clients";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is taken).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::UPSTREAM_REQUESTS_TOTAL,
        "Total number of upstream calls by outcome"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "End-to-end request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream call duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Number of client identities with a live rate limit window"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record one upstream call.
///
/// `outcome` is `forwarded`, `partial`, or a [`ProxyError::kind`](crate::error::ProxyError::kind).
pub fn record_upstream(outcome: &'static str, status: u16, duration_secs: f64) {
    counter!(names::UPSTREAM_REQUESTS_TOTAL, "outcome" => outcome, "status" => status.to_string())
        .increment(1);
    histogram!(names::UPSTREAM_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

/// Record a rate-limit rejection.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record end-to-end request duration.
pub fn record_request_duration(method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Update the tracked-clients gauge.
pub fn set_tracked_clients(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests verify the functions don't panic.
    // Full metrics testing requires integration tests with a Prometheus scraper.

    #[test]
    fn test_record_upstream() {
        record_upstream("forwarded", 200, 0.01);
        record_upstream("timeout", 504, 30.0);
    }

    #[test]
    fn test_record_rate_limited() {
        record_rate_limited();
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("GET", "200", 0.1);
    }

    #[test]
    fn test_set_tracked_clients() {
        set_tracked_clients(0);
        set_tracked_clients(42);
    }
}
