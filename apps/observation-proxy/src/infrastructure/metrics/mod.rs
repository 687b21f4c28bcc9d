//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Records**: Records republished on local outputs
//! - **Sessions**: Active streams and session failures
//! - **Discovery**: Capabilities fetch latency and offering counts
//! - **Reports**: Spot reports accepted or rejected
//! - **Signals**: External control signals handled
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the control server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the already installed handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    describe_counter!(
        "sensor_proxy_records_republished_total",
        "Total records published on local outputs"
    );
    describe_counter!(
        "sensor_proxy_record_deliveries_total",
        "Total record deliveries to output subscribers"
    );
    describe_counter!(
        "sensor_proxy_records_undecodable_total",
        "Total remote records that could not be decoded"
    );

    describe_gauge!(
        "sensor_proxy_active_streams",
        "Number of sessions currently streaming"
    );
    describe_counter!(
        "sensor_proxy_session_failures_total",
        "Total session open/start/stop failures"
    );
    describe_counter!(
        "sensor_proxy_poll_errors_total",
        "Total failed stream polls or websocket errors"
    );

    describe_histogram!(
        "sensor_proxy_discovery_seconds",
        "Time to fetch and parse the capabilities document"
    );
    describe_gauge!(
        "sensor_proxy_offerings_discovered",
        "Offerings listed in the last capabilities document"
    );

    describe_counter!(
        "sensor_proxy_spot_reports_total",
        "Total spot reports by outcome"
    );
    describe_counter!(
        "sensor_proxy_signals_total",
        "Total external control signals by action"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one record published on an output, reaching `reached` subscribers.
pub fn record_republished(output: &str, reached: usize) {
    counter!(
        "sensor_proxy_records_republished_total",
        "output" => output.to_string()
    )
    .increment(1);
    counter!(
        "sensor_proxy_record_deliveries_total",
        "output" => output.to_string()
    )
    .increment(reached as u64);
}

/// Record a remote record that could not be decoded.
pub fn record_undecodable(output: &str) {
    counter!(
        "sensor_proxy_records_undecodable_total",
        "output" => output.to_string()
    )
    .increment(1);
}

/// Update the number of streaming sessions.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(count: usize) {
    gauge!("sensor_proxy_active_streams").set(count as f64);
}

/// Record a session failure (`open`, `start` or `stop`).
pub fn record_session_failure(operation: &'static str) {
    counter!(
        "sensor_proxy_session_failures_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a failed poll or websocket error on an output's stream.
pub fn record_poll_error(output: &str) {
    counter!(
        "sensor_proxy_poll_errors_total",
        "output" => output.to_string()
    )
    .increment(1);
}

/// Record a capabilities fetch.
#[allow(clippy::cast_precision_loss)]
pub fn record_discovery(duration: Duration, offerings: usize) {
    histogram!("sensor_proxy_discovery_seconds").record(duration.as_secs_f64());
    gauge!("sensor_proxy_offerings_discovered").set(offerings as f64);
}

/// Record a spot report outcome (`accepted` or `rejected`).
pub fn record_report(outcome: &'static str) {
    counter!("sensor_proxy_spot_reports_total", "outcome" => outcome).increment(1);
}

/// Record an external control signal (`ignored` or `stop_all`).
pub fn record_signal(action: &'static str) {
    counter!("sensor_proxy_signals_total", "action" => action).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
