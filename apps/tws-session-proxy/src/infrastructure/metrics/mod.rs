//! Prometheus Metrics Module
//!
//! Session-level metrics recorded through the `metrics` facade.
//!
//! # Metrics Categories
//!
//! - **Requests**: Requests sent and responses completed per workflow
//! - **Errors**: Gateway errors by classification
//! - **Sessions**: Sessions stopped by reason and their duration
//! - **Pending**: Operations awaiting a terminal response
//!
//! # Integration
//!
//! The batch binary installs the recorder at startup and logs the rendered
//! snapshot when the session ends. Without an installed recorder every
//! recording call is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::session::ErrorClass;
use crate::domain::session::StopReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
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
    // Request counters
    describe_counter!(
        "tws_proxy_requests_sent_total",
        "Total requests sent to the gateway"
    );
    describe_counter!(
        "tws_proxy_responses_completed_total",
        "Total requests retired by a terminal response"
    );

    // Error counters
    describe_counter!(
        "tws_proxy_gateway_errors_total",
        "Total gateway errors by classification"
    );

    // Session counters
    describe_counter!(
        "tws_proxy_sessions_stopped_total",
        "Total sessions stopped by reason"
    );
    describe_histogram!(
        "tws_proxy_session_duration_seconds",
        "Time from activation to stop"
    );

    // Pending gauge
    describe_gauge!(
        "tws_proxy_pending_operations",
        "Operations awaiting a terminal response"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a request handed to the transport.
pub fn record_request_sent(workflow: &'static str, operation: &'static str) {
    counter!(
        "tws_proxy_requests_sent_total",
        "workflow" => workflow,
        "operation" => operation
    )
    .increment(1);
}

/// Record a request retired successfully.
pub fn record_response_completed(workflow: &'static str) {
    counter!(
        "tws_proxy_responses_completed_total",
        "workflow" => workflow
    )
    .increment(1);
}

/// Record a gateway error by classification.
pub fn record_gateway_error(class: ErrorClass) {
    counter!(
        "tws_proxy_gateway_errors_total",
        "class" => class.as_str()
    )
    .increment(1);
}

/// Record a session stop.
pub fn record_session_stopped(workflow: &'static str, reason: StopReason, duration: Duration) {
    counter!(
        "tws_proxy_sessions_stopped_total",
        "workflow" => workflow,
        "reason" => reason.as_str()
    )
    .increment(1);
    histogram!(
        "tws_proxy_session_duration_seconds",
        "workflow" => workflow
    )
    .record(duration.as_secs_f64());
}

/// Update the pending operation count.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_operations(workflow: &'static str, count: usize) {
    gauge!(
        "tws_proxy_pending_operations",
        "workflow" => workflow
    )
    .set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
