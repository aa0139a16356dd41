//! Metrics definitions for the Channel Broker.
//!
//! All metrics follow Prometheus naming conventions:
//! - `broker_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: the fixed route table plus `/other`
//! - `status`: 3 values (success, error, timeout)
//! - `operation`: bounded by code (create, join, share, acquire, start, stop, ...)
//!
//! Passphrases and session tokens never appear in labels. The only dynamic
//! path segment (`/api/v1/sessions/{token}`) is normalized away.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Build a Prometheus builder with the broker's histogram buckets.
fn builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("broker_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Recording calls go to a third-party API; wider buckets
        .set_buckets_for_metric(
            Matcher::Prefix("broker_recording_call".to_string()),
            &[0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set recording call buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("broker_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))
}

/// Initialize the global Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Build a handle whose recorder is NOT installed globally.
///
/// Used by test servers, several of which may run in one process.
pub fn detached_metrics_handle() -> Result<PrometheusHandle, String> {
    Ok(builder()?.build_recorder().handle())
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `broker_http_requests_total`, `broker_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures framework-level rejections (415, JSON 400/422, 405) as well as
/// handler errors.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("broker_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("broker_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health"
        | "/ready"
        | "/metrics"
        | "/api/v1/channels"
        | "/api/v1/channels/join"
        | "/api/v1/channels/share"
        | "/api/v1/recordings/start"
        | "/api/v1/recordings/stop"
        | "/api/v1/me"
        | "/api/v1/sessions" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Normalize paths with dynamic segments
fn normalize_dynamic_endpoint(path: &str) -> String {
    // /api/v1/sessions/{token} → parts.len() == 5
    if path.starts_with("/api/v1/sessions/") && path.split('/').count() == 5 {
        return "/api/v1/sessions/{token}".to_string();
    }

    "/other".to_string()
}

// ============================================================================
// Channel Metrics
// ============================================================================

/// Record a channel operation outcome.
///
/// Metric: `broker_channel_operations_total`
/// Labels: `operation` (create, join, share), `status`
pub fn record_channel_operation(operation: &str, status: &str) {
    counter!("broker_channel_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// External Service Metrics
// ============================================================================

/// Record a cloud recording API call.
///
/// Metric: `broker_recording_calls_total`, `broker_recording_call_duration_seconds`
/// Labels: `operation` (acquire, start, stop), `status`
pub fn record_recording_call(operation: &str, status: &str, duration: Duration) {
    histogram!("broker_recording_call_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("broker_recording_calls_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a transcription token fetch.
///
/// Metric: `broker_transcription_refresh_total`
/// Labels: `reason` (initial, stale), `status`
pub fn record_transcription_refresh(reason: &str, status: &str) {
    counter!("broker_transcription_refresh_total",
        "reason" => reason.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `broker_db_query_duration_seconds`, `broker_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("broker_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("broker_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
