//! Metrics definitions for the clinic service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `clinic_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP verbs
//! - `endpoint`: route templates, unknown paths collapse to `/other`
//! - `status`: success, error, timeout
//! - `operation`: repository operation names fixed in code
//! - `kind`, `outcome`: fixed sets per metric

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the render handle.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("clinic_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("clinic_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `clinic_http_requests_total`, `clinic_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("clinic_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("clinic_http_requests_total",
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

/// Normalize a request path to its route template.
///
/// UUID segments become `{id}`. Paths outside the API collapse to `/other`.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/health" | "/ready" | "/metrics" => return path.to_string(),
        _ => {}
    }

    if !path.starts_with("/api/v1/") {
        return "/other".to_string();
    }

    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    if segments.len() > 8 {
        return "/other".to_string();
    }

    let normalized: Vec<&str> = segments
        .iter()
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{id}"
            } else if segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
            {
                segment
            } else {
                "{value}"
            }
        })
        .collect();

    normalized.join("/")
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `clinic_db_query_duration_seconds`, `clinic_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("clinic_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("clinic_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Queue Metrics
// ============================================================================

/// Record a queue recalculation.
///
/// Metric: `clinic_queue_recalculations_total`
/// Labels: `trigger` (booking, cancel, walk_in, check_in, call_next, complete, skip, delay)
pub fn record_queue_recalculation(trigger: &'static str) {
    counter!("clinic_queue_recalculations_total", "trigger" => trigger).increment(1);
}

/// Adjust the live subscriber gauge.
///
/// Metric: `clinic_queue_subscribers`
/// Labels: `transport` (sse, ws)
pub fn adjust_queue_subscribers(transport: &'static str, delta: f64) {
    let gauge = gauge!("clinic_queue_subscribers", "transport" => transport);
    if delta >= 0.0 {
        gauge.increment(delta);
    } else {
        gauge.decrement(-delta);
    }
}

// ============================================================================
// Notification / Auth Metrics
// ============================================================================

/// Record a notification attempt.
///
/// Metric: `clinic_notifications_total`
/// Labels: `kind` (otp, appointment_confirmation, ...), `channel`, `outcome`
pub fn record_notification(kind: &'static str, channel: &'static str, outcome: &'static str) {
    counter!("clinic_notifications_total",
        "kind" => kind,
        "channel" => channel,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an OTP verification outcome.
///
/// Metric: `clinic_otp_verifications_total`
/// Labels: `outcome` (success, invalid_code, expired, locked, not_found)
pub fn record_otp_verification(outcome: &'static str) {
    counter!("clinic_otp_verifications_total", "outcome" => outcome).increment(1);
}

/// Record reminders sent by the scheduler.
///
/// Metric: `clinic_reminders_sent_total`
/// Labels: `kind` (medicine, appointment), `outcome`
pub fn record_reminder(kind: &'static str, outcome: &'static str) {
    counter!("clinic_reminders_sent_total", "kind" => kind, "outcome" => outcome).increment(1);
}
