//! Metrics definitions for the key service
//!
//! All metrics follow Prometheus naming conventions:
//! - `ks_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! - `status`: 2 values (success, error)
//! - `trigger`: 3 values (initial, scheduled, manual)

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return its render handle.
///
/// # Errors
///
/// Fails if a global recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// A render handle backed by a private recorder that is not installed
/// globally. Lets several servers share one process.
pub fn detached_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// ============================================================================
// Rotation Metrics
// ============================================================================

/// Record key rotation attempt outcome
///
/// Metric: `ks_key_rotation_total`
/// Labels: `status`, `trigger`
pub fn record_key_rotation(status: &str, trigger: &str) {
    counter!("ks_key_rotation_total", "status" => status.to_string(), "trigger" => trigger.to_string())
        .increment(1);
}

/// Record key rotation last success timestamp
///
/// Metric: `ks_key_rotation_last_success_timestamp`
#[allow(clippy::cast_precision_loss)]
pub fn set_key_rotation_last_success(timestamp_secs: i64) {
    gauge!("ks_key_rotation_last_success_timestamp").set(timestamp_secs as f64);
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Metric: `ks_signing_key_age_seconds`
pub fn set_signing_key_age_seconds(age_seconds: f64) {
    gauge!("ks_signing_key_age_seconds").set(age_seconds.max(0.0));
}

/// Metric: `ks_verification_keys`
#[allow(clippy::cast_precision_loss)]
pub fn set_verification_keys(count: usize) {
    gauge!("ks_verification_keys").set(count as f64);
}

/// Metric: `ks_jwks_requests_total`
pub fn record_jwks_request() {
    counter!("ks_jwks_requests_total").increment(1);
}

// ============================================================================
// Audit Metrics
// ============================================================================

/// Record audit event persistence failure
///
/// Metric: `ks_audit_emit_failures_total`
pub fn record_audit_emit_failure() {
    counter!("ks_audit_emit_failures_total").increment(1);
}
