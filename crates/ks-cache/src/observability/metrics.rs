//! Metrics definitions for the key distribution cache
//!
//! All metrics follow Prometheus naming conventions:
//! - `ks_cache_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! - `status`: 2 values (success, error)
//! - `result`: 4 values (fresh, stale, fallback, cold)

use metrics::{counter, gauge};

/// Record the outcome of one refresh cycle
///
/// Metric: `ks_cache_refresh_total`
/// Labels: `status`
pub fn record_cache_refresh(status: &str) {
    counter!("ks_cache_refresh_total", "status" => status.to_string()).increment(1);
}

/// Record which path served a `get`
///
/// Metric: `ks_cache_reads_total`
/// Labels: `result`
pub fn record_cache_read(result: &str) {
    counter!("ks_cache_reads_total", "result" => result.to_string()).increment(1);
}

/// Metric: `ks_cache_keys`
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_keys(count: usize) {
    gauge!("ks_cache_keys").set(count as f64);
}
