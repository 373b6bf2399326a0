//! Observability for the key service.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Key material and tokens never appear in logs or metric labels.

pub mod metrics;
