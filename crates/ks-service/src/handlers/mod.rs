pub mod health_handler;
pub mod jwks_handler;
pub mod metrics_handler;
pub mod rotation_handler;
