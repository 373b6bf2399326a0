pub mod audit;
pub mod key_generator;
pub mod key_resolver;
pub mod rotation_manager;

use crate::errors::KsError;
use std::future::Future;
use std::time::Duration;

/// Bound a key store call so a hung backend cannot wedge rotation.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, KsError>
where
    F: Future<Output = Result<T, KsError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                target: "ks.store",
                operation = operation,
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Key store call timed out"
            );
            Err(KsError::Persistence(format!(
                "{} timed out after {:?}",
                operation, limit
            )))
        }
    }
}
