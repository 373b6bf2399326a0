//! Background key set refresh.
//!
//! # Graceful Shutdown
//!
//! The loop stops on cancellation. A refresh cycle already in flight
//! completes (bounded by the HTTP timeout and retry budget) before the loop
//! observes the token. On exit the cache is shut down as well, so stale
//! reads stop starting their own refreshes.

use crate::cache::KeyDistributionCache;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// Refresh the cache every `refresh_interval` until `cancel_token` fires.
///
/// The first cycle runs one interval after start; the cold path of
/// [`KeyDistributionCache::get`] handles the initial fetch.
pub async fn run_refresh_loop(cache: Arc<KeyDistributionCache>, cancel_token: CancellationToken) {
    let period = cache.config().refresh_interval;
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        target: "ks_cache.refresh",
        refresh_secs = period.as_secs(),
        "Key refresh task started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!(target: "ks_cache.refresh", "Key refresh task received shutdown signal, exiting");
                cache.shutdown();
                break;
            }
            _ = interval.tick() => {
                // Failures are counted inside; the previous key set stays in place.
                if let Err(e) = cache.refresh_once().await {
                    tracing::debug!(target: "ks_cache.refresh", error = %e, "Scheduled refresh failed");
                }
            }
        }
    }
}

/// Spawn the refresh loop; await the handle after cancelling to drain it.
pub fn spawn_refresh_task(
    cache: Arc<KeyDistributionCache>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        run_refresh_loop(cache, cancel_token).instrument(tracing::info_span!("ks_cache.refresh")),
    )
}
