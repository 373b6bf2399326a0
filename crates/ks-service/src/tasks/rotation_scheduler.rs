//! Periodic rotation evaluation.
//!
//! # Graceful Shutdown
//!
//! The loop stops on cancellation. A tick already running (including a
//! rotation in its critical section) completes before the loop observes
//! the token.

use crate::services::rotation_manager::{RotationManager, TickOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// Run the scheduler until `cancel_token` fires.
pub async fn run_rotation_scheduler(
    manager: Arc<RotationManager>,
    tick_every: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick_every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        target: "ks.scheduler",
        tick_secs = tick_every.as_secs(),
        "Rotation scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!(target: "ks.scheduler", "Rotation scheduler received shutdown signal, exiting");
                break;
            }
            _ = interval.tick() => {
                match manager.tick().await {
                    Ok(TickOutcome::Rotated(outcome)) => {
                        info!(
                            target: "ks.scheduler",
                            new_key_id = %outcome.new_key_id,
                            "Scheduled rotation completed"
                        );
                    }
                    Ok(TickOutcome::NotDue | TickOutcome::Busy) => {}
                    Err(e) => {
                        // Already audited; the next tick retries.
                        tracing::warn!(target: "ks.scheduler", error = %e, "Scheduled rotation failed");
                    }
                }
            }
        }
    }
}

/// Spawn the scheduler; await the handle after cancelling to drain it.
pub fn spawn_rotation_scheduler(
    manager: Arc<RotationManager>,
    tick_every: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        run_rotation_scheduler(manager, tick_every, cancel_token)
            .instrument(tracing::info_span!("ks.scheduler.rotation")),
    )
}
