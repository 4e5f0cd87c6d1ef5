//! Periodic reservation expiry

use std::time::Duration;

use tokio::task::JoinHandle;

use super::reservations::ReservationsService;

/// Run `expire_stale` every `period` until the task is aborted.
///
/// A failed sweep is logged and retried on the next tick.
/// `period` must be non-zero; `LoansConfig::validate` enforces this for the server.
pub fn spawn_expiry_sweep(reservations: ReservationsService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match reservations.expire_stale().await {
                Ok(0) => tracing::debug!("Expiry sweep: nothing to expire"),
                Ok(count) => tracing::info!(count, "Expiry sweep completed"),
                Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
            }
        }
    })
}
