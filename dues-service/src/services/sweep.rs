//! Periodic reconciliation sweep.

use crate::services::ledger::LedgerService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawn a task that re-syncs every due each `interval` until `shutdown` is
/// cancelled. The first sweep runs one interval after startup.
pub fn spawn_sweeper(
    ledger: Arc<LedgerService>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "Reconciliation sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reconciliation sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = ledger.reconcile_all().await {
                        tracing::error!(error = %e, "Scheduled reconciliation sweep failed");
                    }
                }
            }
        }
    })
}
