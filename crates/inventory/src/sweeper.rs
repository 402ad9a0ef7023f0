//! Background task that reclaims stock from abandoned reservations.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ledger::StockLedger;

/// Spawns a task that runs [`StockLedger::expire_sweep`] every `interval`
/// until `shutdown` flips to true or its sender is dropped.
pub fn spawn_expiry_sweeper(
    ledger: StockLedger,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ledger.expire_sweep(ledger.now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    })
}
