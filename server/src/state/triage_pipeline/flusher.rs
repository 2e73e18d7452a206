//! Ledger Flusher
//!
//! Debounces ledger writes: persists on a fixed interval, only when something
//! changed, and once more on shutdown.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ledger::OutcomeLedger;

pub fn run_flush_loop(
    ledger: Arc<OutcomeLedger>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tracing::info!("Starting ledger flusher every {}ms...", interval.as_millis());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Ledger flusher shutting down");
                    if ledger.persist().await.is_ok() {
                        tracing::info!("Final ledger snapshot written to {}", ledger.path().display());
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if let Ok(true) = ledger.flush().await {
                        tracing::debug!("Ledger flushed");
                    }
                }
            }
        }
    })
}
