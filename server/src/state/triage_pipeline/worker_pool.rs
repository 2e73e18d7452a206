//! Worker Pool
//!
//! A fixed set of workers pulling from the admission queue. Each worker holds one
//! entry at a time, so the worker count bounds concurrent classifier calls.

use std::{panic::AssertUnwindSafe, time::Instant};

use futures::{
    stream::{self, StreamExt},
    FutureExt,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    email::Item,
    ledger::{LedgerError, OutcomeLedger, OutcomeRecord, SendRecord},
    notify::NotifierError,
    observability::Dependency,
    prompt::{Classification, ClassifierError, Decision},
    state::context::AppContext,
    util::{elapsed_ms, now_ms},
};

use super::types::QueueEntry;

pub struct WorkerPool;

impl WorkerPool {
    /// Spawns `queue.concurrency` workers. The returned handle resolves after
    /// `shutdown` is cancelled and every worker has finished its current entry.
    pub fn spawn(ctx: AppContext, shutdown: CancellationToken) -> JoinHandle<()> {
        let max_workers = ctx.config.queue.concurrency.max(1);
        info!("Starting triage worker pool with {} workers...", max_workers);

        tokio::spawn(async move {
            stream::iter(0..max_workers)
                .for_each_concurrent(max_workers, |worker_id| {
                    let ctx = ctx.clone();
                    let shutdown = shutdown.clone();
                    async move { run_worker(worker_id, ctx, shutdown).await }
                })
                .await;
            info!("Triage worker pool stopped");
        })
    }
}

async fn run_worker(worker_id: usize, ctx: AppContext, shutdown: CancellationToken) {
    debug!("Worker {} started", worker_id);

    while let Some(in_flight) = ctx.queue.dequeue(&shutdown).await {
        let id = in_flight.entry.item.id.clone();

        let result = AssertUnwindSafe(process_entry(&ctx, &in_flight.entry, &shutdown))
            .catch_unwind()
            .await;

        if let Err(panic) = result {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "Unknown panic".to_string());
            error!(
                "Triage worker {} panicked on {}, recovering: {}",
                worker_id, id, msg
            );
            record_outcome(
                &ctx.ledger,
                &id,
                OutcomeRecord::error(format!("worker panicked: {msg}"), None, now_ms()),
            );
        }

        // Releases the in-flight slot only after the outcome is recorded
        drop(in_flight);
    }

    debug!("Worker {} stopped", worker_id);
}

async fn process_entry(ctx: &AppContext, entry: &QueueEntry, shutdown: &CancellationToken) {
    let item = &entry.item;
    let timeout = ctx.config.classifier.timeout();

    // Rate limiting is waited out before the timeout and latency clock start
    tokio::select! {
        _ = ctx.classifier.ready() => {}
        _ = shutdown.cancelled() => {
            info!("Shutdown while waiting to classify {}, leaving it for the next start", item.id);
            return;
        }
    }

    ctx.ledger.record_request();
    let started = Instant::now();
    let result = match tokio::time::timeout(
        timeout,
        ctx.classifier
            .classify(item, &ctx.config.settings.prompt_path, timeout),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ClassifierError::Timeout(timeout)),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Classification { decision, tokens }) => {
            ctx.ledger.record_interaction(Dependency::Classifier, true);
            ctx.ledger.record_tokens(tokens, latency_ms);
            debug!(
                "Classified {} as {} in {}ms ({} tokens, waited {}ms)",
                item.id,
                decision.label,
                latency_ms,
                tokens,
                queue_wait_ms(entry)
            );

            let notify = decision.notify;
            record_outcome(
                &ctx.ledger,
                &item.id,
                OutcomeRecord::ok(decision.clone(), tokens, latency_ms, now_ms()),
            );
            if notify {
                send_notification(ctx, item, &decision).await;
            }
        }
        Err(e) => {
            warn!("Classification failed for {}: {}", item.id, e);
            ctx.ledger.record_interaction(Dependency::Classifier, false);
            record_outcome(
                &ctx.ledger,
                &item.id,
                OutcomeRecord::error(e.to_string(), Some(latency_ms), now_ms()),
            );
        }
    }
}

fn queue_wait_ms(entry: &QueueEntry) -> u64 {
    elapsed_ms(entry.admitted_at, now_ms())
}

async fn send_notification(ctx: &AppContext, item: &Item, decision: &Decision) {
    if ctx.config.settings.dry_run {
        info!(
            "Dry run: skipping notification for {} ({})",
            item.id, decision.label
        );
        return;
    }

    let timeout = ctx.config.notifier.timeout();
    let result = match tokio::time::timeout(timeout, ctx.notifier.send(item, decision)).await {
        Ok(result) => result,
        Err(_) => Err(NotifierError::Timeout(timeout)),
    };

    let send = match result {
        Ok(receipt) => {
            ctx.ledger.record_interaction(Dependency::Notifier, true);
            info!("Notified {} about {}", receipt.destination, item.id);
            SendRecord {
                id: item.id.clone(),
                destination: receipt.destination,
                success: true,
                provider_id: receipt.provider_id,
                error: None,
                timestamp: now_ms(),
            }
        }
        Err(e) => {
            ctx.ledger.record_interaction(Dependency::Notifier, false);
            warn!("Notification for {} failed: {}", item.id, e);
            SendRecord {
                id: item.id.clone(),
                destination: ctx.notifier.destination().to_string(),
                success: false,
                provider_id: None,
                error: Some(e.to_string()),
                timestamp: now_ms(),
            }
        }
    };
    ctx.ledger.record_send(send);
}

/// Records a terminal outcome, treating a duplicate as a logged anomaly.
pub(super) fn record_outcome(ledger: &OutcomeLedger, id: &str, outcome: OutcomeRecord) {
    match ledger.record(id, outcome) {
        Ok(()) => {}
        Err(e @ LedgerError::DuplicateOutcome { .. }) => {
            warn!("Ignoring second outcome: {}", e);
        }
        Err(e) => error!("Could not record outcome for {}: {}", id, e),
    }
}
