//! Poll Orchestrator
//!
//! Runs one ingestion-and-drain cycle at a time: list new items, skip the ones the
//! ledger already knows, fetch and admit the rest, wait for the workers to finish
//! everything admitted, then persist. A cycle requested while another is running
//! is a silent no-op.

use std::{collections::HashSet, sync::Arc, time::Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{observability::Dependency, state::context::AppContext};

use super::CycleReport;

#[derive(Clone)]
pub struct PollOrchestrator {
    ctx: AppContext,
    cycle_lock: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl PollOrchestrator {
    pub fn new(ctx: AppContext, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            cycle_lock: Arc::new(Mutex::new(())),
            shutdown,
        }
    }

    /// Runs a cycle unless one is already running, in which case returns `None`.
    pub async fn trigger(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Poll cycle already running, skipping");
            return None;
        };
        Some(self.run_cycle().await)
    }

    /// Starts a cycle on its own task. Returns `false` if one is already running.
    pub fn trigger_in_background(&self) -> bool {
        let Ok(guard) = self.cycle_lock.clone().try_lock_owned() else {
            debug!("Poll cycle already running, skipping");
            return false;
        };

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_cycle().await;
        });
        true
    }

    pub fn is_running(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let settings = &self.ctx.config.settings;
        let source = &self.ctx.source;
        let ledger = &self.ctx.ledger;

        let refs = match source
            .list_new_items(settings.max_results, settings.filter_query.as_deref())
            .await
        {
            Ok(refs) => {
                ledger.record_interaction(Dependency::Ingest, true);
                refs
            }
            Err(e) => {
                error!("Listing new items failed: {}", e);
                ledger.record_interaction(Dependency::Ingest, false);
                report.source_error = Some(e.to_string());
                return self.finish(report, started).await;
            }
        };
        report.listed = refs.len();

        let mut seen = HashSet::new();
        for item_ref in refs {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !seen.insert(item_ref.id.clone()) || ledger.contains(&item_ref.id) {
                report.skipped_known += 1;
                continue;
            }

            match source.fetch_full(&item_ref.id).await {
                Ok(item) => {
                    ledger.record_interaction(Dependency::Ingest, true);
                    let evicted = self.ctx.queue.enqueue(item);
                    report.admitted += 1;
                    report.dropped += evicted.len();
                }
                Err(e) => {
                    warn!("Fetching {} failed, will retry next cycle: {}", item_ref.id, e);
                    ledger.record_interaction(Dependency::Ingest, false);
                    report.fetch_failed += 1;
                }
            }
        }

        tokio::select! {
            _ = self.ctx.queue.wait_idle() => {}
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested, not waiting for the queue to drain");
            }
        }

        self.finish(report, started).await
    }

    async fn finish(&self, mut report: CycleReport, started: Instant) -> CycleReport {
        // Failures are logged by the ledger and retried by the next flush
        let _ = self.ctx.ledger.persist().await;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Poll cycle done in {}ms: listed {}, admitted {}, dropped {}, skipped {}, fetch failures {}",
            report.elapsed_ms,
            report.listed,
            report.admitted,
            report.dropped,
            report.skipped_known,
            report.fetch_failed
        );
        let snapshot = self.ctx.snapshot(true);
        info!("\n{}", snapshot.to_table());
        if report.admitted > 0 {
            debug!("Recent decisions:\n{}", snapshot.decisions_table());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        ledger::{OutcomeLedger, OutcomeStatus},
        observability::health::HealthStatus,
        state::triage_pipeline::WorkerPool,
        testing::fakes::{
            item, test_config, test_context, wait_until, GatedClassifier, RecordingNotifier,
            ScriptedSource,
        },
    };

    async fn run(orchestrator: &PollOrchestrator) -> CycleReport {
        tokio::time::timeout(Duration::from_secs(5), orchestrator.trigger())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_drains_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let state_path = config.settings.state_path.clone();

        let source = Arc::new(ScriptedSource::new(vec![
            item("m1"),
            item("m2"),
            item("bad1"),
        ]));
        let ctx = test_context(
            config.clone(),
            source.clone(),
            Arc::new(GatedClassifier::open()),
            Arc::new(RecordingNotifier::default()),
        );
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(ctx.clone(), shutdown.clone());
        let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());

        let report = run(&orchestrator).await;
        assert_eq!(report.listed, 3);
        assert_eq!(report.admitted, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(ctx.queue.depth(), 0);
        assert_eq!(ctx.ledger.outcome("m1").unwrap().status, OutcomeStatus::Ok);
        assert_eq!(ctx.ledger.outcome("bad1").unwrap().status, OutcomeStatus::Error);
        assert!(!ctx.ledger.is_dirty());

        // A second cycle only skips what is already known
        source.push(item("m3"));
        let report = run(&orchestrator).await;
        assert_eq!(report.skipped_known, 3);
        assert_eq!(report.admitted, 1);
        assert_eq!(ctx.ledger.stats().llm_requests, 4);

        let reloaded = OutcomeLedger::load(&state_path, config.retention.clone()).await;
        assert_eq!(reloaded.processed_len(), 4);

        shutdown.cancel();
        pool.await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_at_listing_size_never_reprocesses() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.settings.max_results = 4;
        config.retention.max_processed_ids = 4;
        config.validate().unwrap();

        let source = Arc::new(ScriptedSource::new(vec![
            item("m1"),
            item("m2"),
            item("m3"),
            item("m4"),
        ]));
        let ctx = test_context(
            config,
            source,
            Arc::new(GatedClassifier::open()),
            Arc::new(RecordingNotifier::default()),
        );
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(ctx.clone(), shutdown.clone());
        let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());

        let report = run(&orchestrator).await;
        assert_eq!(report.admitted, 4);
        for _ in 0..2 {
            let report = run(&orchestrator).await;
            assert_eq!(report.admitted, 0);
            assert_eq!(report.skipped_known, 4);
        }
        assert_eq!(ctx.ledger.stats().llm_requests, 4);

        shutdown.cancel();
        pool.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_failures_are_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![item("m1"), item("m2")]));
        source.fail_fetch("m2");

        let ctx = test_context(
            test_config(dir.path()),
            source.clone(),
            Arc::new(GatedClassifier::open()),
            Arc::new(RecordingNotifier::default()),
        );
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(ctx.clone(), shutdown.clone());
        let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());

        let report = run(&orchestrator).await;
        assert_eq!(report.fetch_failed, 1);
        assert!(!ctx.ledger.contains("m2"));

        source.clear_failures();
        let report = run(&orchestrator).await;
        assert_eq!(report.admitted, 1);
        assert_eq!(ctx.ledger.outcome("m2").unwrap().status, OutcomeStatus::Ok);

        shutdown.cancel();
        pool.await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_failure_degrades_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::default());
        source.fail_listing(true);

        let ctx = test_context(
            test_config(dir.path()),
            source,
            Arc::new(GatedClassifier::open()),
            Arc::new(RecordingNotifier::default()),
        );
        let orchestrator = PollOrchestrator::new(ctx.clone(), CancellationToken::new());

        let report = run(&orchestrator).await;
        assert!(report.source_error.is_some());

        let ingest = ctx
            .snapshot(false)
            .health
            .into_iter()
            .find(|h| h.dependency == Dependency::Ingest)
            .unwrap();
        assert_eq!(ingest.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_are_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(GatedClassifier::closed());
        let source = Arc::new(ScriptedSource::new(vec![item("m1")]));

        let ctx = test_context(
            test_config(dir.path()),
            source.clone(),
            classifier.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(ctx.clone(), shutdown.clone());
        let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());

        assert!(orchestrator.trigger_in_background());
        wait_until(|| classifier.started() == 1).await;

        assert!(orchestrator.is_running());
        assert!(orchestrator.trigger().await.is_none());
        assert!(!orchestrator.trigger_in_background());
        assert_eq!(source.list_calls(), 1);

        classifier.release(1);
        wait_until(|| !orchestrator.is_running()).await;
        assert_eq!(ctx.ledger.outcome("m1").unwrap().status, OutcomeStatus::Ok);

        shutdown.cancel();
        pool.await.unwrap();
    }
}
