//! Outcome Ledger
//!
//! Single owner of everything the triage pipeline remembers: one terminal outcome
//! per item ID, the recent decision/send history, token events and the aggregate
//! counters. All mutation goes through this API, which marks the state dirty.
//! `persist` writes the whole document to a temp file and renames it over the
//! canonical path, so a reader only ever sees a complete snapshot.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{
    observability::{throughput::windowed_tps, Dependency},
    server_config::RetentionConfig,
    util::now_ms,
};

use super::{
    persisted_state::push_bounded, DecisionEntry, OutcomeRecord, OutcomeStatus, PersistedState,
    SendRecord, Stats, TokenEvent,
};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("outcome for {id} already recorded as {existing}")]
    DuplicateOutcome { id: String, existing: OutcomeStatus },
    #[error("failed to persist ledger: {0}")]
    Persistence(#[from] io::Error),
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct OutcomeLedger {
    path: PathBuf,
    retention: RetentionConfig,
    state: RwLock<PersistedState>,
    dirty: AtomicBool,
    flush_lock: tokio::sync::Mutex<()>,
}

impl OutcomeLedger {
    pub fn new(path: impl Into<PathBuf>, retention: RetentionConfig) -> Self {
        Self::with_state(path.into(), retention, PersistedState::default())
    }

    fn with_state(path: PathBuf, retention: RetentionConfig, mut state: PersistedState) -> Self {
        state.normalize(
            retention.max_processed_ids,
            retention.max_recent_decisions,
            retention.max_recent_sends,
            retention.max_token_events,
        );
        state.stats.llm_tps = windowed_tps(&state.token_events, retention.tps_window);
        // Nothing is queued in a fresh process
        state.stats.llm_queue.depth = 0;

        Self {
            path,
            retention,
            state: RwLock::new(state),
            dirty: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Loads the last persisted snapshot. A missing or unreadable file yields an
    /// empty ledger.
    pub async fn load(path: impl Into<PathBuf>, retention: RetentionConfig) -> Self {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(state) => {
                    info!(
                        "Loaded ledger from {} ({} processed items)",
                        path.display(),
                        state.processed.len()
                    );
                    state
                }
                Err(e) => {
                    warn!(
                        "Ledger file {} is corrupt, starting empty: {}",
                        path.display(),
                        e
                    );
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No ledger at {}, starting empty", path.display());
                PersistedState::default()
            }
            Err(e) => {
                warn!(
                    "Could not read ledger {}, starting empty: {}",
                    path.display(),
                    e
                );
                PersistedState::default()
            }
        };

        Self::with_state(path, retention, state)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().processed.contains_key(id)
    }

    pub fn outcome(&self, id: &str) -> Option<OutcomeRecord> {
        self.state.read().processed.get(id).cloned()
    }

    /// Records the terminal outcome for `id`. The first outcome wins; later ones
    /// are rejected with [`LedgerError::DuplicateOutcome`].
    pub fn record(&self, id: &str, outcome: OutcomeRecord) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if let Some(existing) = state.processed.get(id) {
            return Err(LedgerError::DuplicateOutcome {
                id: id.to_string(),
                existing: existing.status,
            });
        }

        if let Some(decision) = &outcome.decision {
            let entry = DecisionEntry {
                id: id.to_string(),
                decision: decision.clone(),
                timestamp: outcome.timestamp,
            };
            push_bounded(
                &mut state.recent_decisions,
                entry,
                self.retention.max_recent_decisions,
            );
        }

        let out_of_order = state
            .processed
            .last()
            .is_some_and(|(_, last)| last.timestamp > outcome.timestamp);
        state.processed.insert(id.to_string(), outcome);
        if out_of_order {
            state
                .processed
                .sort_by(|_, a, _, b| a.timestamp.cmp(&b.timestamp));
        }

        let pruned = state.prune_processed(self.retention.max_processed_ids, Some(id));
        if pruned > 0 {
            debug!("Pruned {} processed ids", pruned);
        }
        drop(state);

        self.mark_dirty();
        Ok(())
    }

    /// Records an eviction from the admission queue. The drop counters move even
    /// when the ID already had an outcome.
    pub fn record_dropped(&self, id: &str) -> Result<(), LedgerError> {
        {
            let mut state = self.state.write();
            state.stats.llm_queue.dropped_total += 1;
            state.stats.llm_queue.last_dropped_id = Some(id.to_string());
        }
        self.mark_dirty();
        self.record(id, OutcomeRecord::dropped(now_ms()))
    }

    pub fn record_request(&self) {
        self.state.write().stats.llm_requests += 1;
        self.mark_dirty();
    }

    pub fn record_tokens(&self, tokens: u64, latency_ms: u64) {
        self.record_tokens_at(tokens, latency_ms, now_ms());
    }

    pub fn record_tokens_at(&self, tokens: u64, latency_ms: u64, timestamp: i64) {
        let mut state = self.state.write();
        let event = TokenEvent {
            timestamp,
            tokens,
            latency_ms,
        };
        push_bounded(
            &mut state.token_events,
            event,
            self.retention.max_token_events,
        );
        state.stats.llm_tps = windowed_tps(&state.token_events, self.retention.tps_window);
        drop(state);

        self.mark_dirty();
    }

    pub fn record_send(&self, send: SendRecord) {
        push_bounded(
            &mut self.state.write().recent_sends,
            send,
            self.retention.max_recent_sends,
        );
        self.mark_dirty();
    }

    pub fn record_interaction(&self, dependency: Dependency, success: bool) {
        self.record_interaction_at(dependency, success, now_ms());
    }

    pub fn record_interaction_at(&self, dependency: Dependency, success: bool, at_ms: i64) {
        self.state
            .write()
            .stats
            .health
            .entry(dependency)
            .or_default()
            .record(success, at_ms);
        self.mark_dirty();
    }

    /// Mirrors the admission queue's pending count into the stats.
    pub fn set_queue_depth(&self, depth: usize) {
        let mut state = self.state.write();
        if state.stats.llm_queue.depth != depth {
            state.stats.llm_queue.depth = depth;
            drop(state);
            self.mark_dirty();
        }
    }

    pub fn stats(&self) -> Stats {
        self.state.read().stats.clone()
    }

    pub fn recent_decisions(&self) -> Vec<DecisionEntry> {
        self.state.read().recent_decisions.iter().cloned().collect()
    }

    pub fn recent_sends(&self) -> Vec<SendRecord> {
        self.state.read().recent_sends.iter().cloned().collect()
    }

    #[cfg(test)]
    pub fn processed_len(&self) -> usize {
        self.state.read().processed.len()
    }

    /// Full copy of the in-memory state.
    #[cfg(test)]
    pub fn view(&self) -> PersistedState {
        self.state.read().clone()
    }

    /// Persists only when something changed since the last successful write.
    pub async fn flush(&self) -> Result<bool, LedgerError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Writes the full state to `<path>.tmp` and renames it over `path`.
    /// On failure the previous file is untouched and the state stays dirty.
    pub async fn persist(&self) -> Result<(), LedgerError> {
        let _guard = self.flush_lock.lock().await;

        // Cleared before the snapshot so writes racing with this flush re-mark it
        self.dirty.store(false, Ordering::Release);
        let result = self.write_snapshot().await;
        if let Err(e) = &result {
            self.mark_dirty();
            warn!("Ledger persist to {} failed: {}", self.path.display(), e);
        }
        result
    }

    async fn write_snapshot(&self) -> Result<(), LedgerError> {
        let json = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&*state)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!("Ledger persisted to {}", self.path.display());
        Ok(())
    }
}
