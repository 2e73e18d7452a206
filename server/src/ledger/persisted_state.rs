use std::collections::{BTreeMap, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::observability::{Dependency, DependencyActivity, Throughput};

use super::records::{DecisionEntry, OutcomeRecord, SendRecord, TokenEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub depth: usize,
    pub dropped_total: u64,
    pub last_dropped_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub llm_requests: u64,
    pub llm_queue: QueueStats,
    pub llm_tps: Throughput,
    pub health: BTreeMap<Dependency, DependencyActivity>,
}

/// Everything the ledger writes to disk, as one JSON document.
///
/// `processed` is kept in ascending timestamp order so retention can prune from
/// the front. The recent lists hold the newest entry last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub processed: IndexMap<String, OutcomeRecord>,
    pub recent_decisions: VecDeque<DecisionEntry>,
    pub recent_sends: VecDeque<SendRecord>,
    pub token_events: VecDeque<TokenEvent>,
    pub stats: Stats,
}

pub(super) fn push_bounded<T>(list: &mut VecDeque<T>, value: T, max: usize) {
    list.push_back(value);
    trim_front(list, max);
}

impl PersistedState {
    /// Restores timestamp order and trims every list to its cap.
    pub(super) fn normalize(
        &mut self,
        max_processed: usize,
        max_decisions: usize,
        max_sends: usize,
        max_events: usize,
    ) {
        self.processed.sort_by(|_, a, _, b| a.timestamp.cmp(&b.timestamp));
        self.prune_processed(max_processed, None);
        trim_front(&mut self.recent_decisions, max_decisions);
        trim_front(&mut self.recent_sends, max_sends);
        trim_front(&mut self.token_events, max_events);
    }

    /// Drops the oldest outcomes until at most `max` remain, never removing `keep`.
    /// Returns how many went.
    pub(super) fn prune_processed(&mut self, max: usize, keep: Option<&str>) -> usize {
        let excess = self.processed.len().saturating_sub(max);
        if excess == 0 {
            return 0;
        }

        let pruned: Vec<String> = self
            .processed
            .keys()
            .filter(|id| Some(id.as_str()) != keep)
            .take(excess)
            .cloned()
            .collect();
        for id in &pruned {
            self.processed.shift_remove(id);
        }
        pruned.len()
    }
}

fn trim_front<T>(list: &mut VecDeque<T>, max: usize) {
    let excess = list.len().saturating_sub(max);
    list.drain(..excess);
}
