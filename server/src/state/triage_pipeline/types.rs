//! Triage Pipeline Types

use serde::Serialize;

use crate::email::Item;

/// An item waiting in the admission queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub item: Item,
    pub admitted_at: i64,
}

/// Summary of one poll-and-drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// IDs returned by the source.
    pub listed: usize,
    /// IDs skipped because the ledger (or this batch) already had them.
    pub skipped_known: usize,
    /// Items handed to the admission queue.
    pub admitted: usize,
    /// Queued items evicted to make room during this cycle.
    pub dropped: usize,
    /// Items whose full fetch failed; they are retried next cycle.
    pub fetch_failed: usize,
    pub source_error: Option<String>,
    pub elapsed_ms: u64,
}
