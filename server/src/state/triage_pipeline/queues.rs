//! Admission Queue
//!
//! Bounded FIFO between ingestion and the worker pool. When the budget is used up
//! the oldest still-queued entry is evicted and recorded as `dropped`; entries a
//! worker has already taken are never evicted. The capacity budget counts both
//! queued and in-flight entries.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    email::Item,
    ledger::{LedgerError, OutcomeLedger},
    util::now_ms,
};

use super::types::QueueEntry;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    in_flight: usize,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

pub struct AdmissionQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    ledger: Arc<OutcomeLedger>,
    /// Signalled once per admitted entry.
    available: Notify,
    /// Signalled when the queue is empty and no entry is in flight.
    idle: Notify,
}

/// An entry taken by a worker. Dropping it releases the in-flight slot.
pub struct InFlight<'a> {
    queue: &'a AdmissionQueue,
    pub entry: QueueEntry,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let idle = {
            let mut state = self.queue.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_idle()
        };
        if idle {
            self.queue.idle.notify_waiters();
        }
    }
}

impl AdmissionQueue {
    pub fn new(capacity: usize, ledger: Arc<OutcomeLedger>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            ledger,
            available: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Admits `item`, evicting the oldest queued entries while the budget is full.
    /// Returns the IDs that were evicted.
    pub fn enqueue(&self, item: Item) -> Vec<String> {
        let (evicted, depth) = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            while state.pending.len() + state.in_flight >= self.capacity {
                match state.pending.pop_front() {
                    Some(oldest) => evicted.push(oldest.item.id),
                    // Only in-flight entries left, which are never evicted
                    None => break,
                }
            }
            state.pending.push_back(QueueEntry {
                item,
                admitted_at: now_ms(),
            });
            (evicted, state.pending.len())
        };

        for id in &evicted {
            tracing::debug!("Queue full, dropped {}", id);
            match self.ledger.record_dropped(id) {
                Ok(()) => {}
                Err(e @ LedgerError::DuplicateOutcome { .. }) => {
                    tracing::warn!("Ignoring drop outcome: {}", e);
                }
                Err(e) => tracing::error!("Could not record drop of {}: {}", id, e),
            }
        }
        self.ledger.set_queue_depth(depth);
        self.available.notify_one();

        evicted
    }

    fn try_dequeue(&self) -> Option<InFlight<'_>> {
        let (entry, depth) = {
            let mut state = self.state.lock();
            let entry = state.pending.pop_front()?;
            state.in_flight += 1;
            (entry, state.pending.len())
        };
        self.ledger.set_queue_depth(depth);
        Some(InFlight { queue: self, entry })
    }

    /// Waits for the next entry in FIFO order. Returns `None` once `shutdown` is
    /// cancelled; entries still queued at that point stay unprocessed.
    pub async fn dequeue(&self, shutdown: &CancellationToken) -> Option<InFlight<'_>> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            if let Some(in_flight) = self.try_dequeue() {
                return Some(in_flight);
            }

            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(in_flight) = self.try_dequeue() {
                return Some(in_flight);
            }

            tokio::select! {
                _ = notified => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    /// Resolves once nothing is queued and nothing is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    /// Number of queued entries, excluding in-flight ones.
    pub fn depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    #[cfg(test)]
    pub fn pending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|e| e.item.id.clone())
            .collect()
    }
}
