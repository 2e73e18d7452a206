//! Classifier throughput over a window of recent token events.

use serde::{Deserialize, Serialize};

use crate::ledger::TokenEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Throughput {
    /// Number of events averaged into `avg_tps`.
    pub samples: usize,
    /// Mean of `tokens / seconds` across those events.
    pub avg_tps: f64,
}

/// Averages per-event tokens/sec over the `window` most recent events.
/// Events with zero latency carry no rate and are skipped.
pub fn windowed_tps<'a, I>(events: I, window: usize) -> Throughput
where
    I: IntoIterator<Item = &'a TokenEvent>,
    I::IntoIter: DoubleEndedIterator,
{
    let rates: Vec<f64> = events
        .into_iter()
        .rev()
        .filter(|e| e.latency_ms > 0)
        .take(window)
        .map(|e| e.tokens as f64 / (e.latency_ms as f64 / 1000.0))
        .collect();

    if rates.is_empty() {
        return Throughput::default();
    }

    Throughput {
        samples: rates.len(),
        avg_tps: rates.iter().sum::<f64>() / rates.len() as f64,
    }
}
