//! Dependency health.
//!
//! Turns the raw success/failure history of each external dependency into a
//! three-way status. Evaluation is a pure function of the recorded activity, the
//! freshness window and the current time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// External dependencies whose health is tracked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Dependency {
    /// The mailbox the items are listed and fetched from.
    Ingest,
    /// The LLM classification call.
    Classifier,
    /// The SMS provider.
    Notifier,
}

/// Health status of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    /// Last success is within the freshness window.
    Healthy,
    /// Interactions were recorded, but none succeeded recently enough.
    Degraded,
    /// Nothing was ever recorded.
    #[default]
    Unknown,
}

/// Interaction history of one dependency. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyActivity {
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
    pub last_attempt_ms: Option<i64>,
    pub successes: u64,
    pub failures: u64,
}

impl DependencyActivity {
    pub fn record(&mut self, success: bool, at_ms: i64) {
        self.last_attempt_ms = Some(self.last_attempt_ms.map_or(at_ms, |t| t.max(at_ms)));
        if success {
            self.successes += 1;
            self.last_success_ms = Some(self.last_success_ms.map_or(at_ms, |t| t.max(at_ms)));
        } else {
            self.failures += 1;
            self.last_failure_ms = Some(self.last_failure_ms.map_or(at_ms, |t| t.max(at_ms)));
        }
    }

    pub fn has_history(&self) -> bool {
        self.last_attempt_ms.is_some()
            || self.last_success_ms.is_some()
            || self.last_failure_ms.is_some()
    }
}

/// Health of one dependency as shown to status readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub dependency: Dependency,
    pub status: HealthStatus,
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
    pub window_secs: u64,
}

pub fn evaluate(activity: &DependencyActivity, window: Duration, now_ms: i64) -> HealthStatus {
    match activity.last_success_ms {
        Some(last) if now_ms.saturating_sub(last) <= window.as_millis() as i64 => {
            HealthStatus::Healthy
        }
        _ if activity.has_history() => HealthStatus::Degraded,
        _ => HealthStatus::Unknown,
    }
}

pub fn dependency_health(
    dependency: Dependency,
    activity: Option<&DependencyActivity>,
    window: Duration,
    now_ms: i64,
) -> DependencyHealth {
    let empty = DependencyActivity::default();
    let activity = activity.unwrap_or(&empty);
    DependencyHealth {
        dependency,
        status: evaluate(activity, window, now_ms),
        last_success_ms: activity.last_success_ms,
        last_failure_ms: activity.last_failure_ms,
        window_secs: window.as_secs(),
    }
}
