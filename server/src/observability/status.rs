use serde::Serialize;
use strum::IntoEnumIterator;

use crate::{
    ledger::{DecisionEntry, OutcomeLedger, SendRecord, Stats},
    server_config::HealthConfig,
    util::elapsed_ms,
};

use super::{
    common::{format_age_ms, format_table, format_table_with_title},
    health::dependency_health,
    Dependency, DependencyHealth,
};

/// Read-only view served to status readers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub generated_at: i64,
    pub dry_run: bool,
    pub cycle_running: bool,
    pub in_flight: usize,
    pub stats: Stats,
    pub health: Vec<DependencyHealth>,
    pub recent_decisions: Vec<DecisionEntry>,
    pub recent_sends: Vec<SendRecord>,
}

/// Live values that only the running pipeline knows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveQueue {
    pub depth: usize,
    pub in_flight: usize,
    pub cycle_running: bool,
}

impl StatusSnapshot {
    pub fn build(
        ledger: &OutcomeLedger,
        health_config: &HealthConfig,
        dry_run: bool,
        live: LiveQueue,
        now_ms: i64,
    ) -> Self {
        let mut stats = ledger.stats();
        stats.llm_queue.depth = live.depth;

        let health = Dependency::iter()
            .map(|dep| {
                dependency_health(
                    dep,
                    stats.health.get(&dep),
                    health_config.freshness_window(dep),
                    now_ms,
                )
            })
            .collect();

        Self {
            generated_at: now_ms,
            dry_run,
            cycle_running: live.cycle_running,
            in_flight: live.in_flight,
            stats,
            health,
            recent_decisions: ledger.recent_decisions(),
            recent_sends: ledger.recent_sends(),
        }
    }

    /// Plain-text table for the log.
    pub fn to_table(&self) -> String {
        let queue = &self.stats.llm_queue;
        let mut rows = vec![
            vec!["queue depth".to_string(), queue.depth.to_string()],
            vec!["in flight".to_string(), self.in_flight.to_string()],
            vec!["dropped".to_string(), queue.dropped_total.to_string()],
            vec![
                "last dropped".to_string(),
                queue.last_dropped_id.clone().unwrap_or_else(|| "-".to_string()),
            ],
            vec![
                "llm requests".to_string(),
                self.stats.llm_requests.to_string(),
            ],
            vec![
                "tokens/sec".to_string(),
                format!(
                    "{:.1} ({} samples)",
                    self.stats.llm_tps.avg_tps, self.stats.llm_tps.samples
                ),
            ],
        ];

        for health in &self.health {
            let last_success = health
                .last_success_ms
                .map(|t| format!("{} ago", format_age_ms(elapsed_ms(t, self.generated_at))))
                .unwrap_or_else(|| "never".to_string());
            rows.push(vec![
                health.dependency.to_string(),
                format!("{} (last success {})", health.status, last_success),
            ]);
        }

        let title = if self.dry_run {
            "Triage Status (dry run)"
        } else {
            "Triage Status"
        };
        format_table_with_title(title, &["Metric", "Value"], &rows)
    }

    /// Plain-text table of the recent decisions, newest last.
    pub fn decisions_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .recent_decisions
            .iter()
            .map(|entry| {
                vec![
                    entry.id.clone(),
                    entry.decision.label.clone(),
                    entry.decision.notify.to_string(),
                    format!(
                        "{} ago",
                        format_age_ms(elapsed_ms(entry.timestamp, self.generated_at))
                    ),
                ]
            })
            .collect();
        format_table(&["Item", "Label", "Notify", "Decided"], &rows)
    }
}
