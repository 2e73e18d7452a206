use serde::{Deserialize, Serialize};

use crate::prompt::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Dropped,
    Error,
}

/// Terminal result for one item ID. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl OutcomeRecord {
    pub fn ok(decision: Decision, tokens: u64, latency_ms: u64, timestamp: i64) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            decision: Some(decision),
            tokens: Some(tokens),
            latency_ms: Some(latency_ms),
            error: None,
            timestamp,
        }
    }

    pub fn error(error: impl Into<String>, latency_ms: Option<u64>, timestamp: i64) -> Self {
        Self {
            status: OutcomeStatus::Error,
            decision: None,
            tokens: None,
            latency_ms,
            error: Some(error.into()),
            timestamp,
        }
    }

    pub fn dropped(timestamp: i64) -> Self {
        Self {
            status: OutcomeStatus::Dropped,
            decision: None,
            tokens: None,
            latency_ms: None,
            error: None,
            timestamp,
        }
    }
}

/// One notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub id: String,
    pub destination: String,
    pub success: bool,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub timestamp: i64,
    pub tokens: u64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub id: String,
    pub decision: Decision,
    pub timestamp: i64,
}
