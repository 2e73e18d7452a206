//! Outbound notifications for decisions that ask for one.

pub mod twilio;

use std::time::Duration;

use async_trait::async_trait;

use crate::{email::Item, prompt::Decision};

pub use twilio::TwilioNotifier;

/// Provider acknowledgement for a delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub destination: String,
    pub provider_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notifier is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("notifier transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notifier api error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("notifier timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Where notifications end up, recorded on every send attempt.
    fn destination(&self) -> &str;

    async fn send(&self, item: &Item, decision: &Decision) -> Result<SendReceipt, NotifierError>;
}
