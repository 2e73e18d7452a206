use std::{path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::email::Item;

/// What the classifier decided for one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub label: String,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub decision: Decision,
    pub tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),
    #[error("classifier api error: {0}")]
    Api(String),
    #[error("could not build prompt: {0}")]
    Prompt(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Waits until a request may be sent. Callers await this before `classify`,
    /// so pacing and backoff never count against the call's timeout.
    async fn ready(&self) {}

    /// Classifies one item using the prompt template at `prompt_path`.
    /// Implementations must give up once `timeout` has elapsed.
    async fn classify(
        &self,
        item: &Item,
        prompt_path: &Path,
        timeout: Duration,
    ) -> Result<Classification, ClassifierError>;
}
