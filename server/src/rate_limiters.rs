use std::sync::Arc;

use leaky_bucket::RateLimiter;
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

use crate::server_config::ClassifierConfig;

const BACKOFF_DURATION: Duration = Duration::from_secs(60);

/// Paces classifier requests. A rate-limit reply from the API pauses new
/// requests until the backoff period has passed.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    backoff_until: Arc<Mutex<Option<Instant>>>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(prompt_limit_per_sec: usize, refill_interval_ms: u64, refill_amount: usize) -> Self {
        let prompt = RateLimiter::builder()
            .initial(prompt_limit_per_sec.max(1))
            .interval(Duration::from_millis(refill_interval_ms.max(1)))
            .max(prompt_limit_per_sec.max(1))
            .refill(refill_amount.max(1))
            .build();

        Self {
            prompt: Arc::new(prompt),
            backoff_until: Arc::new(Mutex::new(None)),
            backoff_duration: BACKOFF_DURATION,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.rate_limit_per_sec,
            config.refill_interval_ms,
            config.refill_amount,
        )
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        let until = (*self.backoff_until.lock())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Waits out any remaining backoff, then takes one token from the bucket.
    pub async fn acquire_one(&self) {
        while let Some(remaining) = self.backoff_remaining() {
            tokio::time::sleep(remaining).await;
        }
        self.prompt.acquire_one().await;
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff_remaining().is_some()
    }

    pub fn trigger_backoff(&self) {
        let mut until = self.backoff_until.lock();
        if (*until).is_some_and(|t| t > Instant::now()) {
            return;
        }
        tracing::info!("Triggering classifier backoff...");
        *until = Some(Instant::now() + self.backoff_duration);
    }

    pub fn get_status(&self) -> String {
        let prompt_bucket = format!("{}/{}", self.prompt.balance(), self.prompt.max());
        if self.in_backoff() {
            format!("prompts: {} (BACKOFF)", prompt_bucket)
        } else {
            format!("prompts: {}", prompt_bucket)
        }
    }
}
