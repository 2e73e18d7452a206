use anyhow::{ensure, Context};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::{
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::observability::Dependency;

const ENV_PREFIX: &str = "TRIAGE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dry_run: bool,
    pub state_path: PathBuf,
    pub prompt_path: PathBuf,
    pub poll_interval_secs: u64,
    pub max_results: usize,
    pub filter_query: Option<String>,
    pub flush_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dry_run: false,
            state_path: PathBuf::from("data/state.json"),
            prompt_path: PathBuf::from("config/prompt.txt"),
            poll_interval_secs: 60,
            max_results: 25,
            filter_query: None,
            flush_interval_ms: 2_000,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Budget shared by queued and in-flight items.
    pub capacity: usize,
    /// Number of workers, which is also the bound on concurrent classifier calls.
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_ms: u64,
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: u64,
    pub refill_amount: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "mistral-small-latest".to_string(),
            temperature: 0.2,
            timeout_ms: 30_000,
            rate_limit_per_sec: 5,
            refill_interval_ms: 1_000,
            refill_amount: 5,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twilio.com".to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            to_number: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Keeps the auth token out of the startup log
impl fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("from_number", &self.from_number)
            .field("to_number", &self.to_number)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_processed_ids: usize,
    pub max_recent_decisions: usize,
    pub max_recent_sends: usize,
    pub max_token_events: usize,
    /// Number of most recent token events averaged into `llm_tps.avg_tps`.
    pub tps_window: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_processed_ids: 5_000,
            max_recent_decisions: 50,
            max_recent_sends: 50,
            max_token_events: 200,
            tps_window: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub ingest_freshness_secs: u64,
    pub classifier_freshness_secs: u64,
    pub notifier_freshness_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ingest_freshness_secs: 10 * 60,
            classifier_freshness_secs: 30 * 60,
            notifier_freshness_secs: 24 * 60 * 60,
        }
    }
}

impl HealthConfig {
    pub fn freshness_window(&self, dependency: Dependency) -> Duration {
        let secs = match dependency {
            Dependency::Ingest => self.ingest_freshness_secs,
            Dependency::Classifier => self.classifier_freshness_secs,
            Dependency::Notifier => self.notifier_freshness_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub maildir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            maildir: PathBuf::from("data/inbox"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 5006 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub settings: Settings,
    pub queue: QueueConfig,
    pub classifier: ClassifierConfig,
    pub notifier: NotifierConfig,
    pub retention: RetentionConfig,
    pub health: HealthConfig,
    pub source: SourceConfig,
    pub server: HttpConfig,
}

impl ServerConfig {
    /// Loads `config.toml` from `APP_DIR` (or the workspace `config/` directory),
    /// then applies `TRIAGE__SECTION__KEY` environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_root().join("config.toml");
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let cfg: ServerConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path.display()))?
            .try_deserialize()
            .context("config.toml is invalid")?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.queue.capacity > 0, "queue.capacity must be at least 1");
        ensure!(
            self.queue.concurrency > 0,
            "queue.concurrency must be at least 1"
        );
        ensure!(
            self.settings.poll_interval_secs > 0,
            "settings.poll_interval_secs must be at least 1"
        );
        ensure!(
            self.settings.flush_interval_ms > 0,
            "settings.flush_interval_ms must be at least 1"
        );
        ensure!(
            self.retention.tps_window > 0,
            "retention.tps_window must be at least 1"
        );
        ensure!(
            self.retention.max_processed_ids > 0,
            "retention.max_processed_ids must be at least 1"
        );
        // Pruning an id that can still be listed would reprocess it every cycle
        ensure!(
            self.retention.max_processed_ids >= self.settings.max_results,
            "retention.max_processed_ids ({}) must be at least settings.max_results ({})",
            self.retention.max_processed_ids,
            self.settings.max_results
        );
        ensure!(
            self.classifier.timeout_ms > 0,
            "classifier.timeout_ms must be at least 1"
        );
        ensure!(
            self.notifier.timeout_ms > 0,
            "notifier.timeout_ms must be at least 1"
        );
        Url::parse(&self.classifier.endpoint).context("classifier.endpoint is not a valid url")?;
        Url::parse(&self.notifier.api_base).context("notifier.api_base is not a valid url")?;
        Ok(())
    }
}

fn config_root() -> PathBuf {
    if let Ok(dir) = env::var("APP_DIR") {
        return PathBuf::from(dir);
    }

    env::var("CARGO_MANIFEST_DIR")
        .ok()
        .and_then(|dir| Path::new(&dir).parent().map(|p| p.join("config")))
        .unwrap_or_else(|| PathBuf::from("config"))
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nQueue: {:?}\n\nClassifier: endpoint={} model={} timeout={}ms rate={}/s\n\nNotifier: {:?}\n\nRetention: {:?}\n\nHealth: {:?}\n\nSource: {:?}\n\nHttp: {:?}",
            self.settings,
            self.queue,
            self.classifier.endpoint,
            self.classifier.model,
            self.classifier.timeout_ms,
            self.classifier.rate_limit_per_sec,
            self.notifier,
            self.retention,
            self.health,
            self.source,
            self.server,
        )
    }
}
