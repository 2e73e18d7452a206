//! In-memory collaborators for pipeline tests.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::{
    email::{Item, ItemRef, ItemSource, SimplifiedMessage, SourceError},
    ledger::OutcomeLedger,
    notify::{Notifier, NotifierError, SendReceipt},
    prompt::{Classification, Classifier, ClassifierError, Decision},
    rate_limiters::RateLimiters,
    server_config::ServerConfig,
    state::AppContext,
};

pub fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        received_at: 0,
        message: SimplifiedMessage {
            from: Some("sender@example.com".to_string()),
            subject: Some(format!("Subject {id}")),
            body: Some(format!("Body of {id}")),
        },
    }
}

pub fn test_config(dir: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.settings.state_path = dir.join("state.json");
    config.settings.prompt_path = dir.join("prompt.txt");
    config.queue.capacity = 10;
    config.queue.concurrency = 2;
    config.classifier.timeout_ms = 5_000;
    config
}

pub fn test_context(
    config: ServerConfig,
    source: Arc<dyn ItemSource>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
) -> AppContext {
    let ledger = Arc::new(OutcomeLedger::new(
        config.settings.state_path.clone(),
        config.retention.clone(),
    ));
    AppContext::new(config, ledger, source, classifier, notifier)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Lists its items in insertion order and serves them by ID.
#[derive(Default)]
pub struct ScriptedSource {
    items: Mutex<Vec<Item>>,
    failing_fetches: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn push(&self, item: Item) {
        self.items.lock().push(item);
    }

    pub fn fail_fetch(&self, id: &str) {
        self.failing_fetches.lock().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_fetches.lock().clear();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemSource for ScriptedSource {
    async fn list_new_items(
        &self,
        max_results: usize,
        _filter_query: Option<&str>,
    ) -> Result<Vec<ItemRef>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SourceError::Io(std::io::Error::other("mailbox offline")));
        }
        Ok(self
            .items
            .lock()
            .iter()
            .take(max_results)
            .map(|item| ItemRef {
                id: item.id.clone(),
            })
            .collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<Item, SourceError> {
        if self.failing_fetches.lock().contains(id) {
            return Err(SourceError::Parse(id.to_string()));
        }
        self.items
            .lock()
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

/// Classifier whose calls block until permits are released.
///
/// IDs starting with `bad` fail, `panic` panics, `slow` never answers. Every
/// other item is labelled `important` with `notify` set and 100 tokens.
pub struct GatedClassifier {
    gate: Semaphore,
    started: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GatedClassifier {
    pub fn closed() -> Self {
        Self::with_permits(0)
    }

    pub fn open() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            started: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for GatedClassifier {
    async fn classify(
        &self,
        item: &Item,
        _prompt_path: &Path,
        _timeout: Duration,
    ) -> Result<Classification, ClassifierError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.active);
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }

        if item.id.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if item.id.starts_with("panic") {
            panic!("classifier blew up on {}", item.id);
        }
        if item.id.starts_with("bad") {
            return Err(ClassifierError::MalformedResponse(format!(
                "no label for {}",
                item.id
            )));
        }

        Ok(Classification {
            decision: Decision {
                label: "important".to_string(),
                notify: true,
                reason: Some(format!("{} looks important", item.id)),
            },
            tokens: 100,
        })
    }
}

/// Answers at once, but only when its rate limiters allow a request.
pub struct ThrottledClassifier {
    limiters: RateLimiters,
}

impl ThrottledClassifier {
    pub fn new(limiters: RateLimiters) -> Self {
        Self { limiters }
    }
}

#[async_trait]
impl Classifier for ThrottledClassifier {
    async fn ready(&self) {
        self.limiters.acquire_one().await;
    }

    async fn classify(
        &self,
        _item: &Item,
        _prompt_path: &Path,
        _timeout: Duration,
    ) -> Result<Classification, ClassifierError> {
        Ok(Classification {
            decision: Decision {
                label: "routine".to_string(),
                notify: false,
                reason: None,
            },
            tokens: 10,
        })
    }
}

/// Records successful sends. IDs starting with `twiliofail` fail, `hang` never
/// answers.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn destination(&self) -> &str {
        "+15551111111"
    }

    async fn send(&self, item: &Item, _decision: &Decision) -> Result<SendReceipt, NotifierError> {
        if item.id.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if item.id.starts_with("twiliofail") {
            return Err(NotifierError::Api {
                status: 400,
                body: "invalid destination".to_string(),
            });
        }
        self.sent.lock().push(item.id.clone());
        Ok(SendReceipt {
            destination: self.destination().to_string(),
            provider_id: Some(format!("SM-{}", item.id)),
        })
    }
}
