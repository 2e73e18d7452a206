use std::sync::Arc;

use crate::{
    email::ItemSource,
    ledger::OutcomeLedger,
    notify::Notifier,
    observability::{status::LiveQueue, StatusSnapshot},
    prompt::Classifier,
    server_config::ServerConfig,
    util::now_ms,
};

use super::triage_pipeline::AdmissionQueue;

/// Everything the pipeline components share. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub ledger: Arc<OutcomeLedger>,
    pub queue: Arc<AdmissionQueue>,
    pub source: Arc<dyn ItemSource>,
    pub classifier: Arc<dyn Classifier>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppContext {
    pub fn new(
        config: ServerConfig,
        ledger: Arc<OutcomeLedger>,
        source: Arc<dyn ItemSource>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let queue = Arc::new(AdmissionQueue::new(config.queue.capacity, ledger.clone()));
        Self {
            config: Arc::new(config),
            ledger,
            queue,
            source,
            classifier,
            notifier,
        }
    }

    pub fn snapshot(&self, cycle_running: bool) -> StatusSnapshot {
        StatusSnapshot::build(
            &self.ledger,
            &self.config.health,
            self.config.settings.dry_run,
            LiveQueue {
                depth: self.queue.depth(),
                in_flight: self.queue.in_flight(),
                cycle_running,
            },
            now_ms(),
        )
    }
}
