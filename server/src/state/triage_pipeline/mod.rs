//! Triage Pipeline
//!
//! Moves inbound email from the item source to a classification outcome.
//!
//! ## Components
//!
//! - **Admission Queue**: bounded FIFO that drops the oldest queued item when full
//! - **Worker Pool**: fixed number of workers calling the classifier, then the notifier
//! - **Orchestrator**: single-flight poll cycle that feeds the queue and waits for it to drain
//! - **Flusher**: periodic persistence of the outcome ledger
//!
//! ## Usage
//!
//! ```rust,ignore
//! let shutdown = CancellationToken::new();
//! let pool = WorkerPool::spawn(ctx.clone(), shutdown.clone());
//! let orchestrator = PollOrchestrator::new(ctx.clone(), shutdown.clone());
//! orchestrator.trigger().await;
//! ```

mod flusher;
mod orchestrator;
pub mod queues;
pub mod types;
mod worker_pool;

pub use flusher::run_flush_loop;
pub use orchestrator::PollOrchestrator;
pub use queues::AdmissionQueue;
pub use types::CycleReport;
pub use worker_pool::WorkerPool;
