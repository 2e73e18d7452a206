//! Observability Module
//!
//! Turns ledger history into the numbers operators look at:
//! - Per-dependency health
//! - Classifier throughput
//! - The status snapshot served over HTTP and logged after every cycle

pub mod common;
pub mod health;
pub mod status;
pub mod throughput;

pub use health::{Dependency, DependencyActivity, DependencyHealth};
pub use status::StatusSnapshot;
pub use throughput::Throughput;
