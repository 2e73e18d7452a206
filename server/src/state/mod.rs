pub mod context;
pub mod triage_pipeline;

pub use context::AppContext;
