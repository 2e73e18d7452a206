//! Item Source
//!
//! The ingestion seam: lists candidate item IDs and fetches full items by ID.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::simplified_message::SimplifiedMessage;

/// Reference returned by a listing; only the ID is needed to fetch the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
}

/// A unit of work handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    /// Milliseconds since epoch when the source produced the item.
    pub received_at: i64,
    pub message: SimplifiedMessage,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Item {0} not found")]
    NotFound(String),
    #[error("Could not parse item {0}")]
    Parse(String),
    #[error("Source I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Lists up to `max_results` item refs in arrival order (oldest first).
    async fn list_new_items(
        &self,
        max_results: usize,
        filter_query: Option<&str>,
    ) -> Result<Vec<ItemRef>, SourceError>;

    /// Fetches one item. Fetching the same ID twice yields the same item.
    async fn fetch_full(&self, id: &str) -> Result<Item, SourceError>;
}
