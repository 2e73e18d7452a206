//! Maildir-style Item Source
//!
//! Treats every `*.eml` file in a directory as one inbound email. The file stem is
//! the item ID and the file modification time is its arrival time.

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;

use crate::util::now_ms;

use super::{Item, ItemRef, ItemSource, SimplifiedMessage, SourceError};

const MESSAGE_EXTENSION: &str = "eml";

#[derive(Debug, Clone)]
pub struct MaildirSource {
    root: PathBuf,
}

impl MaildirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn message_path(&self, id: &str) -> Option<PathBuf> {
        // IDs come from file stems, so anything path-like is foreign input
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return None;
        }
        Some(self.root.join(format!("{id}.{MESSAGE_EXTENSION}")))
    }
}

#[async_trait]
impl ItemSource for MaildirSource {
    async fn list_new_items(
        &self,
        max_results: usize,
        filter_query: Option<&str>,
    ) -> Result<Vec<ItemRef>, SourceError> {
        let filter = filter_query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        let mut found: Vec<(SystemTime, String)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(filter) = &filter {
                if !id.to_lowercase().contains(filter.as_str()) {
                    continue;
                }
            }

            let modified = entry
                .metadata()
                .await?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, id.to_string()));
        }

        // Keep the most recent `max_results`, then hand them out oldest first
        found.sort_by(|a, b| b.cmp(a));
        found.truncate(max_results);
        found.reverse();

        tracing::debug!(
            "Listed {} messages from {}",
            found.len(),
            self.root.display()
        );

        Ok(found.into_iter().map(|(_, id)| ItemRef { id }).collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<Item, SourceError> {
        let path = self
            .message_path(id)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;

        let raw = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(id.to_string()),
            _ => SourceError::Io(e),
        })?;

        let message =
            SimplifiedMessage::from_raw(&raw).ok_or_else(|| SourceError::Parse(id.to_string()))?;

        Ok(Item {
            id: id.to_string(),
            received_at: now_ms(),
            message,
        })
    }
}
