//! Remote API client seam

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::api::{FetchItemsRequest, ItemsPage, RemoteHighlight, RemoteItem, RemoteLabel};
use crate::models::{Highlight, HighlightId, ItemId, LabelId};

/// Failure reported by a remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network unreachable, timed out or the response was unreadable
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server understood the request and refused it
    #[error("server rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// Typed client for the server of record
///
/// Creation calls carry the client-generated id so the server can
/// deduplicate retries; the server may still answer with its own id.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one page of items
    async fn fetch_items(&self, request: FetchItemsRequest) -> Result<ItemsPage, RemoteError>;

    /// Save a url as a new item
    async fn save_item(&self, client_id: &ItemId, url: &str) -> Result<RemoteItem, RemoteError>;

    async fn archive_item(&self, id: &ItemId, archived: bool) -> Result<(), RemoteError>;

    async fn delete_item(&self, id: &ItemId) -> Result<(), RemoteError>;

    /// Replace an item's label set; returns the labels the server now holds
    async fn set_item_labels(
        &self,
        id: &ItemId,
        label_ids: &[LabelId],
    ) -> Result<Vec<RemoteLabel>, RemoteError>;

    /// Snooze an item until `remind_at`
    async fn create_reminder(
        &self,
        id: &ItemId,
        remind_at: DateTime<Utc>,
    ) -> Result<(), RemoteError>;

    async fn update_reading_progress(
        &self,
        id: &ItemId,
        percent: f64,
        anchor_index: i64,
    ) -> Result<(), RemoteError>;

    async fn create_label(
        &self,
        client_id: &LabelId,
        name: &str,
        color: &str,
        description: Option<&str>,
    ) -> Result<RemoteLabel, RemoteError>;

    async fn delete_label(&self, id: &LabelId) -> Result<(), RemoteError>;

    async fn list_labels(&self) -> Result<Vec<RemoteLabel>, RemoteError>;

    async fn create_highlight(&self, highlight: &Highlight)
    -> Result<RemoteHighlight, RemoteError>;

    /// Create `highlight` and fold every highlight in `overlap_ids` into it
    async fn merge_highlight(
        &self,
        highlight: &Highlight,
        overlap_ids: &[HighlightId],
    ) -> Result<RemoteHighlight, RemoteError>;

    async fn update_highlight(
        &self,
        id: &HighlightId,
        annotation: Option<&str>,
    ) -> Result<RemoteHighlight, RemoteError>;

    async fn delete_highlight(&self, id: &HighlightId) -> Result<(), RemoteError>;
}

/// Bound a remote call by `limit`; an elapsed timer is a transport failure
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Transport(format!(
            "{} timed out after {:?}",
            operation, limit
        ))),
    }
}
