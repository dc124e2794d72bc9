//! In-memory fake of the remote server
//!
//! Behaves like a small, cooperative server: items are listed newest first
//! with offset cursors, creation calls honor the client id unless server id
//! assignment is switched on, and unknown ids are accepted for field updates.
//! Switches simulate an unreachable network, rejected mutations and slow
//! searches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::api::{FetchItemsRequest, ItemsPage, RemoteHighlight, RemoteItem, RemoteLabel};
use super::{RemoteClient, RemoteError};
use crate::models::{Highlight, HighlightId, ItemId, LabelId};

#[derive(Default)]
struct ServerState {
    /// Default listing, newest first
    items: Vec<RemoteItem>,
    /// Listings returned for specific query strings
    query_results: HashMap<String, Vec<RemoteItem>>,
    /// Artificial latency per query string ("" for the default listing)
    fetch_delays: HashMap<String, Duration>,
    /// One-shot latency for the next call of an operation
    call_delays: HashMap<String, Duration>,
    labels: Vec<RemoteLabel>,
    highlights: HashMap<String, RemoteHighlight>,
    calls: Vec<String>,
}

/// Scriptable in-memory server implementing [`RemoteClient`]
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
    offline: AtomicBool,
    reject_mutations: AtomicBool,
    assign_server_ids: AtomicBool,
    next_id: AtomicU64,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a server whose default listing holds `items`
    pub fn with_items(items: Vec<RemoteItem>) -> Self {
        let remote = Self::new();
        remote.set_items(items);
        remote
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        // A panicking test thread must not hide the server state from others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_items(&self, items: Vec<RemoteItem>) {
        self.lock().items = items;
    }

    /// Answer `query` with `items` instead of the default listing
    pub fn set_query_results(&self, query: &str, items: Vec<RemoteItem>) {
        self.lock().query_results.insert(query.to_string(), items);
    }

    /// Delay responses for `query` (None for the default listing)
    pub fn set_fetch_delay(&self, query: Option<&str>, delay: Duration) {
        self.lock()
            .fetch_delays
            .insert(query.unwrap_or_default().to_string(), delay);
    }

    /// Delay the next `operation` call (e.g. "archive_item") by `delay`
    ///
    /// The call's effect lands on the server only after the delay.
    pub fn delay_next(&self, operation: &str, delay: Duration) {
        self.lock().call_delays.insert(operation.to_string(), delay);
    }

    async fn pause(&self, operation: &str) {
        let delay = self.lock().call_delays.remove(operation);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Fail every call with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject every mutating call
    pub fn set_reject_mutations(&self, reject: bool) {
        self.reject_mutations.store(reject, Ordering::SeqCst);
    }

    /// Answer creation calls with fresh server ids instead of the client id
    pub fn set_assign_server_ids(&self, assign: bool) {
        self.assign_server_ids.store(assign, Ordering::SeqCst);
    }

    pub fn insert_label(&self, label: RemoteLabel) {
        self.lock().labels.push(label);
    }

    pub fn insert_highlight(&self, highlight: RemoteHighlight) {
        self.lock()
            .highlights
            .insert(highlight.id.clone(), highlight);
    }

    /// Every call received so far, as "operation:argument"
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose record starts with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn has_item(&self, id: &str) -> bool {
        self.lock().items.iter().any(|i| i.id == id)
    }

    pub fn item(&self, id: &str) -> Option<RemoteItem> {
        self.lock().items.iter().find(|i| i.id == id).cloned()
    }

    pub fn label_names(&self) -> Vec<String> {
        self.lock().labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn has_highlight(&self, id: &str) -> bool {
        self.lock().highlights.contains_key(id)
    }

    /// Record a call and apply the failure switches
    fn admit(&self, call: String, mutating: bool) -> Result<(), RemoteError> {
        self.lock().calls.push(call);

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("network unreachable".to_string()));
        }
        if mutating && self.reject_mutations.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected {
                code: "BAD_REQUEST".to_string(),
                message: "mutation rejected".to_string(),
            });
        }
        Ok(())
    }

    fn assign_id(&self, client_id: &str, prefix: &str) -> String {
        if self.assign_server_ids.load(Ordering::SeqCst) {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-srv-{}", prefix, n)
        } else {
            client_id.to_string()
        }
    }

    fn to_remote_highlight(highlight: &Highlight, id: String) -> RemoteHighlight {
        RemoteHighlight {
            id,
            short_id: Some(highlight.short_id.clone()),
            item_id: Some(highlight.item_id.0.clone()),
            quote: Some(highlight.quote.clone()),
            patch: Some(highlight.patch.clone()),
            annotation: highlight.annotation.clone(),
            labels: None,
            created_at: Some(highlight.created_at),
            updated_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn fetch_items(&self, request: FetchItemsRequest) -> Result<ItemsPage, RemoteError> {
        let key = request.query.clone().unwrap_or_default();
        self.admit(format!("fetch_items:{}", key), false)?;

        let delay = self.lock().fetch_delays.get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let offset = match request.cursor.as_deref() {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| RemoteError::Rejected {
                code: "BAD_CURSOR".to_string(),
                message: format!("unknown cursor {:?}", cursor),
            })?,
            None => 0,
        };

        let state = self.lock();
        let listing = match request.query.as_deref() {
            Some(query) => state.query_results.get(query).unwrap_or(&state.items),
            None => &state.items,
        };

        let start = offset.min(listing.len());
        let end = (start + request.limit).min(listing.len());
        let next_cursor = (end < listing.len()).then(|| end.to_string());

        Ok(ItemsPage {
            items: listing[start..end].to_vec(),
            next_cursor,
        })
    }

    async fn save_item(&self, client_id: &ItemId, url: &str) -> Result<RemoteItem, RemoteError> {
        self.admit(format!("save_item:{}", client_id), true)?;

        let id = self.assign_id(client_id.as_str(), "item");
        let mut state = self.lock();
        if let Some(existing) = state.items.iter().find(|i| i.id == id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let item = RemoteItem {
            id,
            title: Some(url.to_string()),
            url: Some(url.to_string()),
            created_at: Some(now),
            saved_at: Some(now),
            ..Default::default()
        };
        state.items.insert(0, item.clone());
        Ok(item)
    }

    async fn archive_item(&self, id: &ItemId, archived: bool) -> Result<(), RemoteError> {
        self.admit(format!("archive_item:{}", id), true)?;
        self.pause("archive_item").await;
        if let Some(item) = self.lock().items.iter_mut().find(|i| i.id == id.as_str()) {
            item.is_archived = Some(archived);
        }
        Ok(())
    }

    async fn delete_item(&self, id: &ItemId) -> Result<(), RemoteError> {
        self.admit(format!("delete_item:{}", id), true)?;
        self.lock().items.retain(|i| i.id != id.as_str());
        Ok(())
    }

    async fn set_item_labels(
        &self,
        id: &ItemId,
        label_ids: &[LabelId],
    ) -> Result<Vec<RemoteLabel>, RemoteError> {
        self.admit(format!("set_item_labels:{}", id), true)?;
        self.pause("set_item_labels").await;

        let mut state = self.lock();
        let labels: Vec<RemoteLabel> = label_ids
            .iter()
            .filter_map(|lid| state.labels.iter().find(|l| l.id == lid.as_str()).cloned())
            .collect();
        if let Some(item) = state.items.iter_mut().find(|i| i.id == id.as_str()) {
            item.labels = Some(labels.clone());
        }
        Ok(labels)
    }

    async fn create_reminder(
        &self,
        id: &ItemId,
        _remind_at: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        self.admit(format!("create_reminder:{}", id), true)
    }

    async fn update_reading_progress(
        &self,
        id: &ItemId,
        percent: f64,
        anchor_index: i64,
    ) -> Result<(), RemoteError> {
        self.admit(format!("update_reading_progress:{}", id), true)?;
        if let Some(item) = self.lock().items.iter_mut().find(|i| i.id == id.as_str()) {
            item.reading_progress_percent = Some(percent);
            item.reading_progress_anchor_index = Some(anchor_index);
        }
        Ok(())
    }

    async fn create_label(
        &self,
        client_id: &LabelId,
        name: &str,
        color: &str,
        description: Option<&str>,
    ) -> Result<RemoteLabel, RemoteError> {
        self.admit(format!("create_label:{}", client_id), true)?;

        let id = self.assign_id(client_id.as_str(), "label");
        let mut state = self.lock();
        if let Some(existing) = state.labels.iter().find(|l| l.name == name) {
            if existing.id == id {
                return Ok(existing.clone());
            }
            return Err(RemoteError::Rejected {
                code: "LABEL_ALREADY_EXISTS".to_string(),
                message: format!("label {:?} already exists", name),
            });
        }

        let label = RemoteLabel {
            id,
            name: name.to_string(),
            color: Some(color.to_string()),
            description: description.map(str::to_string),
            created_at: Some(Utc::now()),
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn delete_label(&self, id: &LabelId) -> Result<(), RemoteError> {
        self.admit(format!("delete_label:{}", id), true)?;
        self.lock().labels.retain(|l| l.id != id.as_str());
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<RemoteLabel>, RemoteError> {
        self.admit("list_labels:".to_string(), false)?;
        Ok(self.lock().labels.clone())
    }

    async fn create_highlight(
        &self,
        highlight: &Highlight,
    ) -> Result<RemoteHighlight, RemoteError> {
        self.admit(format!("create_highlight:{}", highlight.id), true)?;

        let id = self.assign_id(highlight.id.as_str(), "highlight");
        let remote = Self::to_remote_highlight(highlight, id);
        self.lock()
            .highlights
            .insert(remote.id.clone(), remote.clone());
        Ok(remote)
    }

    async fn merge_highlight(
        &self,
        highlight: &Highlight,
        overlap_ids: &[HighlightId],
    ) -> Result<RemoteHighlight, RemoteError> {
        self.admit(format!("merge_highlight:{}", highlight.id), true)?;

        let id = self.assign_id(highlight.id.as_str(), "highlight");
        let remote = Self::to_remote_highlight(highlight, id);
        let mut state = self.lock();
        for overlap in overlap_ids {
            state.highlights.remove(overlap.as_str());
        }
        state.highlights.insert(remote.id.clone(), remote.clone());
        Ok(remote)
    }

    async fn update_highlight(
        &self,
        id: &HighlightId,
        annotation: Option<&str>,
    ) -> Result<RemoteHighlight, RemoteError> {
        self.admit(format!("update_highlight:{}", id), true)?;

        let mut state = self.lock();
        let highlight = state
            .highlights
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::Rejected {
                code: "NOT_FOUND".to_string(),
                message: format!("highlight {} not found", id),
            })?;
        highlight.annotation = annotation.map(str::to_string);
        highlight.updated_at = Some(Utc::now());
        Ok(highlight.clone())
    }

    async fn delete_highlight(&self, id: &HighlightId) -> Result<(), RemoteError> {
        self.admit(format!("delete_highlight:{}", id), true)?;
        self.lock().highlights.remove(id.as_str());
        Ok(())
    }
}
