//! Sync status tracking and the offline flush
//!
//! Rows carry a [`SyncStatus`]; this module turns pending statuses into
//! server calls and folds the server's answers back into the store.
//!
//! Flush order matters:
//! 1. Item deletions
//! 2. Label deletions
//! 3. Label creations (items may reference them)
//! 4. Item creations, followed by their pending labels and fields
//! 5. Local-only highlights (their items now exist on the server)

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::labels::{merge_remote_label, rekey_label};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, LibraryEvent};
use crate::models::{Highlight, HighlightId, Item, ItemId, Label, LabelId, SyncStatus};
use crate::remote::api::{RemoteHighlight, RemoteItem, RemoteLabel};
use crate::remote::{RemoteClient, RemoteError, normalize_highlight, normalize_item, normalize_label, with_timeout};
use crate::storage::{EntityStore, EntityStoreExt};

/// Statistics from a flush
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushStats {
    pub items_deleted: usize,
    pub labels_deleted: usize,
    pub labels_created: usize,
    pub items_created: usize,
    pub highlights_created: usize,
    /// Remote calls that failed; their rows stay pending
    pub failures: usize,
    pub duration_ms: u64,
}

/// Rows still waiting for the server
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingCounts {
    pub items_to_delete: usize,
    pub items_to_create: usize,
    pub labels_to_delete: usize,
    pub labels_to_create: usize,
    pub highlights_to_create: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct IdAliases {
    items: HashMap<ItemId, ItemId>,
    labels: HashMap<LabelId, LabelId>,
}

/// Owns pending-status bookkeeping shared by the mutation queue, the
/// paginator and the highlight merger
///
/// Besides the per-row statuses in the store, the tracker keeps two pieces
/// of process-lifetime state: tombstones (items deleted in this session,
/// which page merges must never re-insert) and aliases from client ids to
/// the server ids they were adopted under.
pub struct SyncTracker {
    store: Arc<dyn EntityStore>,
    remote: Arc<dyn RemoteClient>,
    events: EventBus,
    timeout: Duration,
    tombstones: Mutex<HashSet<ItemId>>,
    aliases: Mutex<IdAliases>,
    flush_lock: tokio::sync::Mutex<()>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncTracker {
    pub fn new(
        store: Arc<dyn EntityStore>,
        remote: Arc<dyn RemoteClient>,
        events: EventBus,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            events,
            timeout,
            tombstones: Mutex::new(HashSet::new()),
            aliases: Mutex::new(IdAliases::default()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a remote call under the configured timeout
    pub(crate) async fn call<T, F>(&self, operation: &str, call: F) -> SyncResult<T>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        with_timeout(self.timeout, operation, call)
            .await
            .map_err(SyncError::from)
    }

    /// Record that `id` was deleted in this session
    pub fn tombstone(&self, id: &ItemId) {
        relock(&self.tombstones).insert(id.clone());
    }

    pub fn is_tombstoned(&self, id: &ItemId) -> bool {
        relock(&self.tombstones).contains(id)
    }

    /// Snapshot of the tombstone set for a page merge
    pub fn tombstones(&self) -> HashSet<ItemId> {
        relock(&self.tombstones).clone()
    }

    /// Current id for an item that may have been adopted under a server id
    pub fn resolve_item(&self, id: &ItemId) -> ItemId {
        relock(&self.aliases)
            .items
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.clone())
    }

    /// Current id for a label that may have been adopted under a server id
    pub fn resolve_label(&self, id: &LabelId) -> LabelId {
        relock(&self.aliases)
            .labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.clone())
    }

    /// Count rows with pending statuses
    pub fn pending(&self) -> SyncResult<PendingCounts> {
        let counts = self.store.read(|r| {
            Ok(PendingCounts {
                items_to_delete: r.items_with_status(SyncStatus::NeedsDeletion)?.len(),
                items_to_create: r.items_with_status(SyncStatus::NeedsCreation)?.len(),
                labels_to_delete: r.labels_with_status(SyncStatus::NeedsDeletion)?.len(),
                labels_to_create: r.labels_with_status(SyncStatus::NeedsCreation)?.len(),
                highlights_to_create: r.highlights_with_status(SyncStatus::NeedsCreation)?.len(),
            })
        })?;
        Ok(counts)
    }

    /// Physically remove an item once the server confirmed its deletion
    pub fn finish_item_deletion(&self, id: &ItemId) -> SyncResult<bool> {
        let removed = self.store.write(|w| match w.get_item(id)? {
            Some(item) if item.sync_status == SyncStatus::NeedsDeletion => w.delete_item(id),
            _ => Ok(false),
        })?;
        if removed {
            debug!("Item {} deletion confirmed", id);
        }
        Ok(removed)
    }

    /// Physically remove a label once the server confirmed its deletion
    pub fn finish_label_deletion(&self, id: &LabelId) -> SyncResult<bool> {
        let removed = self.store.write(|w| match w.get_label(id)? {
            Some(label) if label.sync_status == SyncStatus::NeedsDeletion => w.delete_label(id),
            _ => Ok(false),
        })?;
        if removed {
            debug!("Label {} deletion confirmed", id);
        }
        Ok(removed)
    }

    /// Send an item deletion; the row stays pending if the call fails
    pub async fn delete_remote_item(&self, id: &ItemId) -> SyncResult<()> {
        self.call("delete_item", self.remote.delete_item(id)).await?;
        self.finish_item_deletion(id)?;
        Ok(())
    }

    /// Send a label deletion; the row stays pending if the call fails
    pub async fn delete_remote_label(&self, id: &LabelId) -> SyncResult<()> {
        self.call("delete_label", self.remote.delete_label(id)).await?;
        self.finish_label_deletion(id)?;
        Ok(())
    }

    /// Fold a server-confirmed item creation back into the store
    ///
    /// The local row becomes clean under the server's id; local intents
    /// applied while the creation was in flight are kept. Returns None when
    /// the item was deleted locally in the meantime, in which case the
    /// server copy is deleted too.
    pub async fn adopt_item(&self, local_id: &ItemId, remote: RemoteItem) -> SyncResult<Option<Item>> {
        let normalized = normalize_item(remote)?;
        let server_id = normalized.item.id.clone();
        let server_copy = normalized.item.clone();

        let adopted = self.store.write(|w| {
            let Some(local) = w.get_item(local_id)? else {
                return Ok(None);
            };

            let mut item = normalized.item;
            item.saved_at = local.saved_at;
            item.archived = local.archived;
            item.reading_progress = local.reading_progress;
            item.reading_progress_anchor = local.reading_progress_anchor;
            item.snoozed_until = local.snoozed_until;
            item.set_labels(local.label_ids);
            item.sync_status = SyncStatus::Clean;

            for label in normalized.labels {
                merge_remote_label(w, label)?;
            }

            if server_id != *local_id {
                w.delete_item(local_id)?;
                for mut highlight in w.highlights_for_item(local_id)? {
                    highlight.item_id = server_id.clone();
                    w.upsert_highlight(highlight)?;
                }
            }
            w.upsert_item(item.clone())?;
            Ok(Some(item))
        })?;

        match adopted {
            Some(item) => {
                if server_id != *local_id {
                    relock(&self.aliases)
                        .items
                        .insert(local_id.clone(), server_id.clone());
                }
                info!("Item {} confirmed as {}", local_id, server_id);
                self.events.publish(LibraryEvent::ItemAdopted {
                    local_id: local_id.clone(),
                    item: item.clone(),
                });
                Ok(Some(item))
            }
            None if self.is_tombstoned(local_id) => {
                info!(
                    "Item {} was deleted while being saved; deleting server copy {}",
                    local_id, server_id
                );
                self.tombstone(&server_id);
                let mut pending = server_copy;
                pending.sync_status = SyncStatus::NeedsDeletion;
                self.store.write(|w| w.upsert_item(pending))?;
                if let Err(e) = self.delete_remote_item(&server_id).await {
                    warn!("Failed to delete server copy {}: {}", server_id, e);
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Fold a server-confirmed label creation back into the store
    ///
    /// A changed id is adopted in one transaction that also rewrites every
    /// item reference.
    pub async fn adopt_label(&self, local_id: &LabelId, remote: RemoteLabel) -> SyncResult<Option<Label>> {
        let mut label = normalize_label(remote)?;
        let server_id = label.id.clone();

        let adopted = self.store.write(|w| {
            let Some(local) = w.get_label(local_id)? else {
                return Ok(None);
            };
            if label.description.is_none() {
                label.description = local.description;
            }
            label.sync_status = SyncStatus::Clean;

            if server_id != *local_id {
                rekey_label(w, local_id, label.clone())?;
            } else {
                w.upsert_label(label.clone())?;
            }
            Ok(Some(label))
        })?;

        if let Some(label) = adopted {
            if server_id != *local_id {
                relock(&self.aliases)
                    .labels
                    .insert(local_id.clone(), server_id.clone());
            }
            info!("Label {} confirmed as {}", local_id, server_id);
            self.events.publish(LibraryEvent::LabelAdopted {
                local_id: local_id.clone(),
                label: label.clone(),
            });
            return Ok(Some(label));
        }

        // Already merged in under the server id by a page or label refresh
        if let Some(existing) = self.store.read(|r| r.get_label(&server_id))? {
            return Ok(Some(existing));
        }
        Ok(None)
    }

    /// Fold a server-confirmed highlight creation back into the store
    ///
    /// Returns None when the highlight was deleted locally in the meantime.
    pub fn adopt_highlight(
        &self,
        local_id: &HighlightId,
        remote: RemoteHighlight,
    ) -> SyncResult<Option<Highlight>> {
        let Some(local) = self.store.read(|r| r.get_highlight(local_id))? else {
            return Ok(None);
        };
        let mut highlight = normalize_highlight(remote, &local.item_id)?;
        if highlight.annotation.is_none() {
            highlight.annotation = local.annotation;
        }
        if highlight.label_ids.is_empty() {
            highlight.label_ids = local.label_ids;
        }

        let adopted = self.store.write(|w| {
            if w.get_highlight(local_id)?.is_none() {
                return Ok(None);
            }
            if highlight.id != *local_id {
                w.delete_highlight(local_id)?;
            }
            w.upsert_highlight(highlight.clone())?;
            Ok(Some(highlight))
        })?;
        Ok(adopted)
    }

    /// Push every pending row to the server
    ///
    /// Remote failures are counted, logged and left pending for the next
    /// flush. Only a local store failure aborts the flush. Concurrent flushes
    /// run one after the other.
    pub async fn flush(&self) -> SyncResult<FlushStats> {
        let _flushing = self.flush_lock.lock().await;
        let start = Instant::now();
        let mut stats = FlushStats::default();

        let (items_to_delete, labels_to_delete, labels_to_create, items_to_create) =
            self.store.read(|r| {
                Ok((
                    r.items_with_status(SyncStatus::NeedsDeletion)?,
                    r.labels_with_status(SyncStatus::NeedsDeletion)?,
                    r.labels_with_status(SyncStatus::NeedsCreation)?,
                    r.items_with_status(SyncStatus::NeedsCreation)?,
                ))
            })?;

        for item in items_to_delete {
            match self.delete_remote_item(&item.id).await {
                Ok(()) => stats.items_deleted += 1,
                Err(e) => self.count_failure(&mut stats, "delete item", item.id.as_str(), e)?,
            }
        }

        for label in labels_to_delete {
            match self.delete_remote_label(&label.id).await {
                Ok(()) => stats.labels_deleted += 1,
                Err(e) => self.count_failure(&mut stats, "delete label", label.id.as_str(), e)?,
            }
        }

        for label in labels_to_create {
            let created = self
                .call(
                    "create_label",
                    self.remote.create_label(
                        &label.id,
                        &label.name,
                        &label.color,
                        label.description.as_deref(),
                    ),
                )
                .await;
            match created {
                Ok(remote) => match self.adopt_label(&label.id, remote).await {
                    Ok(_) => stats.labels_created += 1,
                    Err(e) => self.count_failure(&mut stats, "adopt label", label.id.as_str(), e)?,
                },
                Err(e) => self.count_failure(&mut stats, "create label", label.id.as_str(), e)?,
            }
        }

        for item in items_to_create {
            let saved = self
                .call("save_item", self.remote.save_item(&item.id, &item.url))
                .await;
            let adopted = match saved {
                Ok(remote) => self.adopt_item(&item.id, remote).await,
                Err(e) => Err(e),
            };
            match adopted {
                Ok(Some(adopted)) => {
                    stats.items_created += 1;
                    if let Err(e) = self.push_item_fields(&adopted).await {
                        self.count_failure(&mut stats, "update item", adopted.id.as_str(), e)?;
                    }
                }
                Ok(None) => {}
                Err(e) => self.count_failure(&mut stats, "save item", item.id.as_str(), e)?,
            }
        }

        // Read after item creation so adopted item ids are visible
        let highlights_to_create = self
            .store
            .read(|r| r.highlights_with_status(SyncStatus::NeedsCreation))?;
        for highlight in highlights_to_create {
            let created = self
                .call("create_highlight", self.remote.create_highlight(&highlight))
                .await;
            match created {
                Ok(remote) => {
                    self.adopt_highlight(&highlight.id, remote)?;
                    stats.highlights_created += 1;
                }
                Err(e) => {
                    self.count_failure(&mut stats, "create highlight", highlight.id.as_str(), e)?
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        if stats != FlushStats::default() {
            info!(
                "Flush complete: {} deleted, {} created, {} labels created, {} labels deleted, {} highlights, {} failures in {}ms",
                stats.items_deleted,
                stats.items_created,
                stats.labels_created,
                stats.labels_deleted,
                stats.highlights_created,
                stats.failures,
                stats.duration_ms
            );
        }
        Ok(stats)
    }

    /// Send field changes made while an item's creation was pending
    pub(crate) async fn push_item_fields(&self, item: &Item) -> SyncResult<()> {
        if !item.label_ids.is_empty() {
            self.call(
                "set_item_labels",
                self.remote.set_item_labels(&item.id, &item.label_ids),
            )
            .await?;
        }
        if item.archived {
            self.call("archive_item", self.remote.archive_item(&item.id, true))
                .await?;
        }
        if item.reading_progress > 0.0 {
            self.call(
                "update_reading_progress",
                self.remote.update_reading_progress(
                    &item.id,
                    item.reading_progress,
                    item.reading_progress_anchor,
                ),
            )
            .await?;
        }
        if let Some(until) = item.snoozed_until {
            self.call("create_reminder", self.remote.create_reminder(&item.id, until))
                .await?;
        }
        Ok(())
    }

    fn count_failure(
        &self,
        stats: &mut FlushStats,
        operation: &str,
        id: &str,
        err: SyncError,
    ) -> SyncResult<()> {
        if let SyncError::LocalStore(_) = err {
            return Err(err);
        }
        warn!("Flush: failed to {} {}: {}", operation, id, err);
        stats.failures += 1;
        Ok(())
    }
}
