//! Highlight lifecycle and overlap merging
//!
//! A highlight starts local-only (`NeedsCreation`), becomes synced once the
//! server confirms it, and is either deleted outright or merged away when a
//! later highlight overlaps it. Deletion has no pending state.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use super::status::SyncTracker;
use crate::error::{SyncError, SyncResult};
use crate::events::NoticeKind;
use crate::models::{Highlight, HighlightId, SyncStatus};
use crate::remote::normalize_highlight;
use crate::storage::{EntityStoreExt, StoreWriter};

/// Apply a server merge result in one transaction
///
/// Deletes every superseded row, stores `merged` as the canonical row and
/// keeps annotation text: the merged annotation if present, otherwise the
/// first non-empty one among the existing merged row, the new highlight and
/// the superseded rows. Applying the same result twice changes nothing.
pub fn apply_merge(
    writer: &mut dyn StoreWriter,
    mut merged: Highlight,
    new_highlight: &Highlight,
    overlapping: &[HighlightId],
) -> anyhow::Result<Highlight> {
    let existing = writer.get_highlight(&merged.id)?;
    let mut annotation = merged
        .annotation_text()
        .or_else(|| existing.as_ref().and_then(|h| h.annotation_text()))
        .or_else(|| new_highlight.annotation_text())
        .map(str::to_string);

    for id in overlapping {
        if *id == merged.id {
            continue;
        }
        if let Some(superseded) = writer.get_highlight(id)? {
            if annotation.is_none() {
                annotation = superseded.annotation_text().map(str::to_string);
            }
            writer.delete_highlight(id)?;
        }
    }
    if new_highlight.id != merged.id {
        writer.delete_highlight(&new_highlight.id)?;
    }

    merged.annotation = annotation;
    merged.sync_status = SyncStatus::Clean;
    writer.upsert_highlight(merged.clone())?;
    Ok(merged)
}

/// Creates, merges, annotates and deletes highlights
pub struct HighlightMerger {
    tracker: Arc<SyncTracker>,
}

impl HighlightMerger {
    pub fn new(tracker: Arc<SyncTracker>) -> Self {
        Self { tracker }
    }

    fn fail<T>(&self, message: &str, id: &HighlightId, err: SyncError) -> SyncResult<T> {
        warn!("{} ({}): {}", message, id, err);
        self.tracker.events().notify(message, NoticeKind::Failure);
        Err(err)
    }

    /// Store a new highlight locally, then create it on the server
    ///
    /// If the server call fails the local-only row stays and the next flush
    /// retries it.
    pub async fn create(&self, highlight: Highlight) -> SyncResult<Highlight> {
        let mut local = highlight;
        local.sync_status = SyncStatus::NeedsCreation;

        let item_visible = self.tracker.store().write(|w| {
            let visible = w
                .get_item(&local.item_id)?
                .is_some_and(|item| item.sync_status.is_visible());
            if visible {
                w.upsert_highlight(local.clone())?;
            }
            Ok(visible)
        })?;
        if !item_visible {
            return Err(SyncError::not_found("item", local.item_id.as_str()));
        }

        let created = self
            .tracker
            .call("create_highlight", self.tracker.remote().create_highlight(&local))
            .await;
        let remote = match created {
            Ok(remote) => remote,
            Err(e) => return self.fail("Failed to create highlight", &local.id, e),
        };

        match self.tracker.adopt_highlight(&local.id, remote)? {
            Some(synced) => {
                debug!("Highlight {} synced as {}", local.id, synced.id);
                Ok(synced)
            }
            None => Err(SyncError::not_found("highlight", local.id.as_str())),
        }
    }

    /// Create `highlight` on the server, folding `overlapping` into it
    ///
    /// Returns the merged highlight, which replaces every overlapping row.
    pub async fn merge(&self, highlight: Highlight, overlapping: &[HighlightId]) -> SyncResult<Highlight> {
        let merged = self
            .tracker
            .call(
                "merge_highlight",
                self.tracker.remote().merge_highlight(&highlight, overlapping),
            )
            .await;
        let remote = match merged {
            Ok(remote) => remote,
            Err(e) => return self.fail("Failed to merge highlights", &highlight.id, e),
        };

        let merged = normalize_highlight(remote, &highlight.item_id)?;
        let merged = self
            .tracker
            .store()
            .write(|w| apply_merge(w, merged, &highlight, overlapping))?;

        info!(
            "Merged {} highlights into {} on item {}",
            overlapping.len(),
            merged.id,
            merged.item_id
        );
        Ok(merged)
    }

    /// Change a highlight's annotation; blank text clears it
    ///
    /// The local change stands even if the server call fails.
    pub async fn update_annotation(&self, id: &HighlightId, text: Option<String>) -> SyncResult<Highlight> {
        let annotation = text.filter(|t| !t.trim().is_empty());

        let updated = self.tracker.store().write(|w| {
            let Some(mut highlight) = w.get_highlight(id)? else {
                return Ok(None);
            };
            highlight.annotation = annotation.clone();
            highlight.updated_at = Utc::now();
            w.upsert_highlight(highlight.clone())?;
            Ok(Some(highlight))
        })?;
        let Some(updated) = updated else {
            return Err(SyncError::not_found("highlight", id.as_str()));
        };

        if updated.sync_status == SyncStatus::NeedsCreation {
            // Sent with the annotation when the flush creates it
            return Ok(updated);
        }

        let result = self
            .tracker
            .call(
                "update_highlight",
                self.tracker
                    .remote()
                    .update_highlight(id, annotation.as_deref()),
            )
            .await;
        match result {
            Ok(_) => Ok(updated),
            Err(e) => self.fail("Failed to update highlight", id, e),
        }
    }

    /// Remove a highlight locally and on the server
    pub async fn delete(&self, id: &HighlightId) -> SyncResult<()> {
        let removed = self.tracker.store().write(|w| {
            let Some(highlight) = w.get_highlight(id)? else {
                return Ok(None);
            };
            w.delete_highlight(id)?;
            Ok(Some(highlight))
        })?;
        let Some(removed) = removed else {
            return Err(SyncError::not_found("highlight", id.as_str()));
        };

        if removed.sync_status == SyncStatus::NeedsCreation {
            return Ok(());
        }

        match self
            .tracker
            .call("delete_highlight", self.tracker.remote().delete_highlight(id))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.fail("Failed to delete highlight", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::events::EventBus;
    use crate::models::{Item, ItemId};
    use crate::remote::InMemoryRemote;
    use crate::remote::api::RemoteHighlight;
    use crate::storage::InMemoryEntityStore;

    fn setup() -> (Arc<InMemoryEntityStore>, Arc<InMemoryRemote>, HighlightMerger) {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .write(|w| w.upsert_item(Item::builder(ItemId::new("i1"), "https://example.com").build()))
            .unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        let tracker = Arc::new(SyncTracker::new(
            store.clone(),
            remote.clone(),
            EventBus::new(16),
            Duration::from_secs(5),
        ));
        (store, remote, HighlightMerger::new(tracker))
    }

    fn synced(id: &str, annotation: Option<&str>) -> Highlight {
        let mut h = Highlight::new(id, id, "i1", format!("quote {}", id), "patch");
        h.annotation = annotation.map(str::to_string);
        h.sync_status = SyncStatus::Clean;
        h
    }

    #[test]
    fn test_apply_merge_is_idempotent() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| {
                w.upsert_highlight(synced("h1", Some("first note")))?;
                w.upsert_highlight(synced("h2", None))
            })
            .unwrap();

        let new_highlight = Highlight::new("h3", "h3", "i1", "quote", "patch");
        let merged = synced("h4", None);
        let overlap = [HighlightId::new("h1"), HighlightId::new("h2")];

        let first = store
            .write(|w| apply_merge(w, merged.clone(), &new_highlight, &overlap))
            .unwrap();
        let after_first = store.read(|r| r.highlights_for_item(&ItemId::new("i1"))).unwrap();

        let second = store
            .write(|w| apply_merge(w, merged.clone(), &new_highlight, &overlap))
            .unwrap();
        let after_second = store.read(|r| r.highlights_for_item(&ItemId::new("i1"))).unwrap();

        assert_eq!(first, second);
        assert_eq!(after_first, after_second);
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id.as_str(), "h4");
        assert_eq!(after_first[0].annotation.as_deref(), Some("first note"));
    }

    #[test]
    fn test_merged_annotation_wins() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| w.upsert_highlight(synced("h1", Some("old"))))
            .unwrap();

        let new_highlight = Highlight::new("h2", "h2", "i1", "q", "p").with_annotation("mine");
        let merged = store
            .write(|w| {
                apply_merge(
                    w,
                    synced("h3", Some("server")),
                    &new_highlight,
                    &[HighlightId::new("h1")],
                )
            })
            .unwrap();
        assert_eq!(merged.annotation.as_deref(), Some("server"));

        let merged = store
            .write(|w| apply_merge(w, synced("h5", Some("  ")), &new_highlight, &[HighlightId::new("h3")]))
            .unwrap();
        assert_eq!(merged.annotation.as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_create_then_merge_replaces_overlaps() {
        let (store, remote, merger) = setup();

        let h1 = merger.create(Highlight::new("h1", "s1", "i1", "a", "pa")).await.unwrap();
        let h2 = merger
            .create(Highlight::new("h2", "s2", "i1", "b", "pb").with_annotation("note"))
            .await
            .unwrap();
        assert!(h1.is_synced() && h2.is_synced());

        let h3 = Highlight::new("h3", "s3", "i1", "a b", "pab");
        let merged = merger
            .merge(h3, &[h1.id.clone(), h2.id.clone()])
            .await
            .unwrap();

        let rows = store.read(|r| r.highlights_for_item(&ItemId::new("i1"))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, merged.id);
        assert_eq!(rows[0].annotation.as_deref(), Some("note"));
        assert!(!remote.has_highlight("h1"));
        assert!(!remote.has_highlight("h2"));
    }

    #[tokio::test]
    async fn test_create_offline_keeps_local_row() {
        let (store, remote, merger) = setup();
        remote.set_offline(true);

        let result = merger.create(Highlight::new("h1", "s1", "i1", "a", "pa")).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));

        let row = store
            .read(|r| r.get_highlight(&HighlightId::new("h1")))
            .unwrap()
            .unwrap();
        assert_eq!(row.sync_status, SyncStatus::NeedsCreation);
    }

    #[tokio::test]
    async fn test_create_on_unknown_item_fails() {
        let (_store, remote, merger) = setup();
        let result = merger.create(Highlight::new("h1", "s1", "nope", "a", "pa")).await;
        assert!(matches!(result, Err(SyncError::NotFound { entity: "item", .. })));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_annotation_survives_remote_failure() {
        let (store, remote, merger) = setup();
        remote.insert_highlight(RemoteHighlight {
            id: "h1".to_string(),
            ..Default::default()
        });
        store.write(|w| w.upsert_highlight(synced("h1", None))).unwrap();
        remote.set_offline(true);

        let result = merger
            .update_annotation(&HighlightId::new("h1"), Some("remember".to_string()))
            .await;
        assert!(result.is_err());

        let row = store
            .read(|r| r.get_highlight(&HighlightId::new("h1")))
            .unwrap()
            .unwrap();
        assert_eq!(row.annotation.as_deref(), Some("remember"));
    }

    #[tokio::test]
    async fn test_delete_local_only_highlight_skips_server() {
        let (store, remote, merger) = setup();
        store
            .write(|w| w.upsert_highlight(Highlight::new("h1", "s1", "i1", "a", "pa")))
            .unwrap();

        merger.delete(&HighlightId::new("h1")).await.unwrap();
        assert!(store.read(|r| r.get_highlight(&HighlightId::new("h1"))).unwrap().is_none());
        assert_eq!(remote.call_count("delete_highlight"), 0);

        let missing = merger.delete(&HighlightId::new("h1")).await;
        assert!(matches!(missing, Err(SyncError::NotFound { .. })));
    }
}
