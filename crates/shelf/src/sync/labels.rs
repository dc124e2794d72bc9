//! Label reconciliation
//!
//! Label names are unique per store, so a label arriving from the server is
//! matched by name before id. When a local label and a server label share a
//! name, the server's id wins and item references are rewritten.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use crate::error::SyncResult;
use crate::models::{Label, LabelId, SyncStatus};
use crate::remote::{RemoteClient, normalize_label, with_timeout};
use crate::storage::{EntityStore, EntityStoreExt, StoreWriter};

/// Replace label `old_id` with `label`, rewriting item references in place
pub(crate) fn rekey_label(writer: &mut dyn StoreWriter, old_id: &LabelId, label: Label) -> Result<()> {
    // Collect before deleting: delete_label strips the references
    let referencing = writer.items_with_label(old_id)?;
    writer.delete_label(old_id)?;
    let new_id = label.id.clone();
    writer.upsert_label(label)?;

    for mut item in referencing {
        let label_ids = item
            .label_ids
            .iter()
            .map(|id| if id == old_id { new_id.clone() } else { id.clone() })
            .collect();
        item.set_labels(label_ids);
        writer.upsert_item(item)?;
    }
    Ok(())
}

/// Merge a server label into the store
///
/// Returns the id items should reference, or None when the user has deleted
/// the label locally and the deletion has not reached the server yet.
pub(crate) fn merge_remote_label(writer: &mut dyn StoreWriter, label: Label) -> Result<Option<LabelId>> {
    if let Some(existing) = writer.find_label_by_name(&label.name)?
        && existing.id != label.id
    {
        if existing.sync_status == SyncStatus::NeedsDeletion {
            return Ok(None);
        }
        let id = label.id.clone();
        rekey_label(writer, &existing.id, label)?;
        return Ok(Some(id));
    }

    if let Some(local) = writer.get_label(&label.id)?
        && local.sync_status == SyncStatus::NeedsDeletion
    {
        return Ok(None);
    }

    let id = label.id.clone();
    writer.upsert_label(label)?;
    Ok(Some(id))
}

/// Replace the local label set with the server's
///
/// Clean labels the server no longer has are removed; labels with pending
/// local changes are kept for the next flush. Returns the number of labels
/// the server reported.
pub async fn refresh_labels(
    store: &dyn EntityStore,
    remote: &dyn RemoteClient,
    timeout: Duration,
) -> SyncResult<usize> {
    let remote_labels = with_timeout(timeout, "list_labels", remote.list_labels()).await?;
    let total = remote_labels.len();

    let mut labels = Vec::with_capacity(total);
    for remote_label in remote_labels {
        match normalize_label(remote_label) {
            Ok(label) => labels.push(label),
            Err(e) => warn!("Skipping invalid label: {}", e),
        }
    }

    let removed = store.write(|writer| {
        let mut seen = HashSet::new();
        for label in labels {
            if let Some(id) = merge_remote_label(writer, label)? {
                seen.insert(id);
            }
        }

        let mut removed = 0usize;
        for local in writer.labels_with_status(SyncStatus::Clean)? {
            if !seen.contains(&local.id) {
                writer.delete_label(&local.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    })?;

    info!("Refreshed {} labels ({} removed locally)", total, removed);
    Ok(total)
}
