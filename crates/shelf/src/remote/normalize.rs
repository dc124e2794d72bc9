//! Remote response normalization
//!
//! Converts loosely typed API records to Shelf domain models. This is the
//! only place optional server fields are resolved.

use chrono::Utc;
use url::Url;

use super::api::{RemoteHighlight, RemoteItem, RemoteLabel};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    ContentReader, Highlight, HighlightId, Item, ItemId, Label, LabelId, SyncStatus,
};

/// Color assigned to labels the server returns without one
pub const DEFAULT_LABEL_COLOR: &str = "#FFD234";

/// A normalized item plus the labels it references
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub item: Item,
    pub labels: Vec<Label>,
}

/// Normalize a remote item into a clean domain Item
pub fn normalize_item(remote: RemoteItem) -> SyncResult<NormalizedItem> {
    if remote.id.trim().is_empty() {
        return Err(SyncError::Validation("item without id".to_string()));
    }

    let raw_url = remote
        .url
        .ok_or_else(|| SyncError::Validation(format!("item {} has no url", remote.id)))?;
    let url = Url::parse(&raw_url).map_err(|e| {
        SyncError::Validation(format!("item {} has invalid url {:?}: {}", remote.id, raw_url, e))
    })?;

    let labels = remote
        .labels
        .unwrap_or_default()
        .into_iter()
        .map(normalize_label)
        .collect::<SyncResult<Vec<_>>>()?;

    let created_at = remote.created_at.unwrap_or_else(Utc::now);
    let content_reader = remote
        .content_reader
        .as_deref()
        .map(ContentReader::parse)
        .unwrap_or_default();

    let item = Item::builder(ItemId::new(remote.id), url.to_string())
        .title(remote.title.unwrap_or_default())
        .slug(remote.slug.unwrap_or_default())
        .author(remote.author)
        .description(remote.description)
        .image_url(remote.image)
        .created_at(created_at)
        .saved_at(remote.saved_at.unwrap_or(created_at))
        .published_at(remote.published_at)
        .archived(remote.is_archived.unwrap_or(false))
        .reading_progress(
            remote.reading_progress_percent.unwrap_or(0.0),
            remote.reading_progress_anchor_index.unwrap_or(0),
        )
        .content_reader(content_reader)
        .label_ids(labels.iter().map(|l| l.id.clone()).collect())
        .sync_status(SyncStatus::Clean)
        .build();

    Ok(NormalizedItem { item, labels })
}

/// Normalize a remote label into a clean domain Label
pub fn normalize_label(remote: RemoteLabel) -> SyncResult<Label> {
    if remote.id.trim().is_empty() {
        return Err(SyncError::Validation(format!(
            "label {:?} without id",
            remote.name
        )));
    }
    if remote.name.trim().is_empty() {
        return Err(SyncError::Validation(format!(
            "label {} without name",
            remote.id
        )));
    }

    let color = remote
        .color
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string());

    let mut label = Label::new(LabelId::new(remote.id), remote.name, color);
    label.description = remote.description;
    if let Some(created_at) = remote.created_at {
        label.created_at = created_at;
    }
    Ok(label)
}

/// Normalize a remote highlight belonging to `item_id`
///
/// The server's own item id wins when present.
pub fn normalize_highlight(remote: RemoteHighlight, item_id: &ItemId) -> SyncResult<Highlight> {
    if remote.id.trim().is_empty() {
        return Err(SyncError::Validation(format!(
            "highlight on item {} without id",
            item_id
        )));
    }

    let label_ids = remote
        .labels
        .unwrap_or_default()
        .into_iter()
        .map(|l| LabelId::new(l.id))
        .collect();

    let now = Utc::now();
    let created_at = remote.created_at.unwrap_or(now);
    let short_id = remote
        .short_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| remote.id.clone());

    Ok(Highlight {
        id: HighlightId::new(remote.id),
        short_id,
        item_id: remote.item_id.map(ItemId::new).unwrap_or_else(|| item_id.clone()),
        quote: remote.quote.unwrap_or_default(),
        patch: remote.patch.unwrap_or_default(),
        annotation: remote.annotation,
        label_ids,
        created_at,
        updated_at: remote.updated_at.unwrap_or(created_at),
        sync_status: SyncStatus::Clean,
    })
}
