//! Item query functions

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::SearchQuery;
use crate::models::{Highlight, Item, ItemId, Label};
use crate::storage::{EntityStore, EntityStoreExt};

/// An item with its resolved labels and highlights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetail {
    pub item: Item,
    /// Labels in the item's order; references to unknown labels are skipped
    pub labels: Vec<Label>,
    /// Highlights ordered oldest first
    pub highlights: Vec<Highlight>,
}

/// Fetch the locally stored items matching a search's built-in filter
///
/// Sorted by saved time, newest first. Rows pending deletion never appear.
pub fn local_items(store: &dyn EntityStore, query: &SearchQuery) -> Result<Vec<Item>> {
    let predicate = query.default_predicate();
    store.read(|reader| reader.fetch_items(&predicate))
}

/// Get an item with its labels and highlights
///
/// Returns None for unknown items and for items pending deletion.
pub fn get_item_detail(store: &dyn EntityStore, id: &ItemId) -> Result<Option<ItemDetail>> {
    store.read(|reader| {
        let Some(item) = reader.get_item(id)? else {
            return Ok(None);
        };
        if !item.sync_status.is_visible() {
            return Ok(None);
        }

        let mut labels = Vec::with_capacity(item.label_ids.len());
        for label_id in &item.label_ids {
            if let Some(label) = reader.get_label(label_id)? {
                labels.push(label);
            }
        }
        let highlights = reader.highlights_for_item(id)?;

        Ok(Some(ItemDetail {
            item,
            labels,
            highlights,
        }))
    })
}
