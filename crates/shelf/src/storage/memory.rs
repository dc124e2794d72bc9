//! In-memory storage implementation
//!
//! Used by tests and by hosts that keep the library purely in memory.
//! Write transactions run against a staged copy of the tables which replaces
//! the live copy only when the body succeeds, so a failed transaction leaves
//! nothing behind.

use anyhow::{Result, anyhow, bail};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{EntityStore, ItemPredicate, StoreReader, StoreWriter};
use crate::models::{Highlight, HighlightId, Item, ItemId, Label, LabelId, SyncStatus};

#[derive(Debug, Clone, Default)]
struct Tables {
    items: HashMap<String, Item>,
    labels: HashMap<String, Label>,
    highlights: HashMap<String, Highlight>,
}

/// Sort newest-saved first, breaking ties by id for stable output
fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| {
        Reverse(a.saved_at)
            .cmp(&Reverse(b.saved_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl StoreReader for Tables {
    fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        Ok(self.items.get(&id.0).cloned())
    }

    fn fetch_items(&self, predicate: &ItemPredicate) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .values()
            .filter(|item| predicate.matches(item))
            .cloned()
            .collect();
        sort_items(&mut items);
        Ok(items)
    }

    fn items_with_status(&self, status: SyncStatus) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .values()
            .filter(|item| item.sync_status == status)
            .cloned()
            .collect();
        sort_items(&mut items);
        Ok(items)
    }

    fn items_with_label(&self, label_id: &LabelId) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .values()
            .filter(|item| item.label_ids.contains(label_id))
            .cloned()
            .collect();
        sort_items(&mut items);
        Ok(items)
    }

    fn get_label(&self, id: &LabelId) -> Result<Option<Label>> {
        Ok(self.labels.get(&id.0).cloned())
    }

    fn find_label_by_name(&self, name: &str) -> Result<Option<Label>> {
        Ok(self.labels.values().find(|l| l.name == name).cloned())
    }

    fn list_labels(&self) -> Result<Vec<Label>> {
        let mut labels: Vec<Label> = self.labels.values().cloned().collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    fn labels_with_status(&self, status: SyncStatus) -> Result<Vec<Label>> {
        let mut labels: Vec<Label> = self
            .labels
            .values()
            .filter(|l| l.sync_status == status)
            .cloned()
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    fn get_highlight(&self, id: &HighlightId) -> Result<Option<Highlight>> {
        Ok(self.highlights.get(&id.0).cloned())
    }

    fn highlights_for_item(&self, item_id: &ItemId) -> Result<Vec<Highlight>> {
        let mut highlights: Vec<Highlight> = self
            .highlights
            .values()
            .filter(|h| &h.item_id == item_id)
            .cloned()
            .collect();
        highlights.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(highlights)
    }

    fn highlights_with_status(&self, status: SyncStatus) -> Result<Vec<Highlight>> {
        let mut highlights: Vec<Highlight> = self
            .highlights
            .values()
            .filter(|h| h.sync_status == status)
            .cloned()
            .collect();
        highlights.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(highlights)
    }
}

impl StoreWriter for Tables {
    fn upsert_item(&mut self, item: Item) -> Result<()> {
        self.items.insert(item.id.0.clone(), item);
        Ok(())
    }

    fn delete_item(&mut self, id: &ItemId) -> Result<bool> {
        Ok(self.items.remove(&id.0).is_some())
    }

    fn upsert_label(&mut self, label: Label) -> Result<()> {
        if let Some(existing) = self.find_label_by_name(&label.name)?
            && existing.id != label.id
        {
            bail!(
                "label name {:?} already used by label {}",
                label.name,
                existing.id
            );
        }
        self.labels.insert(label.id.0.clone(), label);
        Ok(())
    }

    fn delete_label(&mut self, id: &LabelId) -> Result<bool> {
        let existed = self.labels.remove(&id.0).is_some();
        for item in self.items.values_mut() {
            item.remove_label(id);
        }
        Ok(existed)
    }

    fn upsert_highlight(&mut self, highlight: Highlight) -> Result<()> {
        self.highlights.insert(highlight.id.0.clone(), highlight);
        Ok(())
    }

    fn delete_highlight(&mut self, id: &HighlightId) -> Result<bool> {
        Ok(self.highlights.remove(&id.0).is_some())
    }
}

/// In-memory implementation of EntityStore
///
/// A single RwLock guards all tables: readers share it, and a write
/// transaction holds it exclusively from staging to commit.
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
}

impl InMemoryEntityStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn read_txn(&self, body: &mut dyn FnMut(&dyn StoreReader) -> Result<()>) -> Result<()> {
        let tables = self
            .tables
            .read()
            .map_err(|_| anyhow!("entity store lock poisoned"))?;
        body(&*tables)
    }

    fn write_txn(&self, body: &mut dyn FnMut(&mut dyn StoreWriter) -> Result<()>) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("entity store lock poisoned"))?;
        let mut staged = tables.clone();
        body(&mut staged)?;
        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::EntityStoreExt;
    use chrono::{Duration, Utc};

    fn make_item(id: &str, age_hours: i64) -> Item {
        Item::builder(ItemId::new(id), format!("https://example.com/{}", id))
            .title(format!("Item {}", id))
            .saved_at(Utc::now() - Duration::hours(age_hours))
            .build()
    }

    #[test]
    fn test_upsert_and_get_item() {
        let store = InMemoryEntityStore::new();
        store.write(|w| w.upsert_item(make_item("i1", 1))).unwrap();

        let item = store.read(|r| r.get_item(&ItemId::new("i1"))).unwrap();
        assert_eq!(item.unwrap().title, "Item i1");
    }

    #[test]
    fn test_fetch_items_sorted_by_saved_at_desc() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| {
                w.upsert_item(make_item("old", 5))?;
                w.upsert_item(make_item("new", 1))?;
                w.upsert_item(make_item("mid", 3))
            })
            .unwrap();

        let items = store.read(|r| r.fetch_items(&ItemPredicate::any())).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = InMemoryEntityStore::new();
        store.write(|w| w.upsert_item(make_item("i1", 1))).unwrap();

        let result = store.write(|w| {
            w.delete_item(&ItemId::new("i1"))?;
            w.upsert_item(make_item("i2", 1))?;
            Err::<(), _>(anyhow!("simulated failure"))
        });
        assert!(result.is_err());

        let items = store.read(|r| r.fetch_items(&ItemPredicate::any())).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_str(), "i1");
    }

    #[test]
    fn test_label_names_are_unique() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| w.upsert_label(Label::new("l1", "reading", "#fff")))
            .unwrap();

        let dup = store.write(|w| w.upsert_label(Label::new("l2", "reading", "#000")));
        assert!(dup.is_err());

        // Same id may be updated freely
        store
            .write(|w| w.upsert_label(Label::new("l1", "reading", "#000")))
            .unwrap();
        // Case-sensitive: a different casing is a different name
        store
            .write(|w| w.upsert_label(Label::new("l3", "Reading", "#000")))
            .unwrap();

        let labels = store.read(|r| r.list_labels()).unwrap();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_delete_label_strips_item_references() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| {
                w.upsert_label(Label::new("l1", "news", "#fff"))?;
                let mut item = make_item("i1", 1);
                item.add_label(LabelId::new("l1"));
                w.upsert_item(item)
            })
            .unwrap();

        store.write(|w| w.delete_label(&LabelId::new("l1"))).unwrap();

        let item = store
            .read(|r| r.get_item(&ItemId::new("i1")))
            .unwrap()
            .unwrap();
        assert!(item.label_ids.is_empty());
    }

    #[test]
    fn test_highlights_for_item() {
        let store = InMemoryEntityStore::new();
        store
            .write(|w| {
                w.upsert_highlight(Highlight::new("h1", "s1", "i1", "q1", "p1"))?;
                w.upsert_highlight(Highlight::new("h2", "s2", "i2", "q2", "p2"))
            })
            .unwrap();

        let highlights = store
            .read(|r| r.highlights_for_item(&ItemId::new("i1")))
            .unwrap();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].id.as_str(), "h1");
    }
}
