//! Storage trait definitions

use anyhow::{Context, Result};

use super::ItemPredicate;
use crate::models::{Highlight, HighlightId, Item, ItemId, Label, LabelId, SyncStatus};

/// Read access inside a transaction
pub trait StoreReader {
    /// Get an item by ID, regardless of sync status
    fn get_item(&self, id: &ItemId) -> Result<Option<Item>>;

    /// Fetch items matching a predicate, ordered by saved_at descending
    fn fetch_items(&self, predicate: &ItemPredicate) -> Result<Vec<Item>>;

    /// List items carrying the given sync status
    fn items_with_status(&self, status: SyncStatus) -> Result<Vec<Item>>;

    /// List items that reference a label
    fn items_with_label(&self, label_id: &LabelId) -> Result<Vec<Item>>;

    /// Get a label by ID
    fn get_label(&self, id: &LabelId) -> Result<Option<Label>>;

    /// Find a label by its exact (case-sensitive) name
    fn find_label_by_name(&self, name: &str) -> Result<Option<Label>>;

    /// List all labels ordered by name
    fn list_labels(&self) -> Result<Vec<Label>>;

    /// List labels carrying the given sync status
    fn labels_with_status(&self, status: SyncStatus) -> Result<Vec<Label>>;

    /// Get a highlight by ID
    fn get_highlight(&self, id: &HighlightId) -> Result<Option<Highlight>>;

    /// List highlights for an item, oldest first
    fn highlights_for_item(&self, item_id: &ItemId) -> Result<Vec<Highlight>>;

    /// List highlights carrying the given sync status
    fn highlights_with_status(&self, status: SyncStatus) -> Result<Vec<Highlight>>;
}

/// Write access inside a transaction
pub trait StoreWriter: StoreReader {
    /// Insert or update an item, replacing its label references
    fn upsert_item(&mut self, item: Item) -> Result<()>;

    /// Delete an item; returns false if it did not exist
    fn delete_item(&mut self, id: &ItemId) -> Result<bool>;

    /// Insert or update a label
    ///
    /// Fails if a different label already uses the same name.
    fn upsert_label(&mut self, label: Label) -> Result<()>;

    /// Delete a label and strip it from every item referencing it
    fn delete_label(&mut self, id: &LabelId) -> Result<bool>;

    /// Insert or update a highlight
    fn upsert_highlight(&mut self, highlight: Highlight) -> Result<()>;

    /// Delete a highlight; returns false if it did not exist
    fn delete_highlight(&mut self, id: &HighlightId) -> Result<bool>;
}

/// Transactional entity store
///
/// Implementations serialize write transactions. A write transaction commits
/// only when the body returns `Ok`; any error (or a panic unwinding through
/// the body) leaves the store exactly as it was before the transaction.
///
/// The object-safe methods take `FnMut` bodies; use [`EntityStoreExt`] for
/// closures that return values.
pub trait EntityStore: Send + Sync {
    /// Run a read-only transaction
    fn read_txn(&self, body: &mut dyn FnMut(&dyn StoreReader) -> Result<()>) -> Result<()>;

    /// Run a read-write transaction
    fn write_txn(&self, body: &mut dyn FnMut(&mut dyn StoreWriter) -> Result<()>) -> Result<()>;
}

/// Value-returning transaction helpers for any [`EntityStore`]
pub trait EntityStoreExt: EntityStore {
    /// Run a read transaction and return the body's value
    fn read<R>(&self, body: impl FnOnce(&dyn StoreReader) -> Result<R>) -> Result<R> {
        let mut body = Some(body);
        let mut output = None;
        self.read_txn(&mut |reader: &dyn StoreReader| {
            let body = body.take().context("read transaction body ran twice")?;
            output = Some(body(reader)?);
            Ok(())
        })?;
        output.context("read transaction produced no value")
    }

    /// Run a write transaction and return the body's value
    fn write<R>(&self, body: impl FnOnce(&mut dyn StoreWriter) -> Result<R>) -> Result<R> {
        let mut body = Some(body);
        let mut output = None;
        self.write_txn(&mut |writer: &mut dyn StoreWriter| {
            let body = body.take().context("write transaction body ran twice")?;
            output = Some(body(writer)?);
            Ok(())
        })?;
        output.context("write transaction produced no value")
    }
}

impl<T: EntityStore + ?Sized> EntityStoreExt for T {}
