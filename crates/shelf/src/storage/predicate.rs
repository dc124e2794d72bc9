//! Item fetch predicates

use crate::models::{ContentReader, Item, SyncStatus};

/// Filter applied by [`StoreReader::fetch_items`](super::StoreReader::fetch_items)
///
/// Every populated field must match. Results are always sorted by
/// `saved_at` descending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPredicate {
    /// Exclude rows carrying this status
    pub exclude_status: Option<SyncStatus>,
    /// Required archived flag
    pub archived: Option<bool>,
    /// Required content reader
    pub content_reader: Option<ContentReader>,
}

impl ItemPredicate {
    /// Match every row, including ones pending deletion
    pub fn any() -> Self {
        Self::default()
    }

    /// Match every row that is not pending deletion
    pub fn undeleted() -> Self {
        Self {
            exclude_status: Some(SyncStatus::NeedsDeletion),
            ..Self::default()
        }
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn content_reader(mut self, reader: ContentReader) -> Self {
        self.content_reader = Some(reader);
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        if self.exclude_status.is_some_and(|s| item.sync_status == s) {
            return false;
        }
        if self.archived.is_some_and(|a| item.archived != a) {
            return false;
        }
        if self.content_reader.is_some_and(|r| item.content_reader != r) {
            return false;
        }
        true
    }
}
