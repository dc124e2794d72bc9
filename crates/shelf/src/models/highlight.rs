//! Highlight model representing an annotation anchored in item content

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, LabelId, SyncStatus};

/// Unique identifier for a highlight
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HighlightId(pub String);

impl HighlightId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HighlightId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HighlightId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for HighlightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A highlighted region of an item
///
/// The region is anchored by a patch/quote pair produced by the reader.
/// Highlights only use `Clean` (synced) and `NeedsCreation` (local-only);
/// deletion is immediate and has no pending state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: HighlightId,
    pub short_id: String,
    pub item_id: ItemId,
    pub quote: String,
    pub patch: String,
    pub annotation: Option<String>,
    pub label_ids: Vec<LabelId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Highlight {
    /// Create a local-only highlight
    pub fn new(
        id: impl Into<HighlightId>,
        short_id: impl Into<String>,
        item_id: impl Into<ItemId>,
        quote: impl Into<String>,
        patch: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            short_id: short_id.into(),
            item_id: item_id.into(),
            quote: quote.into(),
            patch: patch.into(),
            annotation: None,
            label_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::NeedsCreation,
        }
    }

    /// Builder method to set the annotation
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Builder method to set the labels
    pub fn with_labels(mut self, label_ids: Vec<LabelId>) -> Self {
        self.label_ids = label_ids;
        self
    }

    /// Annotation text, treating blank strings as absent
    pub fn annotation_text(&self) -> Option<&str> {
        self.annotation
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_highlight_is_local_only() {
        let h = Highlight::new("h1", "s1", "i1", "quote", "patch");
        assert_eq!(h.sync_status, SyncStatus::NeedsCreation);
        assert!(!h.is_synced());
    }

    #[test]
    fn test_blank_annotation_is_absent() {
        let h = Highlight::new("h1", "s1", "i1", "q", "p").with_annotation("   ");
        assert_eq!(h.annotation_text(), None);

        let h = h.with_annotation("worth rereading");
        assert_eq!(h.annotation_text(), Some("worth rereading"));
    }
}
