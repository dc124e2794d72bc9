//! Item model representing a saved article, page or file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LabelId, SyncStatus};

/// Unique identifier for an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a client-side id for an item saved offline
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which reader renders the item's content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentReader {
    #[default]
    Web,
    Pdf,
    Epub,
}

impl ContentReader {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentReader::Web => "WEB",
            ContentReader::Pdf => "PDF",
            ContentReader::Epub => "EPUB",
        }
    }

    /// Parse a reader name; unknown values fall back to `Web`
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PDF" => ContentReader::Pdf,
            "EPUB" => ContentReader::Epub,
            _ => ContentReader::Web,
        }
    }
}

/// A saved library item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    /// Original page URL
    pub url: String,
    pub slug: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the user saved the item; default sort key
    pub saved_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub archived: bool,
    /// Reading progress in percent, always within 0..=100
    pub reading_progress: f64,
    /// Opaque position marker inside the content
    pub reading_progress_anchor: i64,
    pub content_reader: ContentReader,
    /// Ordered label references
    pub label_ids: Vec<LabelId>,
    /// Reminder time while the item is snoozed
    pub snoozed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Item {
    /// Create a new item builder
    pub fn builder(id: ItemId, url: impl Into<String>) -> ItemBuilder {
        ItemBuilder::new(id, url.into())
    }

    /// Attach a label, keeping order and ignoring duplicates
    ///
    /// Returns false if the label was already attached.
    pub fn add_label(&mut self, label_id: LabelId) -> bool {
        if self.label_ids.contains(&label_id) {
            return false;
        }
        self.label_ids.push(label_id);
        true
    }

    /// Detach a label; returns false if it was not attached
    pub fn remove_label(&mut self, label_id: &LabelId) -> bool {
        let before = self.label_ids.len();
        self.label_ids.retain(|l| l != label_id);
        before != self.label_ids.len()
    }

    /// Replace the label set, dropping duplicates but keeping first-seen order
    pub fn set_labels(&mut self, label_ids: Vec<LabelId>) {
        self.label_ids.clear();
        for id in label_ids {
            self.add_label(id);
        }
    }

    /// Update reading progress, clamping the percentage into 0..=100
    pub fn set_reading_progress(&mut self, percent: f64, anchor_index: i64) {
        self.reading_progress = clamp_progress(percent);
        self.reading_progress_anchor = anchor_index.max(0);
    }

    pub fn is_pdf(&self) -> bool {
        self.content_reader == ContentReader::Pdf
    }
}

/// Clamp a reading progress value; NaN becomes 0
pub(crate) fn clamp_progress(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Builder for creating Item instances
pub struct ItemBuilder {
    id: ItemId,
    url: String,
    title: String,
    slug: String,
    author: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    saved_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    archived: bool,
    reading_progress: f64,
    reading_progress_anchor: i64,
    content_reader: ContentReader,
    label_ids: Vec<LabelId>,
    snoozed_until: Option<DateTime<Utc>>,
    sync_status: SyncStatus,
}

impl ItemBuilder {
    fn new(id: ItemId, url: String) -> Self {
        Self {
            id,
            url,
            title: String::new(),
            slug: String::new(),
            author: None,
            description: None,
            image_url: None,
            created_at: None,
            saved_at: None,
            published_at: None,
            archived: false,
            reading_progress: 0.0,
            reading_progress_anchor: 0,
            content_reader: ContentReader::Web,
            label_ids: Vec::new(),
            snoozed_until: None,
            sync_status: SyncStatus::Clean,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    pub fn author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn saved_at(mut self, saved_at: DateTime<Utc>) -> Self {
        self.saved_at = Some(saved_at);
        self
    }

    pub fn published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = archived;
        self
    }

    pub fn reading_progress(mut self, percent: f64, anchor_index: i64) -> Self {
        self.reading_progress = clamp_progress(percent);
        self.reading_progress_anchor = anchor_index.max(0);
        self
    }

    pub fn content_reader(mut self, content_reader: ContentReader) -> Self {
        self.content_reader = content_reader;
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<LabelId>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn snoozed_until(mut self, snoozed_until: Option<DateTime<Utc>>) -> Self {
        self.snoozed_until = snoozed_until;
        self
    }

    pub fn sync_status(mut self, sync_status: SyncStatus) -> Self {
        self.sync_status = sync_status;
        self
    }

    pub fn build(self) -> Item {
        let now = Utc::now();
        let slug = if self.slug.is_empty() {
            self.id.0.clone()
        } else {
            self.slug
        };
        let title = if self.title.is_empty() {
            self.url.clone()
        } else {
            self.title
        };
        let created_at = self.created_at.unwrap_or(now);

        let mut item = Item {
            id: self.id,
            title,
            url: self.url,
            slug,
            author: self.author,
            description: self.description,
            image_url: self.image_url,
            created_at,
            saved_at: self.saved_at.unwrap_or(created_at),
            published_at: self.published_at,
            archived: self.archived,
            reading_progress: self.reading_progress,
            reading_progress_anchor: self.reading_progress_anchor,
            content_reader: self.content_reader,
            label_ids: Vec::new(),
            snoozed_until: self.snoozed_until,
            sync_status: self.sync_status,
        };
        item.set_labels(self.label_ids);
        item
    }
}
