//! Remote API integration
//!
//! This module provides:
//! - The `RemoteClient` trait the sync engine talks to
//! - Loosely typed response records (`api`)
//! - Normalization of those records into domain models
//! - An in-memory fake server for tests and offline demos

mod client;
mod memory;
mod normalize;

pub use client::{RemoteClient, RemoteError, with_timeout};
pub use memory::InMemoryRemote;
pub use normalize::{NormalizedItem, normalize_highlight, normalize_item, normalize_label};

/// Remote API response types
///
/// Every field the server may omit is optional here; `normalize` is the only
/// place that turns these into domain structs.
pub mod api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// An item as returned by the server
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RemoteItem {
        pub id: String,
        pub title: Option<String>,
        pub url: Option<String>,
        pub slug: Option<String>,
        pub author: Option<String>,
        pub description: Option<String>,
        pub image: Option<String>,
        pub created_at: Option<DateTime<Utc>>,
        pub saved_at: Option<DateTime<Utc>>,
        pub published_at: Option<DateTime<Utc>>,
        pub is_archived: Option<bool>,
        pub reading_progress_percent: Option<f64>,
        pub reading_progress_anchor_index: Option<i64>,
        pub content_reader: Option<String>,
        pub labels: Option<Vec<RemoteLabel>>,
    }

    /// A label as returned by the server
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RemoteLabel {
        pub id: String,
        pub name: String,
        pub color: Option<String>,
        pub description: Option<String>,
        pub created_at: Option<DateTime<Utc>>,
    }

    /// A highlight as returned by the server
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RemoteHighlight {
        pub id: String,
        pub short_id: Option<String>,
        pub item_id: Option<String>,
        pub quote: Option<String>,
        pub patch: Option<String>,
        pub annotation: Option<String>,
        pub labels: Option<Vec<RemoteLabel>>,
        pub created_at: Option<DateTime<Utc>>,
        pub updated_at: Option<DateTime<Utc>>,
    }

    /// One page of a paginated item listing
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ItemsPage {
        pub items: Vec<RemoteItem>,
        /// Opaque continuation cursor; None when the listing is exhausted
        pub next_cursor: Option<String>,
    }

    /// Parameters for a paginated item listing
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct FetchItemsRequest {
        pub cursor: Option<String>,
        pub limit: usize,
        /// Query-language string; None lists the default inbox
        pub query: Option<String>,
    }
}
