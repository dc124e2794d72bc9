//! Shelf - offline-first sync engine for a read-it-later library
//!
//! This crate provides:
//! - Domain models (Item, Label, Highlight) tagged with a sync status
//! - Transactional storage (in-memory and SQLite)
//! - A remote client seam with a single normalization boundary
//! - Optimistic mutations reconciled against the server
//! - Cursor pagination guarded against out-of-order responses
//! - Highlight merging
//!
//! Nothing here renders UI; the presentation layer subscribes to
//! [`events::EventBus`] and issues intents through [`Library`].

pub mod config;
pub mod error;
pub mod events;
pub mod library;
pub mod models;
pub mod query;
pub mod remote;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, LibraryEvent, NoticeKind};
pub use library::Library;
pub use models::{ContentReader, Highlight, HighlightId, Item, ItemBuilder, ItemId, Label, LabelId, SyncStatus};
pub use query::{ItemDetail, SearchQuery, get_item_detail, local_items};
pub use remote::{InMemoryRemote, RemoteClient, RemoteError};
pub use storage::{
    EntityStore, EntityStoreExt, InMemoryEntityStore, ItemPredicate, SqliteEntityStore, StoreReader,
    StoreWriter,
};
pub use sync::{
    // Intents
    Mutation, MutationHandle, MutationQueue, ReconcileOutcome,
    // Loading
    LoadOutcome, Paginator, SearchOrderingGuard, should_prefetch,
    // Reconciliation
    FlushStats, HighlightMerger, PendingCounts, SyncTracker, apply_merge, refresh_labels,
};
