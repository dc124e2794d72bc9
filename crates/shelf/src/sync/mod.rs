//! Offline-first synchronization engine
//!
//! - `mutations`: optimistic user intents and their reconciliation
//! - `status`: pending-row tracking, id adoption and the offline flush
//! - `paginator`: cursor paging, prefetch and local fallback
//! - `ordering`: last-issued-wins guard for page and search responses
//! - `highlights`: highlight lifecycle and overlap merging
//! - `labels`: label id adoption and label list refresh

mod highlights;
mod labels;
mod mutations;
mod ordering;
mod paginator;
mod status;

pub use highlights::{HighlightMerger, apply_merge};
pub use labels::refresh_labels;
pub use mutations::{Mutation, MutationHandle, MutationQueue, ReconcileOutcome};
pub use ordering::SearchOrderingGuard;
pub use paginator::{LoadOutcome, Paginator, should_prefetch};
pub use status::{FlushStats, PendingCounts, SyncTracker};
