//! Domain models for library entities

mod highlight;
mod item;
mod label;
mod sync_status;

pub use highlight::{Highlight, HighlightId};
pub use item::{ContentReader, Item, ItemBuilder, ItemId};
pub use label::{Label, LabelId};
pub use sync_status::SyncStatus;
