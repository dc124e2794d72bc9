//! Storage traits and implementations
//!
//! This module defines the transactional storage layer that owns the
//! canonical Item, Label and Highlight rows. Both backends serialize writes
//! through a single lock and expose scoped transactions that either fully
//! commit or fully roll back.

mod memory;
mod predicate;
mod sqlite;
mod traits;

pub use memory::InMemoryEntityStore;
pub use predicate::ItemPredicate;
pub use sqlite::SqliteEntityStore;
pub use traits::{EntityStore, EntityStoreExt, StoreReader, StoreWriter};
