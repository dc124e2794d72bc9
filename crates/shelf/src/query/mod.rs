//! Query API for the presentation layer
//!
//! Search-term handling shared by the paginator and the local fallback,
//! plus read-only lookups that return display-ready data.

mod items;
mod search;

pub use items::{ItemDetail, get_item_detail, local_items};
pub use search::{BUILTIN_FILTERS, SearchQuery};
