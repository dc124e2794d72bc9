//! Per-row sync status relative to the server

use serde::{Deserialize, Serialize};

/// Whether a locally stored entity agrees with the server
///
/// Attached to Item, Label and Highlight rows. Rows tagged `NeedsDeletion`
/// stay physically present until the server confirms the deletion, but every
/// default query treats them as gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local row matches the server
    #[default]
    Clean,
    /// Deleted locally, server deletion not yet confirmed
    NeedsDeletion,
    /// Created locally, server creation not yet confirmed
    NeedsCreation,
}

impl SyncStatus {
    /// Integer encoding used by the SQLite store
    pub fn as_i64(self) -> i64 {
        match self {
            SyncStatus::Clean => 0,
            SyncStatus::NeedsDeletion => 1,
            SyncStatus::NeedsCreation => 2,
        }
    }

    /// Decode the SQLite integer encoding
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SyncStatus::Clean),
            1 => Some(SyncStatus::NeedsDeletion),
            2 => Some(SyncStatus::NeedsCreation),
            _ => None,
        }
    }

    /// True when the row still has an unsent intent
    pub fn is_pending(self) -> bool {
        self != SyncStatus::Clean
    }

    /// True when default queries should show the row
    pub fn is_visible(self) -> bool {
        self != SyncStatus::NeedsDeletion
    }
}
