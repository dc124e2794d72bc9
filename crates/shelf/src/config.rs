//! Sync engine configuration
//!
//! Loaded from `sync.json` in the Shelf config directory. Every field has a
//! default, so a missing file or a partial one is fine.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Config filename in the Shelf config directory
pub const CONFIG_FILE: &str = "sync.json";

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for pagination, prefetch and remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items requested per page
    pub page_size: usize,
    /// Per-request timeout for remote calls
    pub request_timeout_secs: u64,
    /// Distance from the end of the list that arms the prefetch trigger
    pub prefetch_window: usize,
    /// How far past the trigger the list may grow before prefetch stops
    pub prefetch_lookahead: usize,
    /// Push pending local changes before each page fetch
    pub flush_before_fetch: bool,
    /// Event bus buffer per subscriber
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            request_timeout_secs: 30,
            prefetch_window: 5,
            prefetch_lookahead: 10,
            flush_before_fetch: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Load from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        config::load_json_or_default(CONFIG_FILE)
    }

    /// Load from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
