//! The library facade
//!
//! Wires a store, a remote client and a config into the sync components.
//! Everything is injected; there is no global instance.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, LibraryEvent, NoticeKind};
use crate::models::{ItemId, Label, LabelId};
use crate::query::{ItemDetail, SearchQuery, get_item_detail};
use crate::remote::RemoteClient;
use crate::storage::{EntityStore, EntityStoreExt};
use crate::sync::{
    FlushStats, HighlightMerger, LoadOutcome, Mutation, MutationHandle, MutationQueue, Paginator,
    PendingCounts, SyncTracker, refresh_labels,
};

/// A user's read-it-later library
pub struct Library {
    tracker: Arc<SyncTracker>,
    mutations: MutationQueue,
    paginator: Arc<Paginator>,
    highlights: HighlightMerger,
}

impl Library {
    /// Build a library on top of `store` and `remote`
    ///
    /// Background reconciliation tasks are spawned on `runtime`.
    pub fn new(
        store: Arc<dyn EntityStore>,
        remote: Arc<dyn RemoteClient>,
        config: SyncConfig,
        runtime: Handle,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let tracker = Arc::new(SyncTracker::new(
            store,
            remote,
            events.clone(),
            config.request_timeout(),
        ));
        let paginator = Arc::new(Paginator::new(tracker.clone(), config));

        runtime.spawn(follow_adoptions(events.subscribe(), Arc::downgrade(&paginator)));

        Self {
            mutations: MutationQueue::new(tracker.clone(), runtime),
            highlights: HighlightMerger::new(tracker.clone()),
            paginator,
            tracker,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.tracker.events().subscribe()
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn highlights(&self) -> &HighlightMerger {
        &self.highlights
    }

    pub fn tracker(&self) -> &Arc<SyncTracker> {
        &self.tracker
    }

    /// Apply any mutation without the list bookkeeping of the helpers below
    pub fn apply(&self, mutation: Mutation) -> SyncResult<MutationHandle> {
        self.mutations.apply(mutation)
    }

    // Loading

    pub async fn refresh(&self) -> SyncResult<LoadOutcome> {
        self.paginator.load_page(true).await
    }

    pub async fn load_more(&self) -> SyncResult<LoadOutcome> {
        self.paginator.load_page(false).await
    }

    pub async fn search(&self, query: SearchQuery) -> SyncResult<LoadOutcome> {
        self.paginator.search(query).await
    }

    pub async fn item_appeared(&self, item_id: &ItemId) -> SyncResult<LoadOutcome> {
        self.paginator.item_appeared(item_id).await
    }

    pub fn item_detail(&self, item_id: &ItemId) -> SyncResult<Option<ItemDetail>> {
        let id = self.tracker.resolve_item(item_id);
        Ok(get_item_detail(self.tracker.store().as_ref(), &id)?)
    }

    // Items

    /// Save a url; the new item shows at the top of the list right away
    pub fn save_url(&self, url: impl Into<String>) -> SyncResult<(ItemId, MutationHandle)> {
        let client_id = ItemId::generate();
        let handle = self.mutations.apply(Mutation::SaveItem {
            client_id: client_id.clone(),
            url: url.into(),
        })?;

        if let Some(item) = self.tracker.store().read(|r| r.get_item(&client_id))? {
            self.paginator.push_item(item);
        }
        Ok((client_id, handle))
    }

    pub fn archive(&self, item_id: &ItemId, archived: bool) -> SyncResult<MutationHandle> {
        let handle = self.mutations.apply(Mutation::Archive {
            item_id: item_id.clone(),
            archived,
        })?;
        self.paginator.remove_item(&self.tracker.resolve_item(item_id));
        let message = if archived {
            "Link archived"
        } else {
            "Link moved to Inbox"
        };
        self.tracker.events().notify(message, NoticeKind::Info);
        Ok(handle)
    }

    pub fn delete(&self, item_id: &ItemId) -> SyncResult<MutationHandle> {
        let handle = self.mutations.apply(Mutation::Delete {
            item_id: item_id.clone(),
        })?;
        self.paginator.remove_item(&self.tracker.resolve_item(item_id));
        self.tracker.events().notify("Link removed", NoticeKind::Info);
        Ok(handle)
    }

    /// Hide an item until `until`
    ///
    /// `message` is shown once the server has accepted the reminder.
    pub fn snooze(
        &self,
        item_id: &ItemId,
        until: DateTime<Utc>,
        message: Option<&str>,
    ) -> SyncResult<MutationHandle> {
        let mutation = Mutation::Snooze {
            item_id: item_id.clone(),
            until,
        };
        let handle = match message {
            Some(message) => self.mutations.apply_with_notice(mutation, message)?,
            None => self.mutations.apply(mutation)?,
        };
        self.paginator.remove_item(&self.tracker.resolve_item(item_id));
        Ok(handle)
    }

    pub fn update_reading_progress(
        &self,
        item_id: &ItemId,
        percent: f64,
        anchor_index: i64,
    ) -> SyncResult<MutationHandle> {
        self.mutations.apply(Mutation::UpdateReadingProgress {
            item_id: item_id.clone(),
            percent,
            anchor_index,
        })
    }

    // Labels

    pub fn add_label(&self, item_id: &ItemId, label_id: &LabelId) -> SyncResult<MutationHandle> {
        self.mutations.apply(Mutation::AddLabel {
            item_id: item_id.clone(),
            label_id: label_id.clone(),
        })
    }

    pub fn remove_label(&self, item_id: &ItemId, label_id: &LabelId) -> SyncResult<MutationHandle> {
        self.mutations.apply(Mutation::RemoveLabel {
            item_id: item_id.clone(),
            label_id: label_id.clone(),
        })
    }

    pub fn set_labels(&self, item_id: &ItemId, label_ids: Vec<LabelId>) -> SyncResult<MutationHandle> {
        self.mutations.apply(Mutation::SetLabels {
            item_id: item_id.clone(),
            label_ids,
        })
    }

    /// Create a label, or reuse the one that already has `name`
    ///
    /// Returns the id the label is stored under.
    pub fn create_label(
        &self,
        name: &str,
        color: &str,
        description: Option<String>,
    ) -> SyncResult<(LabelId, MutationHandle)> {
        let client_id = LabelId::generate();
        let handle = self.mutations.apply(Mutation::CreateLabel {
            client_id: client_id.clone(),
            name: name.to_string(),
            color: color.to_string(),
            description,
        })?;

        let stored = self
            .tracker
            .store()
            .read(|r| r.find_label_by_name(name))?
            .map(|label| label.id)
            .ok_or_else(|| SyncError::not_found("label", name))?;
        Ok((stored, handle))
    }

    pub fn delete_label(&self, label_id: &LabelId) -> SyncResult<MutationHandle> {
        self.mutations.apply(Mutation::DeleteLabel {
            label_id: label_id.clone(),
        })
    }

    /// Labels visible to the user, sorted by name
    pub fn labels(&self) -> SyncResult<Vec<Label>> {
        let mut labels = self.tracker.store().read(|r| r.list_labels())?;
        labels.retain(|label| label.sync_status.is_visible());
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labels)
    }

    pub async fn refresh_labels(&self) -> SyncResult<usize> {
        refresh_labels(
            self.tracker.store().as_ref(),
            self.tracker.remote().as_ref(),
            self.tracker.timeout(),
        )
        .await
    }

    // Sync

    pub async fn flush(&self) -> SyncResult<FlushStats> {
        self.tracker.flush().await
    }

    pub fn pending(&self) -> SyncResult<PendingCounts> {
        self.tracker.pending()
    }
}

/// Keep the visible list pointing at adopted server ids
async fn follow_adoptions(mut events: broadcast::Receiver<LibraryEvent>, paginator: Weak<Paginator>) {
    loop {
        match events.recv().await {
            Ok(LibraryEvent::ItemAdopted { local_id, item }) => {
                let Some(paginator) = paginator.upgrade() else {
                    break;
                };
                if paginator.replace_item(&local_id, item) {
                    debug!("Visible item {} replaced by its server copy", local_id);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                info!("Adoption listener skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
