//! Optimistic mutation queue
//!
//! Every user intent is handled in three steps:
//! 1. Apply it to the store in one transaction, before any network call
//! 2. Send it to the server from a spawned task
//! 3. Reconcile the server's answer with the store
//!
//! Field changes (archive, labels, snooze, progress) are never reverted when
//! the server call fails. Deletions and creations stay pending and are
//! retried by the next flush.
//!
//! Server calls for one entity run one at a time, in the order their local
//! writes were applied. Calls for different entities run concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use url::Url;

use super::status::SyncTracker;
use crate::error::{SyncError, SyncResult};
use crate::events::NoticeKind;
use crate::models::{Item, ItemId, Label, LabelId, SyncStatus};
use crate::storage::{EntityStoreExt, StoreWriter};

/// A user intent against the library
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Archive { item_id: ItemId, archived: bool },
    Delete { item_id: ItemId },
    AddLabel { item_id: ItemId, label_id: LabelId },
    RemoveLabel { item_id: ItemId, label_id: LabelId },
    /// Replace the item's whole label set
    SetLabels { item_id: ItemId, label_ids: Vec<LabelId> },
    Snooze { item_id: ItemId, until: DateTime<Utc> },
    UpdateReadingProgress { item_id: ItemId, percent: f64, anchor_index: i64 },
    /// Save a url under a client-generated id
    SaveItem { client_id: ItemId, url: String },
    CreateLabel {
        client_id: LabelId,
        name: String,
        color: String,
        description: Option<String>,
    },
    DeleteLabel { label_id: LabelId },
}

impl Mutation {
    /// Save `url` under a freshly generated client id
    pub fn save_url(url: impl Into<String>) -> Self {
        Mutation::SaveItem {
            client_id: ItemId::generate(),
            url: url.into(),
        }
    }

    /// Create a label under a freshly generated client id
    pub fn create_label(
        name: impl Into<String>,
        color: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Mutation::CreateLabel {
            client_id: LabelId::generate(),
            name: name.into(),
            color: color.into(),
            description,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Mutation::Archive { .. } => "archive",
            Mutation::Delete { .. } => "delete",
            Mutation::AddLabel { .. } => "add_label",
            Mutation::RemoveLabel { .. } => "remove_label",
            Mutation::SetLabels { .. } => "set_labels",
            Mutation::Snooze { .. } => "snooze",
            Mutation::UpdateReadingProgress { .. } => "update_reading_progress",
            Mutation::SaveItem { .. } => "save_item",
            Mutation::CreateLabel { .. } => "create_label",
            Mutation::DeleteLabel { .. } => "delete_label",
        }
    }

    /// Id of the entity the mutation targets
    pub fn entity_id(&self) -> &str {
        match self {
            Mutation::Archive { item_id, .. }
            | Mutation::Delete { item_id }
            | Mutation::AddLabel { item_id, .. }
            | Mutation::RemoveLabel { item_id, .. }
            | Mutation::SetLabels { item_id, .. }
            | Mutation::Snooze { item_id, .. }
            | Mutation::UpdateReadingProgress { item_id, .. } => item_id.as_str(),
            Mutation::SaveItem { client_id, .. } => client_id.as_str(),
            Mutation::CreateLabel { client_id, .. } => client_id.as_str(),
            Mutation::DeleteLabel { label_id } => label_id.as_str(),
        }
    }

    /// Rewrite ids that were adopted under server ids
    fn resolved(self, tracker: &SyncTracker) -> Self {
        let item = |id: ItemId| tracker.resolve_item(&id);
        let label = |id: LabelId| tracker.resolve_label(&id);
        match self {
            Mutation::Archive { item_id, archived } => Mutation::Archive {
                item_id: item(item_id),
                archived,
            },
            Mutation::Delete { item_id } => Mutation::Delete {
                item_id: item(item_id),
            },
            Mutation::AddLabel { item_id, label_id } => Mutation::AddLabel {
                item_id: item(item_id),
                label_id: label(label_id),
            },
            Mutation::RemoveLabel { item_id, label_id } => Mutation::RemoveLabel {
                item_id: item(item_id),
                label_id: label(label_id),
            },
            Mutation::SetLabels { item_id, label_ids } => Mutation::SetLabels {
                item_id: item(item_id),
                label_ids: label_ids.into_iter().map(label).collect(),
            },
            Mutation::Snooze { item_id, until } => Mutation::Snooze {
                item_id: item(item_id),
                until,
            },
            Mutation::UpdateReadingProgress {
                item_id,
                percent,
                anchor_index,
            } => Mutation::UpdateReadingProgress {
                item_id: item(item_id),
                percent,
                anchor_index,
            },
            Mutation::DeleteLabel { label_id } => Mutation::DeleteLabel {
                label_id: label(label_id),
            },
            creation @ (Mutation::SaveItem { .. } | Mutation::CreateLabel { .. }) => creation,
        }
    }
}

/// How a mutation ended once the server answered (or was not needed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The server accepted the change and the store agrees with it
    Confirmed,
    /// No server call was needed
    LocalOnly,
    /// The server call failed; the row stays pending for the next flush
    Retained { message: String },
    /// The server call failed; the local change stands unconfirmed
    Failed { message: String },
}

/// Awaitable result of a queued mutation
///
/// Dropping the handle does not cancel reconciliation.
#[derive(Debug)]
pub struct MutationHandle {
    sequence: u64,
    operation: &'static str,
    receiver: Option<oneshot::Receiver<ReconcileOutcome>>,
    immediate: Option<ReconcileOutcome>,
}

impl MutationHandle {
    fn pending(sequence: u64, operation: &'static str, receiver: oneshot::Receiver<ReconcileOutcome>) -> Self {
        Self {
            sequence,
            operation,
            receiver: Some(receiver),
            immediate: None,
        }
    }

    fn settled_now(sequence: u64, operation: &'static str, outcome: ReconcileOutcome) -> Self {
        Self {
            sequence,
            operation,
            receiver: None,
            immediate: Some(outcome),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Wait for reconciliation to finish
    pub async fn settled(self) -> ReconcileOutcome {
        if let Some(outcome) = self.immediate {
            return outcome;
        }
        match self.receiver {
            Some(receiver) => receiver.await.unwrap_or_else(|_| ReconcileOutcome::Failed {
                message: "reconciliation task ended without a result".to_string(),
            }),
            None => ReconcileOutcome::LocalOnly,
        }
    }
}

/// A server call derived from a locally applied mutation
#[derive(Debug, Clone)]
enum RemoteCall {
    Archive(ItemId, bool),
    DeleteItem(ItemId),
    SetLabels(ItemId, Vec<LabelId>),
    Snooze(ItemId, DateTime<Utc>),
    Progress(ItemId, f64, i64),
    SaveItem(ItemId, String),
    CreateLabel(Label),
    DeleteLabel(LabelId),
}

impl RemoteCall {
    /// User-visible message when the call fails
    fn failure_message(&self) -> &'static str {
        match self {
            RemoteCall::Archive(_, true) => "Failed to archive link",
            RemoteCall::Archive(_, false) => "Failed to move link to Inbox",
            RemoteCall::DeleteItem(_) => "Failed to remove link",
            RemoteCall::SetLabels(..) => "Failed to update labels",
            RemoteCall::Snooze(..) => "Failed to snooze",
            RemoteCall::Progress(..) => "Failed to save reading progress",
            RemoteCall::SaveItem(..) => "Failed to save link",
            RemoteCall::CreateLabel(_) => "Failed to create label",
            RemoteCall::DeleteLabel(_) => "Failed to delete label",
        }
    }

    /// Key of the per-entity lane this call is sent on
    fn lane(&self) -> String {
        match self {
            RemoteCall::Archive(id, _)
            | RemoteCall::DeleteItem(id)
            | RemoteCall::SetLabels(id, _)
            | RemoteCall::Snooze(id, _)
            | RemoteCall::Progress(id, ..)
            | RemoteCall::SaveItem(id, _) => format!("item:{}", id),
            RemoteCall::CreateLabel(label) => format!("label:{}", label.id),
            RemoteCall::DeleteLabel(id) => format!("label:{}", id),
        }
    }

    /// Deletions and creations are retried by the flush
    fn is_retained(&self) -> bool {
        matches!(
            self,
            RemoteCall::DeleteItem(_)
                | RemoteCall::SaveItem(..)
                | RemoteCall::CreateLabel(_)
                | RemoteCall::DeleteLabel(_)
        )
    }
}

/// Result of the local transaction
enum LocalStep {
    Missing { entity: &'static str, id: String },
    /// Rejected without touching the store
    Invalid(String),
    /// Applied; nothing to send
    Done,
    /// Applied; send this call
    Send(RemoteCall),
}

fn missing_item(id: &ItemId) -> LocalStep {
    LocalStep::Missing {
        entity: "item",
        id: id.to_string(),
    }
}

fn missing_label(id: &LabelId) -> LocalStep {
    LocalStep::Missing {
        entity: "label",
        id: id.to_string(),
    }
}

/// Load an item that is visible to the user
fn visible_item(writer: &dyn StoreWriter, id: &ItemId) -> anyhow::Result<Option<Item>> {
    Ok(writer
        .get_item(id)?
        .filter(|item| item.sync_status.is_visible()))
}

/// Store an item change and decide whether the server needs to hear about it
///
/// Items still pending creation are unknown to the server; their fields are
/// pushed once the creation is confirmed.
fn store_field_change(writer: &mut dyn StoreWriter, item: Item, call: RemoteCall) -> anyhow::Result<LocalStep> {
    let pending_creation = item.sync_status == SyncStatus::NeedsCreation;
    writer.upsert_item(item)?;
    Ok(if pending_creation {
        LocalStep::Done
    } else {
        LocalStep::Send(call)
    })
}

fn apply_local(writer: &mut dyn StoreWriter, mutation: &Mutation) -> anyhow::Result<LocalStep> {
    match mutation {
        Mutation::Archive { item_id, archived } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            item.archived = *archived;
            store_field_change(writer, item, RemoteCall::Archive(item_id.clone(), *archived))
        }

        Mutation::Delete { item_id } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            if item.sync_status == SyncStatus::NeedsCreation {
                // Never reached the server: drop it outright
                for highlight in writer.highlights_for_item(item_id)? {
                    writer.delete_highlight(&highlight.id)?;
                }
                writer.delete_item(item_id)?;
                return Ok(LocalStep::Done);
            }
            item.sync_status = SyncStatus::NeedsDeletion;
            writer.upsert_item(item)?;
            Ok(LocalStep::Send(RemoteCall::DeleteItem(item_id.clone())))
        }

        Mutation::AddLabel { item_id, label_id } | Mutation::RemoveLabel { item_id, label_id } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            let changed = if matches!(mutation, Mutation::AddLabel { .. }) {
                match writer.get_label(label_id)? {
                    Some(label) if label.sync_status.is_visible() => item.add_label(label_id.clone()),
                    _ => return Ok(missing_label(label_id)),
                }
            } else {
                item.remove_label(label_id)
            };
            if !changed {
                return Ok(LocalStep::Done);
            }
            let labels = item.label_ids.clone();
            store_field_change(writer, item, RemoteCall::SetLabels(item_id.clone(), labels))
        }

        Mutation::SetLabels { item_id, label_ids } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            for label_id in label_ids {
                match writer.get_label(label_id)? {
                    Some(label) if label.sync_status.is_visible() => {}
                    _ => return Ok(missing_label(label_id)),
                }
            }
            item.set_labels(label_ids.clone());
            let labels = item.label_ids.clone();
            store_field_change(writer, item, RemoteCall::SetLabels(item_id.clone(), labels))
        }

        Mutation::Snooze { item_id, until } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            item.snoozed_until = Some(*until);
            store_field_change(writer, item, RemoteCall::Snooze(item_id.clone(), *until))
        }

        Mutation::UpdateReadingProgress {
            item_id,
            percent,
            anchor_index,
        } => {
            let Some(mut item) = visible_item(writer, item_id)? else {
                return Ok(missing_item(item_id));
            };
            item.set_reading_progress(*percent, *anchor_index);
            let call = RemoteCall::Progress(
                item_id.clone(),
                item.reading_progress,
                item.reading_progress_anchor,
            );
            store_field_change(writer, item, call)
        }

        Mutation::SaveItem { client_id, url } => {
            if writer.get_item(client_id)?.is_some() {
                return Ok(LocalStep::Invalid(format!("item {} already exists", client_id)));
            }
            let item = Item::builder(client_id.clone(), url.clone())
                .sync_status(SyncStatus::NeedsCreation)
                .build();
            writer.upsert_item(item)?;
            Ok(LocalStep::Send(RemoteCall::SaveItem(client_id.clone(), url.clone())))
        }

        Mutation::CreateLabel {
            client_id,
            name,
            color,
            description,
        } => {
            // Lookup-by-name in the same transaction keeps names unique
            if let Some(existing) = writer.find_label_by_name(name)? {
                if existing.sync_status == SyncStatus::NeedsDeletion {
                    return Ok(LocalStep::Invalid(format!(
                        "label {:?} is still being deleted",
                        name
                    )));
                }
                debug!("Label {:?} already exists as {}", name, existing.id);
                return Ok(LocalStep::Done);
            }
            let mut label = Label::new(client_id.clone(), name.clone(), color.clone())
                .with_sync_status(SyncStatus::NeedsCreation);
            label.description = description.clone();
            writer.upsert_label(label.clone())?;
            Ok(LocalStep::Send(RemoteCall::CreateLabel(label)))
        }

        Mutation::DeleteLabel { label_id } => {
            let label = match writer.get_label(label_id)? {
                Some(label) if label.sync_status.is_visible() => label,
                _ => return Ok(missing_label(label_id)),
            };
            if label.sync_status == SyncStatus::NeedsCreation {
                writer.delete_label(label_id)?;
                return Ok(LocalStep::Done);
            }
            for mut item in writer.items_with_label(label_id)? {
                item.remove_label(label_id);
                writer.upsert_item(item)?;
            }
            writer.upsert_label(label.with_sync_status(SyncStatus::NeedsDeletion))?;
            Ok(LocalStep::Send(RemoteCall::DeleteLabel(label_id.clone())))
        }
    }
}

/// A server call waiting in its entity's lane
struct Job {
    call: RemoteCall,
    /// Published as an info notice once the server confirms
    notice: Option<String>,
    reply: oneshot::Sender<ReconcileOutcome>,
}

/// Pending calls per entity; an entry exists while its lane has a worker
type Lanes = Arc<Mutex<HashMap<String, VecDeque<Job>>>>;

fn lock_lanes(lanes: &Lanes) -> MutexGuard<'_, HashMap<String, VecDeque<Job>>> {
    lanes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes user intents into optimistic local writes plus background
/// server calls
pub struct MutationQueue {
    tracker: Arc<SyncTracker>,
    runtime: Handle,
    sequence: AtomicU64,
    lanes: Lanes,
}

impl MutationQueue {
    pub fn new(tracker: Arc<SyncTracker>, runtime: Handle) -> Self {
        Self {
            tracker,
            runtime,
            sequence: AtomicU64::new(0),
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply a mutation locally and queue its server call
    ///
    /// Returns once the local transaction has committed. A local store
    /// failure rolls the transaction back and no server call is made.
    pub fn apply(&self, mutation: Mutation) -> SyncResult<MutationHandle> {
        self.submit(mutation, None)
    }

    /// Like [`apply`](Self::apply), publishing `notice` once the server
    /// confirms the change (or right away when no server call is needed)
    pub fn apply_with_notice(
        &self,
        mutation: Mutation,
        notice: impl Into<String>,
    ) -> SyncResult<MutationHandle> {
        self.submit(mutation, Some(notice.into()))
    }

    fn submit(&self, mutation: Mutation, notice: Option<String>) -> SyncResult<MutationHandle> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mutation = mutation.resolved(&self.tracker);
        let operation = mutation.operation();
        debug!("Applying {} #{} to {}", operation, sequence, mutation.entity_id());

        if let Mutation::SaveItem { url, client_id } = &mutation {
            Url::parse(url).map_err(|e| {
                SyncError::Validation(format!("item {} has invalid url {:?}: {}", client_id, url, e))
            })?;
        }

        let step = self
            .tracker
            .store()
            .write(|writer| apply_local(writer, &mutation))
            .map_err(|e| {
                error!(
                    "Local {} failed for {}: {:#}",
                    operation,
                    mutation.entity_id(),
                    e
                );
                SyncError::LocalStore(e)
            })?;

        let call = match step {
            LocalStep::Missing { entity, id } => return Err(SyncError::NotFound { entity, id }),
            LocalStep::Invalid(reason) => {
                warn!("Rejected {} for {}: {}", operation, mutation.entity_id(), reason);
                return Err(SyncError::Validation(reason));
            }
            LocalStep::Done => None,
            LocalStep::Send(call) => Some(call),
        };

        if let Mutation::Delete { item_id } = &mutation {
            self.tracker.tombstone(item_id);
        }

        let Some(call) = call else {
            if let Some(notice) = notice {
                self.tracker.events().notify(notice, NoticeKind::Info);
            }
            return Ok(MutationHandle::settled_now(
                sequence,
                operation,
                ReconcileOutcome::LocalOnly,
            ));
        };

        let (reply, receiver) = oneshot::channel();
        self.enqueue(Job {
            call,
            notice,
            reply,
        });
        Ok(MutationHandle::pending(sequence, operation, receiver))
    }

    /// Append a job to its lane, starting a worker if the lane is idle
    fn enqueue(&self, job: Job) {
        let lane = job.call.lane();
        {
            let mut lanes = lock_lanes(&self.lanes);
            if let Some(queue) = lanes.get_mut(&lane) {
                debug!("{} waits behind {} queued call(s)", lane, queue.len());
                queue.push_back(job);
                return;
            }
            lanes.insert(lane.clone(), VecDeque::from([job]));
        }

        self.runtime
            .spawn(drain_lane(self.tracker.clone(), self.lanes.clone(), lane));
    }
}

/// Run a lane's jobs in order; the lane is retired once it is empty
async fn drain_lane(tracker: Arc<SyncTracker>, lanes: Lanes, lane: String) {
    loop {
        let job = {
            let mut lanes = lock_lanes(&lanes);
            match lanes.get_mut(&lane).and_then(VecDeque::pop_front) {
                Some(job) => job,
                None => {
                    lanes.remove(&lane);
                    return;
                }
            }
        };

        let outcome = reconcile(&tracker, &job.call).await;
        if outcome == ReconcileOutcome::Confirmed
            && let Some(notice) = job.notice
        {
            tracker.events().notify(notice, NoticeKind::Info);
        }
        // The caller may have dropped the handle
        let _ = job.reply.send(outcome);
    }
}

/// Send one call and fold the answer into the store
async fn reconcile(tracker: &SyncTracker, call: &RemoteCall) -> ReconcileOutcome {
    let remote = tracker.remote();
    let result: SyncResult<()> = match call {
        RemoteCall::Archive(id, archived) => {
            tracker.call("archive_item", remote.archive_item(id, *archived)).await
        }
        RemoteCall::DeleteItem(id) => tracker.delete_remote_item(id).await,
        RemoteCall::SetLabels(id, labels) => tracker
            .call("set_item_labels", remote.set_item_labels(id, labels))
            .await
            .map(|_| ()),
        RemoteCall::Snooze(id, until) => {
            tracker.call("create_reminder", remote.create_reminder(id, *until)).await
        }
        RemoteCall::Progress(id, percent, anchor) => {
            tracker
                .call(
                    "update_reading_progress",
                    remote.update_reading_progress(id, *percent, *anchor),
                )
                .await
        }
        RemoteCall::SaveItem(id, url) => save_item(tracker, id, url).await,
        RemoteCall::CreateLabel(label) => {
            match tracker
                .call(
                    "create_label",
                    remote.create_label(
                        &label.id,
                        &label.name,
                        &label.color,
                        label.description.as_deref(),
                    ),
                )
                .await
            {
                Ok(created) => tracker.adopt_label(&label.id, created).await.map(|_| ()),
                Err(e) => Err(e),
            }
        }
        RemoteCall::DeleteLabel(id) => tracker.delete_remote_label(id).await,
    };

    match result {
        Ok(()) => ReconcileOutcome::Confirmed,
        Err(err) => {
            let message = call.failure_message();
            match &err {
                SyncError::LocalStore(_) => error!("{}: {}", message, err),
                _ => warn!("{}: {}", message, err),
            }
            tracker.events().notify(message, NoticeKind::Failure);
            if call.is_retained() && !matches!(err, SyncError::LocalStore(_)) {
                ReconcileOutcome::Retained {
                    message: err.to_string(),
                }
            } else {
                ReconcileOutcome::Failed {
                    message: err.to_string(),
                }
            }
        }
    }
}

async fn save_item(tracker: &SyncTracker, client_id: &ItemId, url: &str) -> SyncResult<()> {
    let saved = tracker
        .call("save_item", tracker.remote().save_item(client_id, url))
        .await?;
    if let Some(item) = tracker.adopt_item(client_id, saved).await? {
        info!("Saved {} as {}", url, item.id);
        tracker.push_item_fields(&item).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::events::{EventBus, LibraryEvent};
    use crate::models::Highlight;
    use crate::remote::InMemoryRemote;
    use crate::remote::api::RemoteItem;
    use crate::storage::{EntityStore, InMemoryEntityStore, StoreReader};

    struct Fixture {
        store: Arc<InMemoryEntityStore>,
        remote: Arc<InMemoryRemote>,
        tracker: Arc<SyncTracker>,
        events: EventBus,
        queue: MutationQueue,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEntityStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let events = EventBus::new(32);
        let tracker = Arc::new(SyncTracker::new(
            store.clone(),
            remote.clone(),
            events.clone(),
            Duration::from_secs(5),
        ));
        let queue = MutationQueue::new(tracker.clone(), Handle::current());
        Fixture {
            store,
            remote,
            tracker,
            events,
            queue,
        }
    }

    fn seed_item(store: &InMemoryEntityStore, id: &str) {
        store
            .write(|w| {
                w.upsert_item(
                    Item::builder(ItemId::new(id), format!("https://example.com/{}", id)).build(),
                )
            })
            .unwrap();
    }

    fn seed_remote(remote: &InMemoryRemote, ids: &[&str]) {
        remote.set_items(
            ids.iter()
                .map(|id| RemoteItem {
                    id: id.to_string(),
                    url: Some(format!("https://example.com/{}", id)),
                    ..Default::default()
                })
                .collect(),
        );
    }

    fn get_item(store: &InMemoryEntityStore, id: &str) -> Option<Item> {
        store.read(|r| r.get_item(&ItemId::new(id))).unwrap()
    }

    #[tokio::test]
    async fn test_archive_applies_before_remote_call() {
        let f = fixture();
        seed_item(&f.store, "i1");

        let handle = f
            .queue
            .apply(Mutation::Archive {
                item_id: ItemId::new("i1"),
                archived: true,
            })
            .unwrap();

        // Visible immediately, before reconciliation runs
        assert!(get_item(&f.store, "i1").unwrap().archived);
        assert_eq!(handle.settled().await, ReconcileOutcome::Confirmed);
        assert_eq!(f.remote.call_count("archive_item:i1"), 1);
    }

    #[tokio::test]
    async fn test_failed_field_change_is_not_reverted() {
        let f = fixture();
        seed_item(&f.store, "i1");
        f.remote.set_offline(true);
        let mut events = f.events.subscribe();

        let handle = f
            .queue
            .apply(Mutation::Snooze {
                item_id: ItemId::new("i1"),
                until: Utc::now() + chrono::Duration::days(1),
            })
            .unwrap();

        assert!(matches!(handle.settled().await, ReconcileOutcome::Failed { .. }));
        assert!(get_item(&f.store, "i1").unwrap().snoozed_until.is_some());

        match events.recv().await.unwrap() {
            LibraryEvent::Notification { message, kind } => {
                assert_eq!(message, "Failed to snooze");
                assert_eq!(kind, NoticeKind::Failure);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_hides_row_then_removes_on_success() {
        let f = fixture();
        seed_item(&f.store, "i1");

        let handle = f
            .queue
            .apply(Mutation::Delete {
                item_id: ItemId::new("i1"),
            })
            .unwrap();
        assert_eq!(
            get_item(&f.store, "i1").unwrap().sync_status,
            SyncStatus::NeedsDeletion
        );
        assert!(f.tracker.is_tombstoned(&ItemId::new("i1")));

        assert_eq!(handle.settled().await, ReconcileOutcome::Confirmed);
        assert!(get_item(&f.store, "i1").is_none());
    }

    #[tokio::test]
    async fn test_failed_delete_is_retained() {
        let f = fixture();
        seed_item(&f.store, "i1");
        f.remote.set_offline(true);

        let handle = f
            .queue
            .apply(Mutation::Delete {
                item_id: ItemId::new("i1"),
            })
            .unwrap();
        assert!(matches!(handle.settled().await, ReconcileOutcome::Retained { .. }));
        assert_eq!(
            get_item(&f.store, "i1").unwrap().sync_status,
            SyncStatus::NeedsDeletion
        );

        f.remote.set_offline(false);
        let stats = f.tracker.flush().await.unwrap();
        assert_eq!(stats.items_deleted, 1);
        assert!(get_item(&f.store, "i1").is_none());
    }

    #[tokio::test]
    async fn test_deleting_unsynced_item_skips_server() {
        let f = fixture();
        f.remote.set_offline(true);

        let save = Mutation::save_url("https://example.com/new");
        let Mutation::SaveItem { client_id, .. } = save.clone() else {
            unreachable!()
        };
        let handle = f.queue.apply(save).unwrap();
        assert!(matches!(handle.settled().await, ReconcileOutcome::Retained { .. }));

        f.store
            .write(|w| w.upsert_highlight(Highlight::new("h1", "s1", client_id.clone(), "q", "p")))
            .unwrap();

        let handle = f
            .queue
            .apply(Mutation::Delete {
                item_id: client_id.clone(),
            })
            .unwrap();
        assert_eq!(handle.settled().await, ReconcileOutcome::LocalOnly);
        assert!(f.store.read(|r| r.get_item(&client_id)).unwrap().is_none());
        assert!(f.store.read(|r| r.highlights_for_item(&client_id)).unwrap().is_empty());
        assert_eq!(f.remote.call_count("delete_item"), 0);
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let f = fixture();
        let result = f.queue.apply(Mutation::Archive {
            item_id: ItemId::new("missing"),
            archived: true,
        });
        assert!(matches!(result, Err(SyncError::NotFound { entity: "item", .. })));
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_store() {
        let f = fixture();
        let result = f.queue.apply(Mutation::save_url("not a url"));
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert!(f.tracker.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_label_reuses_existing_name() {
        let f = fixture();
        f.store
            .write(|w| w.upsert_label(Label::new("l1", "news", "#fff")))
            .unwrap();

        let handle = f
            .queue
            .apply(Mutation::create_label("news", "#000", None))
            .unwrap();
        assert_eq!(handle.settled().await, ReconcileOutcome::LocalOnly);
        assert_eq!(f.store.read(|r| r.list_labels()).unwrap().len(), 1);
        assert_eq!(f.remote.call_count("create_label"), 0);
    }

    #[tokio::test]
    async fn test_label_add_sends_full_label_set() {
        let f = fixture();
        seed_item(&f.store, "i1");
        f.store
            .write(|w| {
                w.upsert_label(Label::new("l1", "news", "#fff"))?;
                w.upsert_label(Label::new("l2", "tech", "#fff"))
            })
            .unwrap();

        for label in ["l1", "l2"] {
            let handle = f
                .queue
                .apply(Mutation::AddLabel {
                    item_id: ItemId::new("i1"),
                    label_id: LabelId::new(label),
                })
                .unwrap();
            assert_eq!(handle.settled().await, ReconcileOutcome::Confirmed);
        }

        let item = get_item(&f.store, "i1").unwrap();
        assert_eq!(item.label_ids, vec![LabelId::new("l1"), LabelId::new("l2")]);
        assert_eq!(f.remote.call_count("set_item_labels:i1"), 2);

        // Adding again changes nothing and sends nothing
        let handle = f
            .queue
            .apply(Mutation::AddLabel {
                item_id: ItemId::new("i1"),
                label_id: LabelId::new("l1"),
            })
            .unwrap();
        assert_eq!(handle.settled().await, ReconcileOutcome::LocalOnly);
        assert_eq!(f.remote.call_count("set_item_labels:i1"), 2);
    }

    #[tokio::test]
    async fn test_delete_label_strips_references_immediately() {
        let f = fixture();
        f.store
            .write(|w| {
                w.upsert_label(Label::new("l1", "news", "#fff"))?;
                w.upsert_item(
                    Item::builder(ItemId::new("i1"), "https://example.com/1")
                        .label_ids(vec![LabelId::new("l1")])
                        .build(),
                )
            })
            .unwrap();
        f.remote.set_offline(true);

        let handle = f
            .queue
            .apply(Mutation::DeleteLabel {
                label_id: LabelId::new("l1"),
            })
            .unwrap();
        assert!(get_item(&f.store, "i1").unwrap().label_ids.is_empty());
        assert!(matches!(handle.settled().await, ReconcileOutcome::Retained { .. }));
        assert_eq!(f.tracker.pending().unwrap().labels_to_delete, 1);
    }

    struct FailingStore;

    impl EntityStore for FailingStore {
        fn read_txn(
            &self,
            _body: &mut dyn FnMut(&dyn StoreReader) -> anyhow::Result<()>,
        ) -> anyhow::Result<()> {
            anyhow::bail!("disk I/O error")
        }

        fn write_txn(
            &self,
            _body: &mut dyn FnMut(&mut dyn StoreWriter) -> anyhow::Result<()>,
        ) -> anyhow::Result<()> {
            anyhow::bail!("disk I/O error")
        }
    }

    #[tokio::test]
    async fn test_local_store_failure_is_fatal() {
        let remote = Arc::new(InMemoryRemote::new());
        let tracker = Arc::new(SyncTracker::new(
            Arc::new(FailingStore),
            remote.clone(),
            EventBus::new(4),
            Duration::from_secs(5),
        ));
        let queue = MutationQueue::new(tracker, Handle::current());

        let result = queue.apply(Mutation::Archive {
            item_id: ItemId::new("i1"),
            archived: true,
        });
        assert!(matches!(result, Err(SyncError::LocalStore(_))));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_for_one_item_reach_server_in_order() {
        let f = fixture();
        seed_item(&f.store, "i1");
        seed_remote(&f.remote, &["i1"]);
        f.remote.delay_next("archive_item", Duration::from_millis(200));

        let archive = f
            .queue
            .apply(Mutation::Archive {
                item_id: ItemId::new("i1"),
                archived: true,
            })
            .unwrap();
        let unarchive = f
            .queue
            .apply(Mutation::Archive {
                item_id: ItemId::new("i1"),
                archived: false,
            })
            .unwrap();
        assert!(!get_item(&f.store, "i1").unwrap().archived);

        // The later intent waits for the slow earlier one
        assert_eq!(unarchive.settled().await, ReconcileOutcome::Confirmed);
        assert_eq!(archive.settled().await, ReconcileOutcome::Confirmed);
        assert_eq!(f.remote.item("i1").unwrap().is_archived, Some(false));
        assert_eq!(f.remote.call_count("archive_item:i1"), 2);

        // Idle lanes are retired
        assert!(lock_lanes(&f.queue.lanes).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_does_not_hold_back_other_items() {
        let f = fixture();
        seed_item(&f.store, "i1");
        seed_item(&f.store, "i2");
        seed_remote(&f.remote, &["i1", "i2"]);
        f.remote.delay_next("archive_item", Duration::from_millis(200));
        let start = tokio::time::Instant::now();

        let slow = f
            .queue
            .apply(Mutation::Archive {
                item_id: ItemId::new("i1"),
                archived: true,
            })
            .unwrap();
        let fast = f
            .queue
            .apply(Mutation::Archive {
                item_id: ItemId::new("i2"),
                archived: true,
            })
            .unwrap();

        assert_eq!(fast.settled().await, ReconcileOutcome::Confirmed);
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(slow.settled().await, ReconcileOutcome::Confirmed);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_confirmation_notice_waits_for_server() {
        let f = fixture();
        seed_item(&f.store, "i1");
        let mut events = f.events.subscribe();
        f.remote.set_offline(true);

        let handle = f
            .queue
            .apply_with_notice(
                Mutation::Snooze {
                    item_id: ItemId::new("i1"),
                    until: Utc::now() + chrono::Duration::hours(3),
                },
                "Snoozed",
            )
            .unwrap();
        assert!(events.try_recv().is_err());
        assert!(matches!(handle.settled().await, ReconcileOutcome::Failed { .. }));

        match events.try_recv().unwrap() {
            LibraryEvent::Notification { message, kind } => {
                assert_eq!(message, "Failed to snooze");
                assert_eq!(kind, NoticeKind::Failure);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());

        f.remote.set_offline(false);
        let handle = f
            .queue
            .apply_with_notice(
                Mutation::Snooze {
                    item_id: ItemId::new("i1"),
                    until: Utc::now() + chrono::Duration::hours(3),
                },
                "Snoozed",
            )
            .unwrap();
        assert_eq!(handle.settled().await, ReconcileOutcome::Confirmed);
        match events.try_recv().unwrap() {
            LibraryEvent::Notification { message, kind } => {
                assert_eq!(message, "Snoozed");
                assert_eq!(kind, NoticeKind::Info);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_client_id_is_rejected() {
        let f = fixture();
        seed_item(&f.store, "i1");

        let result = f.queue.apply(Mutation::SaveItem {
            client_id: ItemId::new("i1"),
            url: "https://example.com/other".to_string(),
        });

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(get_item(&f.store, "i1").unwrap().url, "https://example.com/i1");
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recreating_label_being_deleted_is_rejected() {
        let f = fixture();
        f.store
            .write(|w| {
                w.upsert_label(
                    Label::new("l1", "news", "#FFFFFF").with_sync_status(SyncStatus::NeedsDeletion),
                )
            })
            .unwrap();

        let result = f
            .queue
            .apply(Mutation::create_label("news", "#000000", None));

        assert!(matches!(result, Err(SyncError::Validation(_))));
        let label = f.store.read(|r| r.find_label_by_name("news")).unwrap().unwrap();
        assert_eq!(label.id.as_str(), "l1");
        assert!(f.remote.calls().is_empty());
    }
}
