//! Incremental loading of the visible item list
//!
//! The paginator owns the list the presentation layer shows: an opaque
//! server cursor, a loading flag and the visible items. Pages are fetched
//! through the remote client, checked against the [`SearchOrderingGuard`],
//! merged into the store and appended (or, on refresh, swapped in).
//!
//! State lives behind a std Mutex that is never held across an await.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::watch;

use super::labels::merge_remote_label;
use super::ordering::SearchOrderingGuard;
use super::status::SyncTracker;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::LibraryEvent;
use crate::models::{Item, ItemId, SyncStatus};
use crate::query::{SearchQuery, local_items};
use crate::remote::api::{FetchItemsRequest, ItemsPage};
use crate::remote::{NormalizedItem, normalize_item};
use crate::storage::{EntityStoreExt, StoreWriter};

/// What a load request ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A server page was merged
    Loaded { added: usize, has_more: bool },
    /// The server was unreachable; the list was rebuilt from the store
    LocalFallback { count: usize },
    /// An incremental load was already in flight
    Skipped,
    /// The prefetch threshold was not reached
    NotTriggered,
}

/// Lookahead prefetch rule
///
/// With `len` items visible, the trigger index is `len - window`; showing
/// an item at or past it loads the next page, as long as the list has not
/// grown `lookahead` items past the trigger.
pub fn should_prefetch(index: usize, len: usize, window: usize, lookahead: usize) -> bool {
    let threshold = len.saturating_sub(window);
    index >= threshold && len < threshold + lookahead
}

#[derive(Debug, Default)]
struct PageState {
    cursor: Option<String>,
    is_loading: bool,
    /// Sequence of the load that owns `is_loading`
    loading_sequence: Option<u64>,
    items: Vec<Item>,
    query: SearchQuery,
    guard: SearchOrderingGuard,
}

impl PageState {
    fn finish_loading(&mut self, sequence: u64) -> bool {
        if self.loading_sequence == Some(sequence) {
            self.is_loading = false;
            self.loading_sequence = None;
            true
        } else {
            false
        }
    }
}

/// Infinite-scroll loader for the home list
pub struct Paginator {
    tracker: Arc<SyncTracker>,
    config: SyncConfig,
    state: Mutex<PageState>,
    /// Bumped by every refresh; in-flight loads from older generations stop
    generation: watch::Sender<u64>,
}

impl Paginator {
    pub fn new(tracker: Arc<SyncTracker>, config: SyncConfig) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            tracker,
            config,
            state: Mutex::new(PageState::default()),
            generation,
        }
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the visible items
    pub fn items(&self) -> Vec<Item> {
        self.state().items.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    pub fn cursor(&self) -> Option<String> {
        self.state().cursor.clone()
    }

    pub fn query(&self) -> SearchQuery {
        self.state().query.clone()
    }

    /// Replace the search; takes effect on the next load
    pub fn set_query(&self, query: SearchQuery) {
        self.state().query = query;
    }

    /// Replace the search and refresh the list
    pub async fn search(&self, query: SearchQuery) -> SyncResult<LoadOutcome> {
        self.set_query(query);
        self.load_page(true).await
    }

    /// Insert a freshly saved item at the top of the list
    pub fn push_item(&self, item: Item) {
        let items = {
            let mut state = self.state();
            state.items.retain(|i| i.id != item.id);
            state.items.insert(0, item);
            state.items.clone()
        };
        self.publish_items(items);
    }

    /// Remove an item from the visible list; returns false if absent
    pub fn remove_item(&self, id: &ItemId) -> bool {
        let items = {
            let mut state = self.state();
            let before = state.items.len();
            state.items.retain(|i| &i.id != id);
            if state.items.len() == before {
                return false;
            }
            state.items.clone()
        };
        self.publish_items(items);
        true
    }

    /// Swap a visible item for its replacement (e.g. after id adoption)
    pub fn replace_item(&self, old_id: &ItemId, item: Item) -> bool {
        let items = {
            let mut state = self.state();
            let Some(slot) = state.items.iter_mut().find(|i| &i.id == old_id) else {
                return false;
            };
            *slot = item;
            state.items.clone()
        };
        self.publish_items(items);
        true
    }

    /// Called when the item at `item_id` becomes visible on screen
    ///
    /// Loads the next page when the item is within the prefetch window of
    /// the end of the list.
    pub async fn item_appeared(&self, item_id: &ItemId) -> SyncResult<LoadOutcome> {
        let trigger = {
            let state = self.state();
            if state.is_loading {
                return Ok(LoadOutcome::NotTriggered);
            }
            state
                .items
                .iter()
                .position(|i| &i.id == item_id)
                .is_some_and(|index| {
                    should_prefetch(
                        index,
                        state.items.len(),
                        self.config.prefetch_window,
                        self.config.prefetch_lookahead,
                    )
                })
        };

        if trigger {
            self.load_page(false).await
        } else {
            Ok(LoadOutcome::NotTriggered)
        }
    }

    /// Load the first page (refresh) or the next page
    ///
    /// A refresh discards the cursor and replaces the list, cancelling any
    /// load still in flight. An incremental load is dropped when another
    /// load is running. Responses that lost the ordering race come back as
    /// `SyncError::OrderingDiscarded`; superseded loads as
    /// `SyncError::Cancelled`.
    pub async fn load_page(&self, is_refresh: bool) -> SyncResult<LoadOutcome> {
        // Refreshes move the generation under the state lock
        let (sequence, generation, cursor, query) = {
            let mut state = self.state();
            if !is_refresh && state.is_loading {
                debug!("Incremental load dropped; another load is in flight");
                return Ok(LoadOutcome::Skipped);
            }
            let sequence = state.guard.issue();
            state.is_loading = true;
            state.loading_sequence = Some(sequence);
            let generation = if is_refresh {
                let mut current = 0;
                self.generation.send_modify(|g| {
                    *g += 1;
                    current = *g;
                });
                current
            } else {
                *self.generation.borrow()
            };
            let cursor = if is_refresh { None } else { state.cursor.clone() };
            (sequence, generation, cursor, state.query.clone())
        };

        self.tracker.events().publish(LibraryEvent::LoadingChanged(true));
        let result = self
            .run_load(sequence, generation, is_refresh, cursor, &query)
            .await;

        let still_loading = {
            let mut state = self.state();
            state.finish_loading(sequence);
            state.is_loading
        };
        if !still_loading {
            self.tracker.events().publish(LibraryEvent::LoadingChanged(false));
        }

        match &result {
            Err(e) if e.is_silent() => debug!("Load #{} dropped: {}", sequence, e),
            Err(e) => warn!("Load #{} failed: {}", sequence, e),
            Ok(outcome) => debug!("Load #{} finished: {:?}", sequence, outcome),
        }
        result
    }

    async fn run_load(
        &self,
        sequence: u64,
        generation: u64,
        is_refresh: bool,
        cursor: Option<String>,
        query: &SearchQuery,
    ) -> SyncResult<LoadOutcome> {
        if self.config.flush_before_fetch
            && let Err(e) = self.tracker.flush().await
        {
            warn!("Flush before fetch failed: {}", e);
        }

        let request = FetchItemsRequest {
            cursor,
            limit: self.config.page_size,
            query: query.remote_query(),
        };
        let remote = self.tracker.remote().clone();
        let mut cancelled = self.generation.subscribe();

        let fetched = tokio::select! {
            result = self.tracker.call("fetch_items", remote.fetch_items(request)) => result,
            _ = superseded(&mut cancelled, generation) => return Err(SyncError::Cancelled),
        };

        self.ensure_current(generation)?;

        match fetched {
            Ok(page) => self.apply_page(sequence, generation, is_refresh, page),
            Err(e) if e.is_transport() && query.term_is_empty() => {
                info!("Fetch failed ({}); falling back to local items", e);
                self.apply_local_fallback(sequence, generation, query)
            }
            Err(e) => {
                let state = self.state();
                if state.guard.is_stale(sequence) {
                    return Err(SyncError::OrderingDiscarded {
                        sequence,
                        accepted: state.guard.accepted(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Merge a fetched page into the store and the visible list
    fn apply_page(
        &self,
        sequence: u64,
        generation: u64,
        is_refresh: bool,
        page: ItemsPage,
    ) -> SyncResult<LoadOutcome> {
        let mut normalized = Vec::with_capacity(page.items.len());
        for remote in page.items {
            let id = remote.id.clone();
            match normalize_item(remote) {
                Ok(item) => normalized.push(item),
                Err(e) => warn!("Skipping item {} from page: {}", id, e),
            }
        }
        let tombstones = self.tracker.tombstones();

        let (items, added) = {
            let mut state = self.state();
            self.ensure_current(generation)?;
            state.guard.accept(sequence)?;

            let page_items = self
                .tracker
                .store()
                .write(|writer| merge_page(writer, normalized, &tombstones))?;

            let added = page_items.len();
            if is_refresh {
                state.items = page_items;
            } else {
                let known: HashSet<ItemId> = state.items.iter().map(|i| i.id.clone()).collect();
                state
                    .items
                    .extend(page_items.into_iter().filter(|i| !known.contains(&i.id)));
            }
            state.cursor = page.next_cursor.clone();
            (state.items.clone(), added)
        };

        self.publish_items(items);
        Ok(LoadOutcome::Loaded {
            added,
            has_more: page.next_cursor.is_some(),
        })
    }

    /// Rebuild the list from the store after a failed fetch
    fn apply_local_fallback(
        &self,
        sequence: u64,
        generation: u64,
        query: &SearchQuery,
    ) -> SyncResult<LoadOutcome> {
        let items = {
            let mut state = self.state();
            self.ensure_current(generation)?;
            state.guard.accept(sequence)?;
            let items = local_items(self.tracker.store().as_ref(), query)?;
            state.items = items;
            state.cursor = None;
            state.items.clone()
        };

        let count = items.len();
        self.publish_items(items);
        Ok(LoadOutcome::LocalFallback { count })
    }

    /// Fails with `Cancelled` once a newer refresh has started
    ///
    /// Callers hold the state lock, which is also where refreshes move the
    /// generation.
    fn ensure_current(&self, generation: u64) -> SyncResult<()> {
        if *self.generation.borrow() != generation {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn publish_items(&self, items: Vec<Item>) {
        self.tracker.events().publish(LibraryEvent::ItemsChanged(items));
    }
}

/// Resolves once a refresh newer than `generation` has started
async fn superseded(receiver: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        if *receiver.borrow_and_update() != generation {
            return;
        }
        if receiver.changed().await.is_err() {
            // Paginator dropped; nothing can supersede this load anymore
            std::future::pending::<()>().await;
        }
    }
}

/// Persist a page and return the items to show, in server order
///
/// Rows deleted in this session or pending deletion are never re-inserted.
/// Rows pending creation keep their local state. Everything else takes the
/// server's values.
fn merge_page(
    writer: &mut dyn StoreWriter,
    page: Vec<NormalizedItem>,
    tombstones: &HashSet<ItemId>,
) -> anyhow::Result<Vec<Item>> {
    let mut visible = Vec::with_capacity(page.len());

    for NormalizedItem { mut item, labels } in page {
        if tombstones.contains(&item.id) {
            continue;
        }

        let local = writer.get_item(&item.id)?;
        match local.as_ref().map(|l| l.sync_status) {
            Some(SyncStatus::NeedsDeletion) => continue,
            Some(SyncStatus::NeedsCreation) => {
                if let Some(local) = local {
                    visible.push(local);
                }
                continue;
            }
            _ => {}
        }

        let mut label_ids = Vec::with_capacity(labels.len());
        for label in labels {
            if let Some(id) = merge_remote_label(writer, label)? {
                label_ids.push(id);
            }
        }
        item.set_labels(label_ids);
        if let Some(local) = local {
            // Snoozing is client-side state the server does not report
            item.snoozed_until = local.snoozed_until;
        }

        writer.upsert_item(item.clone())?;
        visible.push(item);
    }

    Ok(visible)
}
