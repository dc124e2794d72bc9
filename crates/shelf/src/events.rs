//! Library events published to the presentation layer

use log::debug;
use tokio::sync::broadcast;

use crate::models::{Item, ItemId, Label, LabelId};

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Confirmation of a user action ("Link archived")
    Info,
    /// A background operation failed
    Failure,
}

/// Events observed by the presentation layer
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    /// The visible collection was replaced or extended
    ItemsChanged(Vec<Item>),
    LoadingChanged(bool),
    Notification { message: String, kind: NoticeKind },
    /// A locally created item was confirmed under a server id
    ItemAdopted { local_id: ItemId, item: Item },
    /// A locally created label was confirmed under a server id
    LabelAdopted { local_id: LabelId, label: Label },
}

/// Broadcast fan-out of [`LibraryEvent`]s
///
/// Publishing never blocks and never fails; with no subscribers the event
/// is dropped. Slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LibraryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LibraryEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers; event dropped");
        }
    }

    /// Publish a user-visible notice
    pub fn notify(&self, message: impl Into<String>, kind: NoticeKind) {
        self.publish(LibraryEvent::Notification {
            message: message.into(),
            kind,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
