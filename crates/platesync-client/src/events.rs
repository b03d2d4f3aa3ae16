use serde::Serialize;
use tokio::sync::broadcast;

use platesync_shared::types::{CarId, ChatId, ConnectionMode, FeedKind, PostId};

use crate::state::SessionPhase;

/// Notification sent to observers after the stores changed.
///
/// Observers re-read whatever they display from the client; the change
/// only says what to look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum StateChange {
    Session(SessionPhase),
    ActiveCar(Option<CarId>),
    Connection(ConnectionMode),
    Feed(FeedKind),
    Post(PostId),
    PostRemoved(PostId),
    Comments(PostId),
    Inbox,
    Messages(ChatId),
    ReadMarker(ChatId),
    Notifications,
    Cars,
    CarProfile(CarId),
    /// Every store was emptied (logout).
    Cleared,
}

/// Fan-out of [`StateChange`]s to any number of observers.
#[derive(Debug, Clone)]
pub struct StateEvents {
    tx: broadcast::Sender<StateChange>,
}

impl StateEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }

    pub fn emit(&self, change: StateChange) {
        // No receiver is not an error: nothing is observing yet.
        if self.tx.send(change).is_err() {
            tracing::trace!("State change dropped, no observers");
        }
    }

    pub fn emit_all(&self, changes: impl IntoIterator<Item = StateChange>) {
        for change in changes {
            self.emit(change);
        }
    }
}
