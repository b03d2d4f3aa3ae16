//! Read positions of the other participant, per chat.
//!
//! Markers come only from the server and never move backwards.

use std::collections::HashMap;

use platesync_shared::models::ReadMarker;
use platesync_shared::types::ChatId;

#[derive(Debug, Default, Clone)]
pub struct ReadMarkerStore {
    markers: HashMap<ChatId, ReadMarker>,
}

impl ReadMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `marker` if it is newer than what is held. Returns whether the
    /// stored position moved.
    pub fn advance(&mut self, marker: ReadMarker) -> bool {
        match self.markers.get_mut(&marker.chat_id) {
            Some(current) => match (current.other_last_read_at, marker.other_last_read_at) {
                (Some(held), Some(new)) if new > held => {
                    current.other_last_read_at = Some(new);
                    true
                }
                (None, Some(new)) => {
                    current.other_last_read_at = Some(new);
                    true
                }
                _ => false,
            },
            None => {
                self.markers.insert(marker.chat_id, marker);
                true
            }
        }
    }

    pub fn get(&self, chat: ChatId) -> Option<&ReadMarker> {
        self.markers.get(&chat)
    }

    pub fn remove(&mut self, chat: ChatId) -> Option<ReadMarker> {
        self.markers.remove(&chat)
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }
}
