//! Chat inbox.
//!
//! There is at most one thread per unordered pair of cars. Upserts look the
//! pair up first and only then fall back to the id, so a locally created
//! pending thread and the backend's confirmed thread for the same pair
//! collapse into one entry.

use chrono::{DateTime, Utc};
use tracing::debug;

use platesync_shared::models::ChatThread;
use platesync_shared::types::{ChatId, ParticipantPair};

#[derive(Debug, Default, Clone)]
pub struct ThreadStore {
    threads: Vec<ChatThread>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the inbox. Pending threads the server does not know about yet
    /// are kept.
    pub fn replace_all(&mut self, threads: Vec<ChatThread>) {
        let pending: Vec<ChatThread> = self
            .threads
            .drain(..)
            .filter(|t| t.pending && !threads.iter().any(|n| n.participants == t.participants))
            .collect();

        for thread in threads {
            self.upsert(thread);
        }
        self.threads.extend(pending);
    }

    /// Insert or merge a thread, returning the id the entry ends up with.
    pub fn upsert(&mut self, incoming: ChatThread) -> ChatId {
        let slot = self
            .threads
            .iter()
            .position(|t| t.participants == incoming.participants)
            .or_else(|| self.threads.iter().position(|t| t.id == incoming.id));

        let Some(idx) = slot else {
            let id = incoming.id;
            self.threads.push(incoming);
            return id;
        };

        let existing = &mut self.threads[idx];
        if incoming.pending && !existing.pending {
            // A confirmed thread is never downgraded by a local placeholder.
            return existing.id;
        }
        if existing.id != incoming.id {
            debug!(from = %existing.id, to = %incoming.id, "Thread id replaced");
        }

        existing.id = incoming.id;
        existing.participants = incoming.participants;
        existing.has_unread = incoming.has_unread;
        existing.pending = incoming.pending;
        if incoming.last_message_text.is_some() {
            existing.last_message_text = incoming.last_message_text;
        }
        if incoming.other_car.is_some() {
            existing.other_car = incoming.other_car;
        }
        if incoming.updated_at.is_some() {
            existing.updated_at = incoming.updated_at;
        }
        existing.id
    }

    pub fn update<F: FnOnce(&mut ChatThread)>(&mut self, id: ChatId, f: F) -> bool {
        match self.threads.iter_mut().find(|t| t.id == id) {
            Some(thread) => {
                f(thread);
                true
            }
            None => false,
        }
    }

    /// Record a new last message on a thread's summary.
    pub fn touch(
        &mut self,
        id: ChatId,
        text: &str,
        at: DateTime<Utc>,
        unread: bool,
    ) -> bool {
        self.update(id, |t| {
            t.last_message_text = Some(text.to_string());
            t.updated_at = Some(at);
            t.has_unread = unread;
        })
    }

    pub fn remove(&mut self, id: ChatId) -> Option<ChatThread> {
        let idx = self.threads.iter().position(|t| t.id == id)?;
        Some(self.threads.remove(idx))
    }

    pub fn get(&self, id: ChatId) -> Option<&ChatThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn find_by_pair(&self, pair: ParticipantPair) -> Option<&ChatThread> {
        self.threads.iter().find(|t| t.participants == pair)
    }

    /// Most recently active first; threads without activity last.
    pub fn list(&self) -> Vec<&ChatThread> {
        let mut out: Vec<&ChatThread> = self.threads.iter().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }

    pub fn unread_count(&self) -> usize {
        self.threads.iter().filter(|t| t.has_unread).count()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }
}
