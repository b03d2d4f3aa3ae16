//! Messages of the chat that is currently open.
//!
//! Only one chat is held in detail. The list is ordered by
//! `(created_at, id)` and only grows until the next full reload.

use std::collections::HashSet;

use tracing::debug;

use platesync_shared::models::ChatMessage;
use platesync_shared::types::{CarId, ChatId, MessageId};

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    active: Option<ChatId>,
    messages: Vec<ChatMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `chat` the open chat. Switching chats drops the previous list.
    pub fn activate(&mut self, chat: ChatId) {
        if self.active != Some(chat) {
            self.messages.clear();
        }
        self.active = Some(chat);
        debug!(chat = %chat, "Active chat set");
    }

    pub fn deactivate(&mut self) {
        if let Some(chat) = self.active.take() {
            debug!(chat = %chat, "Active chat cleared");
        }
        self.messages.clear();
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active
    }

    pub fn is_active(&self, chat: ChatId) -> bool {
        self.active == Some(chat)
    }

    /// Full reload of the open chat. Ignored if `chat` is no longer open.
    pub fn replace(&mut self, chat: ChatId, mut messages: Vec<ChatMessage>) -> bool {
        if !self.is_active(chat) {
            return false;
        }
        let mut seen = HashSet::new();
        messages.retain(|m| m.chat_id == chat && seen.insert(m.id));
        messages.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        self.messages = messages;
        true
    }

    /// Add one message. A message for another chat or one already present
    /// is a no-op; returns whether the list changed.
    pub fn upsert(&mut self, message: ChatMessage) -> bool {
        if !self.is_active(message.chat_id) || self.contains(message.id) {
            return false;
        }
        let key = (message.created_at, message.id);
        let pos = self
            .messages
            .iter()
            .rposition(|m| (m.created_at, m.id) < key)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages.insert(pos, message);
        true
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn list(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Most recent message sent by `car`.
    pub fn last_from(&self, car: CarId) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.sender_car_id == car)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
