use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use platesync_shared::constants::MAX_MESSAGE_LEN;
use platesync_shared::models::{ChatMessage, ChatThread, ReadMarker};
use platesync_shared::normalize::{
    normalize_list, normalize_message, normalize_read_marker, normalize_thread, Record,
};
use platesync_shared::types::{CarId, ChatId, MessageId, ParticipantPair};

use crate::api;
use crate::client::{entity, report_skipped, SyncClient};
use crate::error::SyncError;
use crate::events::StateChange;
use crate::optimistic::MarkThreadRead;

const CHAT_LIST_KEYS: &[&str] = &["chats", "threads", "data", "items", "results"];
const MESSAGE_LIST_KEYS: &[&str] = &["messages", "data", "items", "results"];

/// The message shown as "seen": the most recent message sent by `me`,
/// provided the other side's read position has reached it.
pub fn compute_seen(
    messages: &[ChatMessage],
    me: CarId,
    other_last_read_at: Option<DateTime<Utc>>,
) -> Option<MessageId> {
    let last_mine = messages.iter().rev().find(|m| m.sender_car_id == me)?;
    match other_last_read_at {
        Some(read_at) if read_at >= last_mine.created_at => Some(last_mine.id),
        _ => None,
    }
}

enum Opening {
    Existing(ChatId),
    Pending(ChatId),
}

fn thread_entity(body: &Value) -> &Value {
    match body.get("thread") {
        Some(inner) if inner.is_object() => inner,
        _ => entity(body, "chat"),
    }
}

impl SyncClient {
    /// Reload the inbox for the active car.
    pub async fn refresh_inbox(&self) -> Result<Vec<ChatThread>, SyncError> {
        let (token, car) = self.acting()?;
        let body = self
            .call(api::list_chats(car).with_token(token.clone()))
            .await?;
        let (threads, skipped) =
            normalize_list(&body, CHAT_LIST_KEYS, |v| normalize_thread(v, Some(car)));
        report_skipped("thread", &skipped);

        let threads = self.with_state_as(&token, car, |state| {
            state.stores.threads.replace_all(threads);
            state.stores.threads.list().into_iter().cloned().collect()
        })?;
        self.emit(StateChange::Inbox);
        Ok(threads)
    }

    /// Inbox, most recently active first.
    pub fn threads(&self) -> Vec<ChatThread> {
        self.read(|stores| stores.threads.list().into_iter().cloned().collect())
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.read(|stores| stores.messages.active_chat())
    }

    /// Messages of the open chat, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read(|stores| stores.messages.list().to_vec())
    }

    /// Open the conversation with `other`, creating it if needed, and make
    /// it the active chat.
    ///
    /// An existing thread for the pair is reused whichever car started it.
    /// Otherwise a pending placeholder is shown until the backend confirms;
    /// it is removed again if the backend refuses.
    pub async fn open_chat(&self, other: CarId) -> Result<ChatId, SyncError> {
        let (token, me) = self.acting()?;
        if other == me {
            return Err(SyncError::invalid("cannot open a chat with the active car"));
        }
        let pair = ParticipantPair::new(me, other);

        let opening = self.with_state(|state| match state.stores.threads.find_by_pair(pair) {
            Some(t) if !t.pending => Opening::Existing(t.id),
            Some(t) => Opening::Pending(t.id),
            None => {
                let id = state.next_local_chat_id();
                let other_car = state.stores.cars.summary(other);
                state.stores.threads.upsert(ChatThread {
                    id,
                    participants: pair,
                    last_message_text: None,
                    has_unread: false,
                    other_car,
                    updated_at: None,
                    pending: true,
                });
                Opening::Pending(id)
            }
        });

        let chat = match opening {
            Opening::Existing(id) => id,
            Opening::Pending(local) => {
                self.emit(StateChange::Inbox);
                match self.confirm_chat(&token, me, other, pair).await {
                    Ok(id) => id,
                    Err(e) => {
                        self.with_state(|state| state.stores.threads.remove(local));
                        self.emit(StateChange::Inbox);
                        return Err(e);
                    }
                }
            }
        };

        self.with_state(|state| state.stores.messages.activate(chat));
        self.load_messages(chat).await?;
        if let Err(e) = self.mark_chat_read(chat).await {
            warn!(chat = %chat, error = %e, "Could not mark chat read");
        }
        if let Err(e) = self.refresh_read_status(chat).await {
            warn!(chat = %chat, error = %e, "Could not fetch read status");
        }
        Ok(chat)
    }

    async fn confirm_chat(
        &self,
        token: &str,
        me: CarId,
        other: CarId,
        pair: ParticipantPair,
    ) -> Result<ChatId, SyncError> {
        let body = self
            .call(api::open_chat(me, other).with_token(token.to_string()))
            .await?;
        let raw = thread_entity(&body);

        let mut thread = match normalize_thread(raw, Some(me)) {
            Ok(thread) => thread,
            Err(_) => {
                // Some backends answer with just the id.
                let id = Record::new(raw)?.required_int("id", &["id", "chat_id", "chatId"])?;
                ChatThread {
                    id: ChatId(id),
                    participants: pair,
                    last_message_text: None,
                    has_unread: false,
                    other_car: None,
                    updated_at: None,
                    pending: false,
                }
            }
        };
        thread.participants = pair;
        thread.pending = false;

        let id = self.with_state_for(token, |state| {
            if thread.other_car.is_none() {
                thread.other_car = state.stores.cars.summary(other);
            }
            state.stores.threads.upsert(thread)
        })?;
        self.emit(StateChange::Inbox);
        info!(chat = %id, other = %other, "Chat opened");
        Ok(id)
    }

    /// Close the open chat. Pushes for it go back to touching the inbox only.
    pub fn leave_chat(&self) {
        let left = self.with_state(|state| {
            let chat = state.stores.messages.active_chat();
            state.stores.messages.deactivate();
            chat
        });
        if let Some(chat) = left {
            self.emit(StateChange::Messages(chat));
        }
    }

    /// Reload the messages of `chat`. Dropped if the chat was left meanwhile.
    pub async fn load_messages(&self, chat: ChatId) -> Result<Vec<ChatMessage>, SyncError> {
        let token = self.token()?;
        let body = self
            .call(api::list_messages(chat).with_token(token.clone()))
            .await?;
        let (messages, skipped) = normalize_list(&body, MESSAGE_LIST_KEYS, normalize_message);
        report_skipped("message", &skipped);

        let replaced = self.with_state_for(&token, |state| {
            state.stores.messages.replace(chat, messages.clone())
        })?;
        if replaced {
            self.emit(StateChange::Messages(chat));
        }
        Ok(messages)
    }

    /// Send `text` to the open chat.
    ///
    /// Returns the stored message, or `None` when the backend accepted it
    /// but answered with something unusable, in which case the chat is
    /// reloaded instead.
    pub async fn send_message(&self, text: &str) -> Result<Option<ChatMessage>, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::invalid("message is empty"));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(SyncError::invalid(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let (token, car) = self.acting()?;
        let chat = self
            .active_chat()
            .ok_or_else(|| SyncError::conflict("no chat is open"))?;
        if chat.is_local() {
            return Err(SyncError::conflict("chat is not confirmed yet"));
        }

        let body = self
            .call(api::send_message(chat, car, text).with_token(token.clone()))
            .await?;

        match normalize_message(entity(&body, "message")) {
            Ok(message) => {
                self.with_state_for(&token, |state| {
                    let stores = &mut state.stores;
                    stores
                        .threads
                        .touch(chat, &message.text, message.created_at, false);
                    // The realtime echo of this message may have won the race.
                    stores.messages.upsert(message.clone());
                })?;
                self.events
                    .emit_all([StateChange::Messages(chat), StateChange::Inbox]);
                Ok(Some(message))
            }
            Err(e) => {
                warn!(chat = %chat, error = %e, "Unusable send response, reloading chat");
                if let Err(e) = self.load_messages(chat).await {
                    warn!(chat = %chat, error = %e, "Reload after send failed");
                }
                Ok(None)
            }
        }
    }

    /// Clear a thread's unread flag, optimistically.
    pub async fn mark_chat_read(&self, chat: ChatId) -> Result<(), SyncError> {
        let (_, car) = self.acting()?;
        self.run_optimistic(MarkThreadRead { chat, car }).await
    }

    /// Fetch how far the other participant has read.
    pub async fn refresh_read_status(&self, chat: ChatId) -> Result<Option<ReadMarker>, SyncError> {
        let (token, car) = self.acting()?;
        let body = self
            .call(api::read_status(chat, car).with_token(token.clone()))
            .await?;
        let marker = normalize_read_marker(entity(&body, "status"), chat)?;

        let (moved, held) = self.with_state_as(&token, car, |state| {
            let moved = state.stores.markers.advance(marker);
            (moved, state.stores.markers.get(chat).cloned())
        })?;
        if moved {
            self.emit(StateChange::ReadMarker(chat));
        }
        Ok(held)
    }

    /// The message of the open chat to show as seen, if any.
    pub fn seen_message(&self) -> Option<MessageId> {
        self.with_state(|state| {
            let me = state.active_car()?;
            let chat = state.stores.messages.active_chat()?;
            let read_at = state
                .stores
                .markers
                .get(chat)
                .and_then(|m| m.other_last_read_at);
            compute_seen(state.stores.messages.list(), me, read_at)
        })
    }

    pub fn is_seen(&self, message: MessageId) -> bool {
        self.seen_message() == Some(message)
    }
}
