//! Realtime bridge: drains the channel's event queue and reconciles each
//! push event into the stores, one at a time.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use platesync_net::{ChannelEvent, ChannelHandle};
use platesync_shared::models::ReadMarker;
use platesync_shared::normalize::normalize_thread;
use platesync_shared::protocol::PushEvent;
use platesync_shared::types::ConnectionMode;

use crate::client::SyncClient;
use crate::error::SyncError;
use crate::events::StateChange;
use crate::state::AppState;

/// The live realtime connection: the channel's stop handle plus the task
/// consuming its queue.
#[derive(Debug)]
pub(crate) struct RealtimeLink {
    handle: ChannelHandle,
    bridge: JoinHandle<()>,
}

impl RealtimeLink {
    fn shutdown(mut self) {
        self.handle.disconnect();
        self.bridge.abort();
    }
}

/// What a push event did to the stores.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Applied(Vec<StateChange>),
    /// Applied locally (if anything), and the inbox should be refetched.
    RefreshInbox(Vec<StateChange>),
    Ignored(&'static str),
}

impl SyncClient {
    /// Open the realtime channel for `token`, replacing any previous one.
    pub(crate) async fn connect_realtime(&self, token: &str) -> Result<(), SyncError> {
        self.disconnect_realtime();

        let channel = self.connector.connect(token).await?;
        let (handle, events) = channel.into_parts();

        // The session may have moved on while connecting.
        let current = self.with_state(|state| state.token().map(str::to_string));
        if current.as_deref() != Some(token) {
            info!("Token changed during realtime connect, discarding channel");
            drop(handle);
            return Ok(());
        }

        let bridge = tokio::spawn(bridge_loop(self.clone(), events));
        let previous = self
            .realtime
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(RealtimeLink { handle, bridge });
        if let Some(previous) = previous {
            previous.shutdown();
        }
        info!("Realtime channel connected");
        Ok(())
    }

    /// Tear down the realtime channel. Idempotent.
    pub(crate) fn disconnect_realtime(&self) {
        let link = self
            .realtime
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(link) = link {
            link.shutdown();
            debug!("Realtime link shut down");
        }
        let changed = self.with_state(|state| {
            let was = state.connection;
            state.connection = ConnectionMode::Disconnected;
            was != ConnectionMode::Disconnected
        });
        if changed {
            self.emit(StateChange::Connection(ConnectionMode::Disconnected));
        }
    }

    pub fn is_realtime_open(&self) -> bool {
        self.realtime
            .lock()
            .map(|link| link.is_some())
            .unwrap_or(false)
    }

    /// Process one channel event to completion.
    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected | ChannelEvent::Disconnected => {
                let mode = if event == ChannelEvent::Connected {
                    ConnectionMode::Connected
                } else {
                    ConnectionMode::Disconnected
                };
                self.with_state(|state| state.connection = mode);
                info!(?mode, "Realtime connection status changed");
                self.emit(StateChange::Connection(mode));
            }
            ChannelEvent::Push(push) => {
                let name = push.name();
                match self.apply_push(push) {
                    PushOutcome::Applied(changes) => self.events.emit_all(changes),
                    PushOutcome::RefreshInbox(changes) => {
                        self.events.emit_all(changes);
                        if let Err(e) = self.refresh_inbox().await {
                            warn!(event = name, error = %e, "Inbox refresh after push failed");
                        }
                    }
                    PushOutcome::Ignored(reason) => debug!(event = name, reason, "Push ignored"),
                }
            }
        }
    }

    /// Apply a push event to the stores. Never touches the network.
    pub fn apply_push(&self, event: PushEvent) -> PushOutcome {
        self.with_state(|state| {
            if state.session.is_none() {
                return PushOutcome::Ignored("no session");
            }
            apply_to_state(state, event)
        })
    }
}

fn apply_to_state(state: &mut AppState, event: PushEvent) -> PushOutcome {
    let me = state.active_car();
    let stores = &mut state.stores;

    match event {
        PushEvent::Message(message) => {
            let chat = message.chat_id;
            let from_other = Some(message.sender_car_id) != me;

            if stores.messages.is_active(chat) {
                let text = message.text.clone();
                let at = message.created_at;
                if !stores.messages.upsert(message) {
                    return PushOutcome::Ignored("duplicate message");
                }
                stores.threads.touch(chat, &text, at, false);
                PushOutcome::Applied(vec![StateChange::Messages(chat), StateChange::Inbox])
            } else {
                let mut changes = Vec::new();
                if stores
                    .threads
                    .touch(chat, &message.text, message.created_at, from_other)
                {
                    changes.push(StateChange::Inbox);
                }
                PushOutcome::RefreshInbox(changes)
            }
        }

        PushEvent::ThreadUpdated(raw) => match normalize_thread(&raw, me) {
            Ok(thread) if me.is_some_and(|me| thread.participants.contains(me)) => {
                stores.threads.upsert(thread);
                PushOutcome::Applied(vec![StateChange::Inbox])
            }
            Ok(thread) => {
                debug!(chat = %thread.id, "Dropping thread update for a car that is not active");
                PushOutcome::Ignored("active car is not a participant")
            }
            Err(e) => {
                warn!(error = %e, "Malformed thread update, refetching inbox");
                PushOutcome::RefreshInbox(Vec::new())
            }
        },

        PushEvent::PostLiked {
            post_id,
            likes_count,
            actor_car_id,
            liked,
        } => {
            let mine = actor_car_id.is_some() && actor_car_id == me;
            let updated = stores.posts.update(post_id, |post| {
                if let Some(count) = likes_count {
                    post.like_count = count;
                }
                if mine {
                    if let Some(liked) = liked {
                        post.liked_by_me = liked;
                    }
                }
            });
            if updated {
                PushOutcome::Applied(vec![StateChange::Post(post_id)])
            } else {
                PushOutcome::Ignored("post not loaded")
            }
        }

        PushEvent::PostCommented {
            post_id,
            comment,
            comments_count,
        } => {
            let loaded = stores.comments.is_loaded(post_id);
            let (added, fresh) = match comment {
                Some(comment) => {
                    let fresh = stores.comments.note_added(comment.id);
                    (stores.comments.upsert(comment) == Some(true), fresh)
                }
                None => (false, true),
            };
            let post_updated = stores.posts.update(post_id, |post| {
                match comments_count {
                    Some(count) => post.comment_count = count,
                    None if fresh && (added || !loaded) => {
                        post.comment_count = post.comment_count.saturating_add(1)
                    }
                    None => {}
                }
            });

            let mut changes = Vec::new();
            if added {
                changes.push(StateChange::Comments(post_id));
            }
            if post_updated {
                changes.push(StateChange::Post(post_id));
            }
            if changes.is_empty() {
                PushOutcome::Ignored("post not loaded")
            } else {
                PushOutcome::Applied(changes)
            }
        }

        PushEvent::CommentDeleted {
            post_id,
            comment_id,
            comments_count,
        } => {
            let fresh = stores.comments.note_removed(comment_id);
            let loaded = stores.comments.is_loaded(post_id);
            let removed = stores.comments.remove(post_id, comment_id).is_some();
            let post_updated = stores.posts.update(post_id, |post| {
                match comments_count {
                    Some(count) => post.comment_count = count,
                    None if fresh && (removed || !loaded) => {
                        post.comment_count = post.comment_count.saturating_sub(1)
                    }
                    None => {}
                }
            });

            let mut changes = Vec::new();
            if removed {
                changes.push(StateChange::Comments(post_id));
            }
            if post_updated {
                changes.push(StateChange::Post(post_id));
            }
            if changes.is_empty() {
                PushOutcome::Ignored("post not loaded")
            } else {
                PushOutcome::Applied(changes)
            }
        }

        PushEvent::ChatRead {
            chat_id,
            reader_car_id,
            read_at,
        } => {
            if reader_car_id.is_some() && reader_car_id == me {
                return PushOutcome::Ignored("own read receipt");
            }
            let moved = stores.markers.advance(ReadMarker {
                chat_id,
                other_last_read_at: Some(read_at),
            });
            if moved {
                PushOutcome::Applied(vec![StateChange::ReadMarker(chat_id)])
            } else {
                PushOutcome::Ignored("stale read receipt")
            }
        }

        PushEvent::Notification(notification) => {
            if Some(notification.recipient_car_id) != me {
                debug!(
                    recipient = %notification.recipient_car_id,
                    "Dropping notification for a car that is not active"
                );
                return PushOutcome::Ignored("recipient is not the active car");
            }
            stores.notifications.upsert(notification);
            PushOutcome::Applied(vec![StateChange::Notifications])
        }
    }
}

async fn bridge_loop(client: SyncClient, mut events: mpsc::Receiver<ChannelEvent>) {
    info!("Realtime bridge started");

    while let Some(event) = events.recv().await {
        client.handle_channel_event(event).await;
    }

    warn!("Realtime bridge ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::{TimeZone, Utc};
    use platesync_shared::models::{ChatMessage, Notification, NotificationKind};
    use platesync_shared::types::{CarId, ChatId, CommentId, FeedKind, MessageId, NotificationId, PostId};
    use serde_json::json;

    fn message(id: i64, chat: i64, sender: i64) -> ChatMessage {
        ChatMessage {
            id: MessageId(id),
            chat_id: ChatId(chat),
            sender_car_id: CarId(sender),
            text: "hello".into(),
            created_at: Utc.timestamp_opt(1_000 + id, 0).unwrap(),
        }
    }

    fn notification(id: i64, recipient: i64) -> Notification {
        Notification {
            id: NotificationId(id),
            kind: NotificationKind::Follow,
            actor_car_id: CarId(99),
            recipient_car_id: CarId(recipient),
            post_id: None,
            is_read: false,
            created_at: Utc.timestamp_opt(1_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_message_push_is_stored_once() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.threads.upsert(thread(55, 10, 20));
            s.stores.messages.activate(ChatId(55));
        });

        let first = h.client.apply_push(PushEvent::Message(message(9001, 55, 20)));
        assert!(matches!(first, PushOutcome::Applied(_)));
        let second = h.client.apply_push(PushEvent::Message(message(9001, 55, 20)));
        assert_eq!(second, PushOutcome::Ignored("duplicate message"));

        assert_eq!(h.client.read(|s| s.messages.len()), 1);
    }

    #[tokio::test]
    async fn test_message_for_other_chat_refreshes_inbox() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.threads.upsert(thread(55, 10, 20));
            s.stores.threads.upsert(thread(56, 10, 30));
            s.stores.messages.activate(ChatId(55));
        });
        h.http.on(
            platesync_net::Method::Get,
            "/chats?car_id=10",
            200,
            json!([
                {"id": 55, "participant_car_ids": [10, 20]},
                {"id": 56, "participant_car_ids": [10, 30], "last_message": "yo", "unread_count": 1}
            ]),
        );

        let outcome = h.client.apply_push(PushEvent::Message(message(1, 56, 30)));
        assert_eq!(outcome, PushOutcome::RefreshInbox(vec![StateChange::Inbox]));
        assert!(h.client.read(|s| s.messages.is_empty()));
        assert!(h.client.read(|s| s.threads.get(ChatId(56)).unwrap().has_unread));

        h.client
            .handle_channel_event(ChannelEvent::Push(PushEvent::Message(message(2, 56, 30))))
            .await;
        assert_eq!(h.http.count(platesync_net::Method::Get, "/chats?car_id=10"), 1);
        assert!(h.client.read(|s| s.messages.is_empty()));
    }

    #[tokio::test]
    async fn test_notification_for_other_car_is_dropped() {
        let h = harness();
        h.sign_in(CarId(10));

        let outcome = h.client.apply_push(PushEvent::Notification(notification(1, 11)));
        assert!(matches!(outcome, PushOutcome::Ignored(_)));
        assert!(h.client.read(|s| s.notifications.get(NotificationId(1)).is_none()));

        h.client.apply_push(PushEvent::Notification(notification(2, 10)));
        assert!(h.client.read(|s| s.notifications.get(NotificationId(2)).is_some()));
        assert_eq!(h.client.read(|s| s.notifications.unread_count()), 1);
    }

    #[tokio::test]
    async fn test_thread_update_for_other_cars_is_dropped() {
        let h = harness();
        h.sign_in(CarId(10));

        let outcome = h.client.apply_push(PushEvent::ThreadUpdated(json!({
            "id": 70, "participant_car_ids": [30, 40], "unread_count": 1
        })));
        assert_eq!(outcome, PushOutcome::Ignored("active car is not a participant"));
        assert!(h.client.read(|s| s.threads.is_empty()));
        assert_eq!(h.client.read(|s| s.threads.unread_count()), 0);

        let outcome = h.client.apply_push(PushEvent::ThreadUpdated(json!({
            "id": 71, "participant_car_ids": [10, 40], "unread_count": 1
        })));
        assert_eq!(outcome, PushOutcome::Applied(vec![StateChange::Inbox]));
        assert_eq!(h.client.read(|s| s.threads.len()), 1);
    }

    #[tokio::test]
    async fn test_post_liked_by_someone_else_keeps_my_flag() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 3, false)]);
            s.stores.posts.replace_collection(FeedKind::Following, vec![post(7, 3, false)]);
        });

        h.client.apply_push(PushEvent::PostLiked {
            post_id: PostId(7),
            likes_count: Some(5),
            actor_car_id: Some(CarId(42)),
            liked: Some(true),
        });
        for feed in [FeedKind::News, FeedKind::Following] {
            let (liked, count) = h.client.read(|s| {
                let p = s.posts.list(feed)[0];
                (p.liked_by_me, p.like_count)
            });
            assert!(!liked);
            assert_eq!(count, 5);
        }

        h.client.apply_push(PushEvent::PostLiked {
            post_id: PostId(7),
            likes_count: None,
            actor_car_id: Some(CarId(10)),
            liked: Some(true),
        });
        assert!(h.client.read(|s| s.posts.get(PostId(7)).unwrap().liked_by_me));
    }

    #[tokio::test]
    async fn test_comment_push_updates_count() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 0, false)]);
        });

        // Comments not loaded: count still moves.
        h.client.apply_push(PushEvent::PostCommented {
            post_id: PostId(7),
            comment: None,
            comments_count: None,
        });
        assert_eq!(h.client.read(|s| s.posts.get(PostId(7)).unwrap().comment_count), 1);

        h.client.with_state(|s| s.stores.comments.replace_for_post(PostId(7), vec![]));
        let comment = platesync_shared::models::Comment {
            id: CommentId(3),
            post_id: PostId(7),
            author_car_id: CarId(20),
            text: "nice".into(),
            like_count: 0,
            liked_by_me: false,
            created_at: Utc.timestamp_opt(5, 0).unwrap(),
        };
        for _ in 0..2 {
            h.client.apply_push(PushEvent::PostCommented {
                post_id: PostId(7),
                comment: Some(comment.clone()),
                comments_count: None,
            });
        }
        assert_eq!(h.client.read(|s| s.comments.list(PostId(7)).len()), 1);
        assert_eq!(h.client.read(|s| s.posts.get(PostId(7)).unwrap().comment_count), 2);

        h.client.apply_push(PushEvent::CommentDeleted {
            post_id: PostId(7),
            comment_id: CommentId(3),
            comments_count: Some(9),
        });
        assert!(h.client.read(|s| s.comments.list(PostId(7)).is_empty()));
        assert_eq!(h.client.read(|s| s.posts.get(PostId(7)).unwrap().comment_count), 9);
    }

    #[tokio::test]
    async fn test_chat_read_advances_marker_only_forward() {
        let h = harness();
        h.sign_in(CarId(10));

        let at = |s| Utc.timestamp_opt(s, 0).unwrap();
        let read = |secs, reader| PushEvent::ChatRead {
            chat_id: ChatId(55),
            reader_car_id: Some(CarId(reader)),
            read_at: at(secs),
        };

        assert!(matches!(h.client.apply_push(read(200, 20)), PushOutcome::Applied(_)));
        assert!(matches!(h.client.apply_push(read(100, 20)), PushOutcome::Ignored(_)));
        assert!(matches!(h.client.apply_push(read(300, 10)), PushOutcome::Ignored(_)));
        assert_eq!(
            h.client.read(|s| s.markers.get(ChatId(55)).unwrap().other_last_read_at),
            Some(at(200))
        );
    }

    #[tokio::test]
    async fn test_bridge_processes_channel_queue() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.threads.upsert(thread(55, 10, 20));
            s.stores.messages.activate(ChatId(55));
        });
        let mut changes = h.client.subscribe();

        h.client.connect_realtime("tok").await.unwrap();
        assert!(h.client.is_realtime_open());
        h.realtime.push(ChannelEvent::Connected);
        h.realtime
            .push(ChannelEvent::Push(PushEvent::Message(message(9001, 55, 20))));

        wait_for(&mut changes, |c| *c == StateChange::Messages(ChatId(55))).await;
        assert_eq!(h.client.connection(), ConnectionMode::Connected);
        assert_eq!(h.client.read(|s| s.messages.len()), 1);

        h.client.disconnect_realtime();
        h.client.disconnect_realtime();
        assert!(!h.client.is_realtime_open());
        assert_eq!(h.client.connection(), ConnectionMode::Disconnected);

        // The aborted bridge drops its end of the queue.
        for _ in 0..100 {
            if h.realtime.latest_closed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(h.realtime.latest_closed());
    }
}
