//! Optimistic mutations.
//!
//! Every optimistic operation goes through the same three phases:
//!
//! 1. **snapshot** the fields it is about to touch, then **apply** the
//!    intended value locally, before any network traffic;
//! 2. issue the request;
//! 3. **reconcile** the authoritative fields from the response, or
//!    **roll back** to the exact snapshot on any failure.
//!
//! [`SyncClient::run_optimistic`] drives the phases; the operations only
//! describe how to read, write and restore their slice of state.

use serde_json::Value;
use tracing::{debug, warn};

use platesync_net::ApiRequest;
use platesync_shared::normalize::{Record, LIKED_KEYS, LIKES_KEYS};
use platesync_shared::types::{CarId, ChatId, CommentId, NotificationId, PostId};

use crate::api;
use crate::client::SyncClient;
use crate::config::LikeCountPolicy;
use crate::error::SyncError;
use crate::events::StateChange;
use crate::state::AppState;

pub trait OptimisticMutation: Send + Sync {
    type Snapshot: Send;
    type Output: Send;

    /// Short label for logs.
    fn describe(&self) -> String;

    /// Capture what [`Self::apply`] will change. Fails when the target is
    /// not held locally.
    fn snapshot(&self, state: &AppState) -> Result<Self::Snapshot, SyncError>;

    fn apply(&self, state: &mut AppState, snapshot: &Self::Snapshot);

    fn request(&self) -> ApiRequest;

    /// Fold the server's answer into the optimistic state.
    fn reconcile(&self, state: &mut AppState, snapshot: &Self::Snapshot, body: &Value) -> Self::Output;

    /// Put back exactly what was captured.
    fn rollback(&self, state: &mut AppState, snapshot: Self::Snapshot);

    /// Observers to notify after apply and after settle.
    fn changes(&self) -> Vec<StateChange>;
}

impl SyncClient {
    pub(crate) async fn run_optimistic<M: OptimisticMutation>(
        &self,
        mutation: M,
    ) -> Result<M::Output, SyncError> {
        let token = self.token()?;
        let car = self.active_car();

        let snapshot = self.with_state(|state| -> Result<M::Snapshot, SyncError> {
            let snapshot = mutation.snapshot(state)?;
            mutation.apply(state, &snapshot);
            Ok(snapshot)
        })?;
        self.events.emit_all(mutation.changes());

        let result = self.call(mutation.request().with_token(token.clone())).await;

        // Settle only into the session and car that issued the request.
        let outcome = self
            .with_state_for(&token, |state| {
                if state.active_car() != car {
                    return Err(SyncError::conflict(
                        "active car changed while the request was in flight",
                    ));
                }
                match result {
                    Ok(body) => Ok(mutation.reconcile(state, &snapshot, &body)),
                    Err(e) => {
                        mutation.rollback(state, snapshot);
                        Err(e)
                    }
                }
            })
            .and_then(|settled| settled);
        self.events.emit_all(mutation.changes());

        match &outcome {
            Ok(_) => debug!(op = %mutation.describe(), "Optimistic update confirmed"),
            Err(SyncError::StateConflict(reason)) => {
                debug!(op = %mutation.describe(), %reason, "Optimistic result discarded")
            }
            Err(e) => warn!(op = %mutation.describe(), error = %e, "Optimistic update rolled back"),
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Likes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeTarget {
    Post(PostId),
    Comment { post: PostId, comment: CommentId },
}

/// Liked flag and count of a post or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u32,
}

impl LikeState {
    fn toggled(self) -> Self {
        if self.liked {
            Self {
                liked: false,
                like_count: self.like_count.saturating_sub(1),
            }
        } else {
            Self {
                liked: true,
                like_count: self.like_count.saturating_add(1),
            }
        }
    }
}

fn read_like(state: &AppState, target: LikeTarget) -> Option<LikeState> {
    match target {
        LikeTarget::Post(id) => state.stores.posts.get(id).map(|p| LikeState {
            liked: p.liked_by_me,
            like_count: p.like_count,
        }),
        LikeTarget::Comment { comment, .. } => state.stores.comments.get(comment).map(|c| LikeState {
            liked: c.liked_by_me,
            like_count: c.like_count,
        }),
    }
}

fn write_like(state: &mut AppState, target: LikeTarget, like: LikeState) {
    match target {
        LikeTarget::Post(id) => {
            state.stores.posts.update(id, |p| {
                p.liked_by_me = like.liked;
                p.like_count = like.like_count;
            });
        }
        LikeTarget::Comment { comment, .. } => {
            state.stores.comments.update(comment, |c| {
                c.liked_by_me = like.liked;
                c.like_count = like.like_count;
            });
        }
    }
}

/// Like/unlike toggle on a post or a comment.
#[derive(Debug, Clone)]
pub struct ToggleLike {
    pub target: LikeTarget,
    pub car: CarId,
    pub policy: LikeCountPolicy,
}

impl OptimisticMutation for ToggleLike {
    type Snapshot = LikeState;
    type Output = LikeState;

    fn describe(&self) -> String {
        format!("like {:?}", self.target)
    }

    fn snapshot(&self, state: &AppState) -> Result<LikeState, SyncError> {
        read_like(state, self.target)
            .ok_or_else(|| SyncError::conflict(format!("{:?} is not loaded", self.target)))
    }

    fn apply(&self, state: &mut AppState, snapshot: &LikeState) {
        write_like(state, self.target, snapshot.toggled());
    }

    fn request(&self) -> ApiRequest {
        match self.target {
            LikeTarget::Post(id) => api::toggle_post_like(id, self.car),
            LikeTarget::Comment { comment, .. } => api::toggle_comment_like(comment, self.car),
        }
    }

    fn reconcile(&self, state: &mut AppState, snapshot: &LikeState, body: &Value) -> LikeState {
        let optimistic = snapshot.toggled();
        let record = Record::new(body).ok();
        let server_liked = record.as_ref().and_then(|r| r.flag(LIKED_KEYS));
        let server_count = record.as_ref().and_then(|r| r.count(LIKES_KEYS));

        let liked = server_liked.unwrap_or(optimistic.liked);
        let current = read_like(state, self.target).unwrap_or(optimistic);

        // The flag is authoritative. The count stays as computed locally,
        // unless the flag flipped back, in which case the snapshot holds the
        // count that matches it.
        let mut like_count = if liked == optimistic.liked {
            current.like_count
        } else {
            snapshot.like_count
        };
        if self.policy == LikeCountPolicy::TrustServer {
            if let Some(count) = server_count {
                like_count = count;
            }
        }

        let settled = LikeState { liked, like_count };
        write_like(state, self.target, settled);
        settled
    }

    fn rollback(&self, state: &mut AppState, snapshot: LikeState) {
        write_like(state, self.target, snapshot);
    }

    fn changes(&self) -> Vec<StateChange> {
        match self.target {
            LikeTarget::Post(id) => vec![StateChange::Post(id)],
            LikeTarget::Comment { post, .. } => vec![StateChange::Comments(post)],
        }
    }
}

// ---------------------------------------------------------------------------
// Read flags
// ---------------------------------------------------------------------------

/// Clear a thread's unread flag and tell the backend.
#[derive(Debug, Clone)]
pub struct MarkThreadRead {
    pub chat: ChatId,
    pub car: CarId,
}

impl OptimisticMutation for MarkThreadRead {
    type Snapshot = bool;
    type Output = ();

    fn describe(&self) -> String {
        format!("mark chat {} read", self.chat)
    }

    fn snapshot(&self, state: &AppState) -> Result<bool, SyncError> {
        state
            .stores
            .threads
            .get(self.chat)
            .map(|t| t.has_unread)
            .ok_or_else(|| SyncError::conflict(format!("chat {} is not in the inbox", self.chat)))
    }

    fn apply(&self, state: &mut AppState, _snapshot: &bool) {
        state.stores.threads.update(self.chat, |t| t.has_unread = false);
    }

    fn request(&self) -> ApiRequest {
        api::mark_chat_read(self.chat, self.car)
    }

    fn reconcile(&self, _state: &mut AppState, _snapshot: &bool, _body: &Value) {}

    fn rollback(&self, state: &mut AppState, snapshot: bool) {
        state.stores.threads.update(self.chat, |t| t.has_unread = snapshot);
    }

    fn changes(&self) -> Vec<StateChange> {
        vec![StateChange::Inbox]
    }
}

#[derive(Debug, Clone)]
pub struct MarkNotificationRead {
    pub id: NotificationId,
}

impl OptimisticMutation for MarkNotificationRead {
    type Snapshot = bool;
    type Output = ();

    fn describe(&self) -> String {
        format!("mark notification {} read", self.id)
    }

    fn snapshot(&self, state: &AppState) -> Result<bool, SyncError> {
        state
            .stores
            .notifications
            .get(self.id)
            .map(|n| n.is_read)
            .ok_or_else(|| SyncError::conflict(format!("notification {} is not loaded", self.id)))
    }

    fn apply(&self, state: &mut AppState, _snapshot: &bool) {
        state.stores.notifications.set_read(self.id, true);
    }

    fn request(&self) -> ApiRequest {
        api::mark_notification_read(self.id)
    }

    fn reconcile(&self, _state: &mut AppState, _snapshot: &bool, _body: &Value) {}

    fn rollback(&self, state: &mut AppState, snapshot: bool) {
        state.stores.notifications.set_read(self.id, snapshot);
    }

    fn changes(&self) -> Vec<StateChange> {
        vec![StateChange::Notifications]
    }
}

#[derive(Debug, Clone)]
pub struct MarkAllNotificationsRead {
    pub car: CarId,
}

/// Ids that were unread, plus the counter before the mutation.
pub struct UnreadSnapshot {
    ids: Vec<NotificationId>,
    unread: u32,
}

impl OptimisticMutation for MarkAllNotificationsRead {
    type Snapshot = UnreadSnapshot;
    type Output = ();

    fn describe(&self) -> String {
        "mark all notifications read".to_string()
    }

    fn snapshot(&self, state: &AppState) -> Result<UnreadSnapshot, SyncError> {
        let store = &state.stores.notifications;
        Ok(UnreadSnapshot {
            ids: store.list().iter().filter(|n| !n.is_read).map(|n| n.id).collect(),
            unread: store.unread_count(),
        })
    }

    fn apply(&self, state: &mut AppState, _snapshot: &UnreadSnapshot) {
        state.stores.notifications.mark_all_read();
    }

    fn request(&self) -> ApiRequest {
        api::mark_all_notifications_read(self.car)
    }

    fn reconcile(&self, _state: &mut AppState, _snapshot: &UnreadSnapshot, _body: &Value) {}

    fn rollback(&self, state: &mut AppState, snapshot: UnreadSnapshot) {
        state
            .stores
            .notifications
            .restore_unread(&snapshot.ids, snapshot.unread);
    }

    fn changes(&self) -> Vec<StateChange> {
        vec![StateChange::Notifications]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use platesync_net::Method;
    use platesync_shared::models::Session;
    use platesync_shared::types::FeedKind;
    use serde_json::json;

    #[test]
    fn test_toggled_never_underflows() {
        let s = LikeState {
            liked: true,
            like_count: 0,
        };
        assert_eq!(
            s.toggled(),
            LikeState {
                liked: false,
                like_count: 0
            }
        );
        let s = LikeState {
            liked: false,
            like_count: 3,
        };
        assert_eq!(s.toggled().like_count, 4);
        assert_eq!(s.toggled().toggled(), s);
    }

    #[tokio::test]
    async fn test_failure_after_session_change_does_not_roll_back() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 3, false)]);
        });
        h.http.on(Method::Post, "/posts/7/like", 503, json!({"error": "busy"}));

        // Signed out and back in while the like was in flight.
        let client = h.client.clone();
        h.http.before_reply(move || {
            client.with_state(|s| {
                s.session = Some(Session {
                    token: "fresh".into(),
                    ..s.session.clone().unwrap()
                });
                s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 10, true)]);
            });
        });

        let err = h.client.like_post(PostId(7)).await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));
        let p = h.client.post(PostId(7)).unwrap();
        assert_eq!((p.liked_by_me, p.like_count), (true, 10));
    }

    #[tokio::test]
    async fn test_failure_after_car_switch_does_not_roll_back() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 3, false)]);
        });
        h.http.fail(Method::Post, "/posts/7/like", platesync_shared::TransportError::Timeout);

        let client = h.client.clone();
        h.http.before_reply(move || {
            client.with_state(|s| {
                if let Some(session) = s.session.as_mut() {
                    session.active_car_id = Some(CarId(11));
                }
            });
        });

        let err = h.client.like_post(PostId(7)).await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));
        let p = h.client.post(PostId(7)).unwrap();
        assert_eq!((p.liked_by_me, p.like_count), (true, 4));
    }
}
