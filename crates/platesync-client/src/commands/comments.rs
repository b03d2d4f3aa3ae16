use tracing::debug;

use platesync_shared::constants::MAX_MESSAGE_LEN;
use platesync_shared::models::Comment;
use platesync_shared::normalize::{normalize_comment, normalize_list};
use platesync_shared::types::{CommentId, PostId};

use crate::api;
use crate::client::{entity, report_skipped, SyncClient, LIST_KEYS};
use crate::error::SyncError;
use crate::events::StateChange;
use crate::optimistic::{LikeState, LikeTarget, ToggleLike};
use crate::state::AppState;

fn validate_comment(text: &str) -> Result<&str, SyncError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyncError::invalid("comment is empty"));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(SyncError::invalid(format!(
            "comment exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(text)
}

/// Shift a post's comment count by one in either direction.
fn bump_comment_count(state: &mut AppState, post: PostId, up: bool) -> bool {
    state.stores.posts.update(post, |p| {
        p.comment_count = if up {
            p.comment_count.saturating_add(1)
        } else {
            p.comment_count.saturating_sub(1)
        };
    })
}

impl SyncClient {
    pub async fn load_comments(&self, post: PostId) -> Result<Vec<Comment>, SyncError> {
        let token = self.token()?;
        let body = self
            .call(api::list_comments(post, self.active_car()).with_token(token.clone()))
            .await?;

        let mut keys = vec!["comments"];
        keys.extend_from_slice(LIST_KEYS);
        let (comments, skipped) = normalize_list(&body, &keys, |v| normalize_comment(v, Some(post)));
        report_skipped("comment", &skipped);

        let comments = self.with_state_for(&token, |state| {
            state.stores.comments.replace_for_post(post, comments);
            state.stores.comments.list(post).to_vec()
        })?;
        self.emit(StateChange::Comments(post));
        Ok(comments)
    }

    /// Loaded comments of a post, oldest first.
    pub fn comments(&self, post: PostId) -> Vec<Comment> {
        self.read(|stores| stores.comments.list(post).to_vec())
    }

    pub async fn add_comment(&self, post: PostId, text: &str) -> Result<Comment, SyncError> {
        let text = validate_comment(text)?;
        let (token, car) = self.acting()?;
        let body = self
            .call(api::create_comment(post, car, text).with_token(token.clone()))
            .await?;
        let comment = normalize_comment(entity(&body, "comment"), Some(post))?;

        let counted = self.with_state_for(&token, |state| {
            // The realtime echo may have been applied first.
            let first = state.stores.comments.note_added(comment.id);
            let inserted = state.stores.comments.upsert(comment.clone());
            first && inserted != Some(false) && bump_comment_count(state, post, true)
        })?;
        self.emit(StateChange::Comments(post));
        if counted {
            self.emit(StateChange::Post(post));
        }
        Ok(comment)
    }

    pub async fn edit_comment(&self, id: CommentId, text: &str) -> Result<(), SyncError> {
        let text = validate_comment(text)?;
        let post = self
            .read(|stores| stores.comments.get(id).map(|c| c.post_id))
            .ok_or_else(|| SyncError::conflict(format!("comment {id} is not loaded")))?;

        let token = self.token()?;
        let body = self
            .call(api::edit_comment(id, text).with_token(token.clone()))
            .await?;

        let server_copy = normalize_comment(entity(&body, "comment"), Some(post))
            .ok()
            .filter(|c| c.id == id);
        self.with_state_for(&token, |state| match server_copy {
            Some(comment) => {
                state.stores.comments.upsert(comment);
            }
            None => {
                state.stores.comments.update(id, |c| c.text = text.to_string());
            }
        })?;
        self.emit(StateChange::Comments(post));
        Ok(())
    }

    pub async fn delete_comment(&self, post: PostId, id: CommentId) -> Result<(), SyncError> {
        let token = self.token()?;
        self.call(api::delete_comment(id).with_token(token.clone()))
            .await?;

        let counted = self.with_state_for(&token, |state| {
            let first = state.stores.comments.note_removed(id);
            let loaded = state.stores.comments.is_loaded(post);
            let removed = state.stores.comments.remove(post, id).is_some();
            if first && (removed || !loaded) {
                bump_comment_count(state, post, false)
            } else {
                debug!(comment = %id, "Deleted comment was already gone");
                false
            }
        })?;
        self.emit(StateChange::Comments(post));
        if counted {
            self.emit(StateChange::Post(post));
        }
        Ok(())
    }

    /// Toggle the active car's like on a loaded comment, optimistically.
    pub async fn like_comment(&self, id: CommentId) -> Result<LikeState, SyncError> {
        let (_, car) = self.acting()?;
        let post = self
            .read(|stores| stores.comments.get(id).map(|c| c.post_id))
            .ok_or_else(|| SyncError::conflict(format!("comment {id} is not loaded")))?;

        self.run_optimistic(ToggleLike {
            target: LikeTarget::Comment { post, comment: id },
            car,
            policy: self.config.like_count_policy,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use platesync_net::Method;
    use platesync_shared::protocol::PushEvent;
    use platesync_shared::types::{CarId, FeedKind};
    use serde_json::json;

    fn seed(h: &Harness) {
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 0, false)]);
        });
    }

    #[tokio::test]
    async fn test_load_and_add_comment() {
        let h = harness();
        h.sign_in(CarId(10));
        seed(&h);
        h.http.on(
            Method::Get,
            "/posts/7/comments?car_id=10",
            200,
            json!({"comments": [{"id": 1, "car_id": 20, "text": "nice"}]}),
        );
        h.http.on(
            Method::Post,
            "/posts/7/comments",
            201,
            json!({"comment": {"id": 2, "car_id": 10, "text": "thanks", "created_at": "2024-01-01T00:00:00Z"}}),
        );

        let loaded = h.client.load_comments(PostId(7)).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].post_id, PostId(7));

        let added = h.client.add_comment(PostId(7), "  thanks ").await.unwrap();
        assert_eq!(added.id, CommentId(2));
        assert_eq!(h.client.comments(PostId(7)).len(), 2);
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn test_add_comment_validation() {
        let h = harness();
        h.sign_in(CarId(10));
        let long = "x".repeat(MAX_MESSAGE_LEN + 1);
        for text in ["   ", long.as_str()] {
            let err = h.client.add_comment(PostId(7), text).await.unwrap_err();
            assert!(matches!(err, SyncError::Validation(_)));
        }
        assert!(h.http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_delete_comment_decrements_once() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            let mut p = post(7, 0, false);
            p.comment_count = 2;
            s.stores.posts.replace_collection(FeedKind::News, vec![p]);
            s.stores.comments.replace_for_post(PostId(7), vec![comment(1, 7, 10)]);
        });
        h.http.on(Method::Delete, "/comments/1", 204, serde_json::Value::Null);

        h.client.delete_comment(PostId(7), CommentId(1)).await.unwrap();
        assert!(h.client.comments(PostId(7)).is_empty());
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);

        // Already gone from a loaded list: no second decrement.
        h.client.delete_comment(PostId(7), CommentId(1)).await.unwrap();
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn test_added_comment_and_its_echo_count_once() {
        let h = harness();
        h.sign_in(CarId(10));
        seed(&h);
        h.http.on(
            Method::Post,
            "/posts/7/comments",
            201,
            json!({"comment": {"id": 5, "car_id": 10, "text": "hi", "created_at": "2024-01-01T00:00:00Z"}}),
        );

        let added = h.client.add_comment(PostId(7), "hi").await.unwrap();
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);

        h.client.apply_push(PushEvent::PostCommented {
            post_id: PostId(7),
            comment: Some(added),
            comments_count: None,
        });
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn test_echo_before_response_counts_once() {
        let h = harness();
        h.sign_in(CarId(10));
        seed(&h);
        h.http.on(
            Method::Post,
            "/posts/7/comments",
            201,
            json!({"comment": {"id": 5, "car_id": 10, "text": "hi"}}),
        );

        h.client.apply_push(PushEvent::PostCommented {
            post_id: PostId(7),
            comment: Some(comment(5, 7, 10)),
            comments_count: None,
        });
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);

        h.client.add_comment(PostId(7), "hi").await.unwrap();
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn test_deleted_comment_and_its_echo_count_once() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            let mut p = post(7, 0, false);
            p.comment_count = 3;
            s.stores.posts.replace_collection(FeedKind::News, vec![p]);
        });
        h.http.on(Method::Delete, "/comments/4", 204, serde_json::Value::Null);

        h.client.delete_comment(PostId(7), CommentId(4)).await.unwrap();
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 2);

        h.client.apply_push(PushEvent::CommentDeleted {
            post_id: PostId(7),
            comment_id: CommentId(4),
            comments_count: None,
        });
        assert_eq!(h.client.post(PostId(7)).unwrap().comment_count, 2);
    }

    #[tokio::test]
    async fn test_like_comment_rolls_back_on_failure() {
        let h = harness();
        h.sign_in(CarId(10));
        h.http.on(
            Method::Get,
            "/posts/7/comments?car_id=10",
            200,
            json!([{"id": 1, "car_id": 20, "likes": 2}]),
        );
        h.client.load_comments(PostId(7)).await.unwrap();

        h.http.on(Method::Post, "/comments/1/like", 503, json!({"error": "busy"}));
        assert!(h.client.like_comment(CommentId(1)).await.is_err());
        let c = h.client.comments(PostId(7)).remove(0);
        assert_eq!((c.liked_by_me, c.like_count), (false, 2));

        let err = h.client.like_comment(CommentId(99)).await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));
    }
}
