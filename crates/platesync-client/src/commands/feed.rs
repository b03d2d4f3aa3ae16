use tracing::info;

use platesync_shared::constants::MAX_DESCRIPTION_LEN;
use platesync_shared::models::Post;
use platesync_shared::normalize::{normalize_list, normalize_post};
use platesync_shared::types::{FeedKind, PostId};

use crate::api;
use crate::client::{entity, report_skipped, SyncClient};
use crate::error::SyncError;
use crate::events::StateChange;
use crate::optimistic::{LikeState, LikeTarget, ToggleLike};

const POST_LIST_KEYS: &[&str] = &["posts", "feed", "data", "items", "results"];

fn validate_description(description: &str) -> Result<(), SyncError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(SyncError::invalid(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

impl SyncClient {
    /// Fetch one feed collection and replace its contents.
    ///
    /// On failure the collection is left as it was.
    pub async fn load_feed(&self, feed: FeedKind) -> Result<Vec<Post>, SyncError> {
        let token = self.token()?;
        let car = self.active_car();
        let request = match feed {
            FeedKind::News => api::news_feed(car),
            FeedKind::Following => api::following_feed(
                car.ok_or_else(|| SyncError::conflict("no active car selected"))?,
            ),
            FeedKind::Car(author) => api::car_posts(author, car),
        };

        let body = self.call(request.with_token(token.clone())).await?;
        let (posts, skipped) = normalize_list(&body, POST_LIST_KEYS, normalize_post);
        report_skipped("post", &skipped);

        self.with_state_for(&token, |state| {
            state.stores.posts.replace_collection(feed, posts.clone())
        })?;
        self.emit(StateChange::Feed(feed));
        Ok(posts)
    }

    /// Posts of a collection, in feed order.
    pub fn posts(&self, feed: FeedKind) -> Vec<Post> {
        self.read(|stores| stores.posts.list(feed).into_iter().cloned().collect())
    }

    pub fn post(&self, id: PostId) -> Option<Post> {
        self.read(|stores| stores.posts.get(id).cloned())
    }

    /// Toggle the active car's like on a post, optimistically.
    pub async fn like_post(&self, id: PostId) -> Result<LikeState, SyncError> {
        let (_, car) = self.acting()?;
        self.run_optimistic(ToggleLike {
            target: LikeTarget::Post(id),
            car,
            policy: self.config.like_count_policy,
        })
        .await
    }

    pub async fn create_post(
        &self,
        description: &str,
        images: Vec<String>,
    ) -> Result<Post, SyncError> {
        validate_description(description)?;
        if description.trim().is_empty() && images.is_empty() {
            return Err(SyncError::invalid("a post needs a description or an image"));
        }

        let (token, car) = self.acting()?;
        let body = self
            .call(api::create_post(car, description, &images).with_token(token.clone()))
            .await?;
        let post = normalize_post(entity(&body, "post"))?;

        let changed = self.with_state_for(&token, |state| {
            let posts = &mut state.stores.posts;
            let mut changed = Vec::new();
            for feed in [FeedKind::News, FeedKind::Car(post.author_car_id)] {
                if posts.is_loaded(feed) {
                    posts.insert_into(feed, post.clone(), true);
                    changed.push(StateChange::Feed(feed));
                }
            }
            changed
        })?;
        self.events.emit_all(changed);

        info!(post = %post.id, "Post created");
        Ok(post)
    }

    /// Change a post's description.
    pub async fn edit_post(&self, id: PostId, description: &str) -> Result<(), SyncError> {
        validate_description(description)?;
        let token = self.token()?;
        let body = self
            .call(api::edit_post(id, description).with_token(token.clone()))
            .await?;

        let server_copy = match normalize_post(entity(&body, "post")) {
            Ok(post) if post.id == id => Some(post),
            Ok(_) | Err(_) => None,
        };
        let changed = self.with_state_for(&token, |state| match server_copy {
            Some(post) => state.stores.posts.upsert(post),
            None => state
                .stores
                .posts
                .update(id, |p| p.description = description.to_string()),
        })?;
        if changed {
            self.emit(StateChange::Post(id));
        }
        Ok(())
    }

    /// Delete a post; it disappears from every collection.
    pub async fn delete_post(&self, id: PostId) -> Result<(), SyncError> {
        let token = self.token()?;
        self.call(api::delete_post(id).with_token(token.clone()))
            .await?;

        self.with_state_for(&token, |state| {
            state.stores.posts.remove(id);
            state.stores.comments.forget_post(id);
        })?;
        self.emit(StateChange::PostRemoved(id));
        info!(post = %id, "Post deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, LikeCountPolicy};
    use crate::testing::*;
    use platesync_net::Method;
    use platesync_shared::types::CarId;
    use platesync_shared::TransportError;
    use serde_json::json;

    fn like_state(h: &Harness, feed: FeedKind) -> (bool, u32) {
        h.client.read(|s| {
            let p = s.posts.list(feed).into_iter().find(|p| p.id == PostId(7)).unwrap();
            (p.liked_by_me, p.like_count)
        })
    }

    fn seed_two_feeds(h: &Harness) {
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 3, false)]);
            s.stores.posts.replace_collection(FeedKind::Following, vec![post(7, 3, false)]);
        });
    }

    #[tokio::test]
    async fn test_load_feed_normalizes_and_replaces() {
        let h = harness();
        h.sign_in(CarId(10));
        h.http.on(
            Method::Get,
            "/posts/following?car_id=10",
            200,
            json!({"posts": [
                {"id": 7, "car_id": 20, "is_liked_by_user": true, "likes": 3},
                {"id": "broken"}
            ]}),
        );

        let posts = h.client.load_feed(FeedKind::Following).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].liked_by_me);
        assert_eq!(h.client.posts(FeedKind::Following).len(), 1);
    }

    #[tokio::test]
    async fn test_load_feed_failure_leaves_store_unchanged() {
        let h = harness();
        h.sign_in(CarId(10));
        seed_two_feeds(&h);
        h.http.fail(Method::Get, "/posts/feed?car_id=10", TransportError::Timeout);

        let err = h.client.load_feed(FeedKind::News).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(TransportError::Timeout)));
        assert_eq!(h.client.posts(FeedKind::News).len(), 1);
    }

    #[tokio::test]
    async fn test_like_success_fans_out_server_flag() {
        let h = harness();
        h.sign_in(CarId(10));
        seed_two_feeds(&h);
        h.http.on(Method::Post, "/posts/7/like", 200, json!({"liked": true, "likes_count": 1}));

        let settled = h.client.like_post(PostId(7)).await.unwrap();
        assert_eq!(settled, LikeState { liked: true, like_count: 4 });
        for feed in [FeedKind::News, FeedKind::Following] {
            assert_eq!(like_state(&h, feed), (true, 4));
        }
    }

    #[tokio::test]
    async fn test_like_failure_restores_snapshot() {
        let h = harness();
        h.sign_in(CarId(10));
        seed_two_feeds(&h);
        h.http.on(Method::Post, "/posts/7/like", 500, json!({"error": "boom"}));

        let err = h.client.like_post(PostId(7)).await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 500, .. }));
        for feed in [FeedKind::News, FeedKind::Following] {
            assert_eq!(like_state(&h, feed), (false, 3));
        }
    }

    #[tokio::test]
    async fn test_server_flag_disagreeing_recomputes_count() {
        let h = harness();
        h.sign_in(CarId(10));
        seed_two_feeds(&h);
        h.http.on(Method::Post, "/posts/7/like", 200, json!({"liked": false}));

        let settled = h.client.like_post(PostId(7)).await.unwrap();
        assert_eq!(settled, LikeState { liked: false, like_count: 3 });
        assert_eq!(like_state(&h, FeedKind::News), (false, 3));
    }

    #[tokio::test]
    async fn test_trust_server_policy_applies_count() {
        let config = ClientConfig {
            like_count_policy: LikeCountPolicy::TrustServer,
            ..ClientConfig::default()
        };
        let h = harness_with(config);
        h.sign_in(CarId(10));
        seed_two_feeds(&h);
        h.http.on(Method::Post, "/posts/7/like", 200, json!({"liked": true, "likes_count": 12}));

        h.client.like_post(PostId(7)).await.unwrap();
        assert_eq!(like_state(&h, FeedKind::Following), (true, 12));
    }

    #[tokio::test]
    async fn test_like_unknown_post_is_conflict_without_request() {
        let h = harness();
        h.sign_in(CarId(10));
        let err = h.client.like_post(PostId(99)).await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));
        assert!(h.http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_delete_post() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 0, false)]);
            s.stores.posts.replace_collection(FeedKind::Car(CarId(10)), vec![]);
        });
        h.http.on(
            Method::Post,
            "/posts",
            201,
            json!({"post": {"id": 8, "car_id": 10, "description": "new wheels"}}),
        );

        assert!(matches!(
            h.client.create_post("  ", vec![]).await,
            Err(SyncError::Validation(_))
        ));
        let created = h.client.create_post("new wheels", vec![]).await.unwrap();
        assert_eq!(created.id, PostId(8));
        assert_eq!(h.client.posts(FeedKind::News)[0].id, PostId(8));
        assert_eq!(h.client.posts(FeedKind::Car(CarId(10))).len(), 1);

        h.http.on(Method::Delete, "/posts/8", 204, serde_json::Value::Null);
        h.client.delete_post(PostId(8)).await.unwrap();
        assert!(h.client.post(PostId(8)).is_none());
        assert!(h.client.posts(FeedKind::Car(CarId(10))).is_empty());
    }

    #[tokio::test]
    async fn test_edit_post_without_entity_updates_description() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.posts.replace_collection(FeedKind::News, vec![post(7, 0, false)]);
        });
        h.http.on(Method::Put, "/posts/7", 200, json!({"ok": true}));

        h.client.edit_post(PostId(7), "edited").await.unwrap();
        assert_eq!(h.client.post(PostId(7)).unwrap().description, "edited");
    }
}
