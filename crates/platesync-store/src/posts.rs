//! Feed posts.
//!
//! Each post is stored once, keyed by id. Feed collections are ordered lists
//! of ids over that map, so writing a post is visible in every collection
//! that holds it. A post that no collection references any more is dropped:
//! it is "not loaded", which is different from deleted.

use std::collections::HashMap;

use tracing::debug;

use platesync_shared::models::Post;
use platesync_shared::types::{FeedKind, PostId};

#[derive(Debug, Default, Clone)]
pub struct PostStore {
    posts: HashMap<PostId, Post>,
    collections: HashMap<FeedKind, Vec<PostId>>,
}

impl PostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of one collection (a full reload).
    ///
    /// Every incoming post also refreshes its copy in other collections.
    pub fn replace_collection(&mut self, feed: FeedKind, posts: Vec<Post>) {
        let mut ids = Vec::with_capacity(posts.len());
        for post in posts {
            if !ids.contains(&post.id) {
                ids.push(post.id);
            }
            self.posts.insert(post.id, post);
        }
        debug!(?feed, count = ids.len(), "Feed collection replaced");
        self.collections.insert(feed, ids);
        self.collect_garbage();
    }

    /// Add `post` to `feed`, at the front (newest) or the back.
    pub fn insert_into(&mut self, feed: FeedKind, post: Post, front: bool) {
        let id = post.id;
        self.posts.insert(id, post);
        let ids = self.collections.entry(feed).or_default();
        if !ids.contains(&id) {
            if front {
                ids.insert(0, id);
            } else {
                ids.push(id);
            }
        }
    }

    /// Overwrite a loaded post everywhere it appears.
    ///
    /// Returns `false` (and stores nothing) when no collection holds it.
    pub fn upsert(&mut self, post: Post) -> bool {
        match self.posts.get_mut(&post.id) {
            Some(existing) => {
                *existing = post;
                true
            }
            None => false,
        }
    }

    /// Mutate a loaded post in place. Returns `false` if it is not loaded.
    pub fn update<F: FnOnce(&mut Post)>(&mut self, id: PostId, f: F) -> bool {
        match self.posts.get_mut(&id) {
            Some(post) => {
                f(post);
                true
            }
            None => false,
        }
    }

    /// Remove a post from every collection.
    pub fn remove(&mut self, id: PostId) -> Option<Post> {
        for ids in self.collections.values_mut() {
            ids.retain(|p| *p != id);
        }
        self.posts.remove(&id)
    }

    pub fn get(&self, id: PostId) -> Option<&Post> {
        self.posts.get(&id)
    }

    pub fn contains(&self, id: PostId) -> bool {
        self.posts.contains_key(&id)
    }

    /// Posts of one collection, in collection order.
    pub fn list(&self, feed: FeedKind) -> Vec<&Post> {
        self.collections
            .get(&feed)
            .map(|ids| ids.iter().filter_map(|id| self.posts.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, feed: FeedKind) -> bool {
        self.collections.contains_key(&feed)
    }

    /// Collections currently holding `id`.
    pub fn collections_containing(&self, id: PostId) -> Vec<FeedKind> {
        self.collections
            .iter()
            .filter(|(_, ids)| ids.contains(&id))
            .map(|(feed, _)| *feed)
            .collect()
    }

    /// Forget one collection so it must be refetched.
    pub fn invalidate(&mut self, feed: FeedKind) {
        if self.collections.remove(&feed).is_some() {
            debug!(?feed, "Feed collection invalidated");
            self.collect_garbage();
        }
    }

    pub fn clear(&mut self) {
        self.posts.clear();
        self.collections.clear();
    }

    fn collect_garbage(&mut self) {
        let collections = &self.collections;
        self.posts
            .retain(|id, _| collections.values().any(|ids| ids.contains(id)));
    }
}
