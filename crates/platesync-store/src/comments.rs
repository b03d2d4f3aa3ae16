//! Comments, held per post once that post's comment list has been fetched.

use std::collections::{HashMap, HashSet};

use platesync_shared::models::Comment;
use platesync_shared::types::{CommentId, PostId};

#[derive(Debug, Default, Clone)]
pub struct CommentStore {
    by_post: HashMap<PostId, Vec<Comment>>,
    /// Comments whose creation is already reflected in their post's count.
    counted_added: HashSet<CommentId>,
    /// Comments whose deletion is already reflected in their post's count.
    counted_removed: HashSet<CommentId>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_for_post(&mut self, post_id: PostId, mut comments: Vec<Comment>) {
        let mut seen = HashSet::new();
        comments.retain(|c| seen.insert(c.id));
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.by_post.insert(post_id, comments);
    }

    pub fn is_loaded(&self, post_id: PostId) -> bool {
        self.by_post.contains_key(&post_id)
    }

    /// Insert or overwrite a comment of a loaded post.
    ///
    /// Returns `Some(true)` when the comment was new, `Some(false)` when it
    /// replaced an existing one, `None` when the post's comments are not
    /// loaded.
    pub fn upsert(&mut self, comment: Comment) -> Option<bool> {
        let list = self.by_post.get_mut(&comment.post_id)?;
        if let Some(existing) = list.iter_mut().find(|c| c.id == comment.id) {
            *existing = comment;
            return Some(false);
        }
        let pos = list
            .iter()
            .position(|c| (c.created_at, c.id) > (comment.created_at, comment.id))
            .unwrap_or(list.len());
        list.insert(pos, comment);
        Some(true)
    }

    pub fn update<F: FnOnce(&mut Comment)>(&mut self, id: CommentId, f: F) -> bool {
        match self
            .by_post
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|c| c.id == id)
        {
            Some(comment) => {
                f(comment);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, post_id: PostId, id: CommentId) -> Option<Comment> {
        let list = self.by_post.get_mut(&post_id)?;
        let pos = list.iter().position(|c| c.id == id)?;
        Some(list.remove(pos))
    }

    pub fn get(&self, id: CommentId) -> Option<&Comment> {
        self.by_post.values().flatten().find(|c| c.id == id)
    }

    pub fn list(&self, post_id: PostId) -> &[Comment] {
        self.by_post
            .get(&post_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Record that `id`'s creation has been counted. Returns `false` if it
    /// already was, so a confirmed add and its realtime echo count once.
    pub fn note_added(&mut self, id: CommentId) -> bool {
        self.counted_added.insert(id)
    }

    /// Deletion counterpart of [`Self::note_added`].
    pub fn note_removed(&mut self, id: CommentId) -> bool {
        self.counted_removed.insert(id)
    }

    pub fn forget_post(&mut self, post_id: PostId) {
        self.by_post.remove(&post_id);
    }

    pub fn clear(&mut self) {
        self.by_post.clear();
        self.counted_added.clear();
        self.counted_removed.clear();
    }
}
