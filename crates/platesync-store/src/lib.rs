//! # platesync-store
//!
//! Client-side state for platesync.
//!
//! Two halves live here:
//! - the in-memory entity stores (posts, comments, chat threads, the active
//!   chat's messages, read markers, notifications, cars). They never block or
//!   touch the disk; callers serialize access.
//! - local persistence: a small SQLite database holding the session and
//!   device settings, and the on-disk avatar image cache.

pub mod avatars;
pub mod cars;
pub mod comments;
pub mod database;
pub mod markers;
pub mod messages;
pub mod migrations;
pub mod notifications;
pub mod posts;
pub mod session;
pub mod settings;
pub mod threads;

mod error;

pub use avatars::AvatarCache;
pub use cars::CarStore;
pub use comments::CommentStore;
pub use database::Database;
pub use error::StoreError;
pub use markers::ReadMarkerStore;
pub use messages::MessageStore;
pub use notifications::NotificationStore;
pub use posts::PostStore;
pub use threads::ThreadStore;

/// Every in-memory entity store, owned together so a logout can clear them
/// in one step.
#[derive(Debug, Default, Clone)]
pub struct EntityStores {
    pub posts: PostStore,
    pub comments: CommentStore,
    pub threads: ThreadStore,
    pub messages: MessageStore,
    pub markers: ReadMarkerStore,
    pub notifications: NotificationStore,
    pub cars: CarStore,
}

impl EntityStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.posts.clear();
        self.comments.clear();
        self.threads.clear();
        self.messages.deactivate();
        self.markers.clear();
        self.notifications.clear();
        self.cars.clear();
    }
}
