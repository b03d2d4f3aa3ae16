//! Entity models held by the client stores.
//!
//! Server payloads never deserialize into these directly; they pass through
//! [`crate::normalize`] first. The serde derives exist for persistence and
//! for handing entities to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CarId, ChatId, CommentId, MessageId, NotificationId, ParticipantPair, PostId, UserId,
};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

/// An authenticated session. The token exists exactly when the user does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: User,
    pub token: String,
    /// The car the user is currently acting as.
    pub active_car_id: Option<CarId>,
}

// ---------------------------------------------------------------------------
// Cars
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Car {
    pub id: CarId,
    pub plate: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub owner_id: Option<UserId>,
}

/// Display info for a car seen from someone else's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarSummary {
    pub id: CarId,
    pub plate: String,
    pub avatar_url: Option<String>,
}

impl From<&Car> for CarSummary {
    fn from(c: &Car) -> Self {
        Self {
            id: c.id,
            plate: c.plate.clone(),
            avatar_url: c.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarStats {
    pub posts: u32,
    pub followers: u32,
    pub following: u32,
    /// Whether the active car follows this car.
    pub followed_by_me: bool,
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub author_car_id: CarId,
    pub author_plate: Option<String>,
    pub description: String,
    pub images: Vec<String>,
    pub like_count: u32,
    pub comment_count: u32,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_car_id: CarId,
    pub text: String,
    pub like_count: u32,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Inbox entry for a conversation between two cars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatThread {
    pub id: ChatId,
    pub participants: ParticipantPair,
    pub last_message_text: Option<String>,
    pub has_unread: bool,
    pub other_car: Option<CarSummary>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Created locally, not yet confirmed by the backend.
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_car_id: CarId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// How far the other participant of a chat has read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadMarker {
    pub chat_id: ChatId,
    pub other_last_read_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "like" | "post_like" => Some(Self::Like),
            "comment" | "post_comment" => Some(Self::Comment),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub actor_car_id: CarId,
    pub recipient_car_id: CarId,
    pub post_id: Option<PostId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
