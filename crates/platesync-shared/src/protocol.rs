//! Realtime push protocol.
//!
//! The backend multiplexes every event for an authenticated user over one
//! WebSocket. Each text frame is a JSON envelope:
//!
//! ```json
//! {"type": "message", "payload": { ... }}
//! ```
//!
//! Payloads go through the same normalization boundary as REST records.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::constants::*;
use crate::error::NormalizeError;
use crate::models::{ChatMessage, Comment, Notification};
use crate::normalize::{
    normalize_comment, normalize_message, normalize_notification, Record, COMMENTS_KEYS,
    LIKED_KEYS, LIKES_KEYS,
};
use crate::types::{CarId, ChatId, CommentId, PostId};

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(alias = "event")]
    r#type: String,
    #[serde(default, alias = "data")]
    payload: Value,
}

/// A server-pushed event, already normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A chat message was delivered (including echoes of our own).
    Message(ChatMessage),
    /// An inbox entry changed. Kept raw because normalizing a thread needs
    /// the active car, which only the consumer knows.
    ThreadUpdated(Value),
    PostLiked {
        post_id: PostId,
        likes_count: Option<u32>,
        actor_car_id: Option<CarId>,
        liked: Option<bool>,
    },
    PostCommented {
        post_id: PostId,
        comment: Option<Comment>,
        comments_count: Option<u32>,
    },
    CommentDeleted {
        post_id: PostId,
        comment_id: CommentId,
        comments_count: Option<u32>,
    },
    ChatRead {
        chat_id: ChatId,
        reader_car_id: Option<CarId>,
        read_at: DateTime<Utc>,
    },
    Notification(Notification),
}

impl PushEvent {
    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for event types this client does not consume.
    pub fn decode(frame: &str) -> Result<Option<Self>, NormalizeError> {
        let envelope: Envelope =
            serde_json::from_str(frame).map_err(|e| NormalizeError::InvalidField {
                field: "envelope",
                reason: e.to_string(),
            })?;
        Self::from_parts(&envelope.r#type, &envelope.payload)
    }

    pub fn from_parts(event: &str, payload: &Value) -> Result<Option<Self>, NormalizeError> {
        let event = match event {
            EVENT_MESSAGE | "new_message" => Self::Message(normalize_message(payload)?),
            EVENT_THREAD_UPDATED | "chat_updated" => Self::ThreadUpdated(payload.clone()),
            EVENT_POST_LIKED => {
                let r = Record::new(payload)?;
                Self::PostLiked {
                    post_id: PostId(r.required_int("post_id", &["post_id", "postId"])?),
                    likes_count: r.count(LIKES_KEYS),
                    actor_car_id: r
                        .int(&["actor_car_id", "car_id", "liker_car_id"])
                        .map(CarId),
                    liked: r.flag(LIKED_KEYS),
                }
            }
            EVENT_POST_COMMENTED => {
                let r = Record::new(payload)?;
                let post_id = PostId(r.required_int("post_id", &["post_id", "postId"])?);
                let comment = match r.first(&["comment"]) {
                    Some(c) => Some(normalize_comment(c, Some(post_id))?),
                    None => None,
                };
                Self::PostCommented {
                    post_id,
                    comment,
                    comments_count: r.count(COMMENTS_KEYS),
                }
            }
            EVENT_COMMENT_DELETED => {
                let r = Record::new(payload)?;
                Self::CommentDeleted {
                    post_id: PostId(r.required_int("post_id", &["post_id", "postId"])?),
                    comment_id: CommentId(
                        r.required_int("comment_id", &["comment_id", "commentId", "id"])?,
                    ),
                    comments_count: r.count(COMMENTS_KEYS),
                }
            }
            EVENT_CHAT_READ => {
                let r = Record::new(payload)?;
                Self::ChatRead {
                    chat_id: ChatId(r.required_int("chat_id", &["chat_id", "chatId"])?),
                    reader_car_id: r.int(&["reader_car_id", "car_id", "readerCarId"]).map(CarId),
                    read_at: r
                        .time(&["read_at", "readAt", "last_read_at"])
                        .ok_or(NormalizeError::MissingField("read_at"))?,
                }
            }
            EVENT_NEW_NOTIFICATION | "notification" => {
                Self::Notification(normalize_notification(payload)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => EVENT_MESSAGE,
            Self::ThreadUpdated(_) => EVENT_THREAD_UPDATED,
            Self::PostLiked { .. } => EVENT_POST_LIKED,
            Self::PostCommented { .. } => EVENT_POST_COMMENTED,
            Self::CommentDeleted { .. } => EVENT_COMMENT_DELETED,
            Self::ChatRead { .. } => EVENT_CHAT_READ,
            Self::Notification(_) => EVENT_NEW_NOTIFICATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;

    #[test]
    fn test_decode_message_frame() {
        let frame = r#"{"type":"message","payload":{"id":9001,"chat_id":55,"sender_car_id":10,"text":"hello"}}"#;
        let event = PushEvent::decode(frame).unwrap().unwrap();
        match event {
            PushEvent::Message(m) => {
                assert_eq!(m.id, MessageId(9001));
                assert_eq!(m.chat_id, ChatId(55));
                assert_eq!(m.text, "hello");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_event_is_skipped() {
        let frame = r#"{"type":"typing","payload":{"chat_id":1}}"#;
        assert!(PushEvent::decode(frame).unwrap().is_none());
    }

    #[test]
    fn test_decode_post_liked_with_alias_fields() {
        let frame = r#"{"event":"post_liked","data":{"postId":7,"likes":5,"car_id":3}}"#;
        let event = PushEvent::decode(frame).unwrap().unwrap();
        assert_eq!(
            event,
            PushEvent::PostLiked {
                post_id: PostId(7),
                likes_count: Some(5),
                actor_car_id: Some(CarId(3)),
                liked: None,
            }
        );
        assert_eq!(event.name(), EVENT_POST_LIKED);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(PushEvent::decode("not json").is_err());
        let missing = r#"{"type":"chat_read","payload":{"chat_id":1}}"#;
        assert_eq!(
            PushEvent::decode(missing).unwrap_err(),
            NormalizeError::MissingField("read_at")
        );
    }
}
