//! The single boundary between raw server payloads and local entities.
//!
//! The backend names the same field differently depending on the endpoint
//! (`is_liked_by_user` vs `is_liked_by_me`, `likes_count` vs `likes`, ...).
//! Every record goes through one of the `normalize_*` functions here, each of
//! which reads its fields through a fixed precedence list: the first key that
//! is present and not `null` wins. Nothing downstream looks at raw JSON.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::models::{
    Car, CarStats, CarSummary, ChatMessage, ChatThread, Comment, Notification, NotificationKind,
    Post, ReadMarker, User,
};
use crate::types::{
    CarId, ChatId, CommentId, MessageId, NotificationId, ParticipantPair, PostId, UserId,
};

// ---------------------------------------------------------------------------
// Precedence lists
// ---------------------------------------------------------------------------

pub const LIKED_KEYS: &[&str] = &[
    "is_liked_by_me",
    "isLikedByMe",
    "is_liked_by_user",
    "liked_by_me",
    "liked",
];
pub const LIKES_KEYS: &[&str] = &["likes_count", "likesCount", "like_count", "likes"];
pub const COMMENTS_KEYS: &[&str] = &[
    "comments_count",
    "commentsCount",
    "comment_count",
    "comments",
];
const CREATED_KEYS: &[&str] = &["created_at", "createdAt"];
const AUTHOR_CAR_KEYS: &[&str] = &["car_id", "carId", "author_car_id", "car.id"];

// ---------------------------------------------------------------------------
// Record accessor
// ---------------------------------------------------------------------------

/// Read-only view over a JSON object with precedence-aware getters.
///
/// Keys may be dotted paths (`"car.id"`) to reach into nested objects.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Record<'a> {
    pub fn new(value: &'a Value) -> Result<Self, NormalizeError> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or(NormalizeError::NotAnObject)
    }

    fn lookup(&self, key: &str) -> Option<&'a Value> {
        let mut parts = key.split('.');
        let mut current = self.map.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// First key that is present and not `null`.
    pub fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.lookup(k))
            .find(|v| !v.is_null())
    }

    pub fn int(&self, keys: &[&str]) -> Option<i64> {
        self.first(keys).and_then(value_to_i64)
    }

    pub fn required_int(&self, field: &'static str, keys: &[&str]) -> Result<i64, NormalizeError> {
        match self.first(keys) {
            None => Err(NormalizeError::MissingField(field)),
            Some(v) => value_to_i64(v).ok_or_else(|| NormalizeError::InvalidField {
                field,
                reason: format!("expected an integer, got {v}"),
            }),
        }
    }

    pub fn flag(&self, keys: &[&str]) -> Option<bool> {
        self.first(keys).and_then(value_to_bool)
    }

    pub fn count(&self, keys: &[&str]) -> Option<u32> {
        self.first(keys).and_then(value_to_count)
    }

    pub fn text(&self, keys: &[&str]) -> Option<String> {
        self.first(keys).and_then(value_to_string)
    }

    pub fn time(&self, keys: &[&str]) -> Option<DateTime<Utc>> {
        self.first(keys).and_then(value_to_time)
    }
}

// ---------------------------------------------------------------------------
// Value conversions
// ---------------------------------------------------------------------------

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// Arrays count as their length (e.g. `likes: [..likers..]`).
fn value_to_count(v: &Value) -> Option<u32> {
    match v {
        Value::Array(items) => Some(u32::try_from(items.len()).unwrap_or(u32::MAX)),
        other => value_to_i64(other).map(|i| i.clamp(0, u32::MAX as i64) as u32),
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_time(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_time(s),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Anything past year ~5000 in seconds is really milliseconds.
            if raw.abs() > 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn image_ref(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => Record::new(v).ok()?.text(&["url", "uri", "image_url", "path"]),
        _ => None,
    }
}

fn id_of(v: &Value) -> Option<i64> {
    match v {
        Value::Object(_) => Record::new(v).ok()?.int(&["id", "car_id"]),
        other => value_to_i64(other),
    }
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Items of a list response, accepted either bare or wrapped in an object
/// under one of `keys`. Anything else is an empty list.
pub fn list_items<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => keys
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

/// Normalize every item of a list response; malformed items are returned
/// separately so the caller can report them.
pub fn normalize_list<T, F>(value: &Value, keys: &[&str], f: F) -> (Vec<T>, Vec<NormalizeError>)
where
    F: Fn(&Value) -> Result<T, NormalizeError>,
{
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for item in list_items(value, keys) {
        match f(item) {
            Ok(v) => ok.push(v),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

pub fn normalize_post(value: &Value) -> Result<Post, NormalizeError> {
    let r = Record::new(value)?;

    let images = match r.first(&["images", "image_urls", "imageUrls", "image"]) {
        Some(Value::Array(items)) => items.iter().filter_map(image_ref).collect(),
        Some(single) => image_ref(single).into_iter().collect(),
        None => Vec::new(),
    };

    Ok(Post {
        id: PostId(r.required_int("id", &["id", "post_id", "postId"])?),
        author_car_id: CarId(r.required_int("car_id", AUTHOR_CAR_KEYS)?),
        author_plate: r.text(&["plate", "car.plate", "car.license_plate", "license_plate"]),
        description: r
            .text(&["description", "content", "caption"])
            .unwrap_or_default(),
        images,
        like_count: r.count(LIKES_KEYS).unwrap_or(0),
        comment_count: r.count(COMMENTS_KEYS).unwrap_or(0),
        liked_by_me: r.flag(LIKED_KEYS).unwrap_or(false),
        created_at: r.time(CREATED_KEYS).unwrap_or_else(Utc::now),
    })
}

/// `post_hint` fills in the post id for endpoints scoped to one post that
/// omit it from each comment.
pub fn normalize_comment(value: &Value, post_hint: Option<PostId>) -> Result<Comment, NormalizeError> {
    let r = Record::new(value)?;

    let post_id = match r.int(&["post_id", "postId"]) {
        Some(id) => PostId(id),
        None => post_hint.ok_or(NormalizeError::MissingField("post_id"))?,
    };

    Ok(Comment {
        id: CommentId(r.required_int("id", &["id", "comment_id", "commentId"])?),
        post_id,
        author_car_id: CarId(r.required_int("car_id", AUTHOR_CAR_KEYS)?),
        text: r.text(&["text", "content", "comment"]).unwrap_or_default(),
        like_count: r.count(LIKES_KEYS).unwrap_or(0),
        liked_by_me: r.flag(LIKED_KEYS).unwrap_or(false),
        created_at: r.time(CREATED_KEYS).unwrap_or_else(Utc::now),
    })
}

pub fn normalize_car(value: &Value) -> Result<Car, NormalizeError> {
    let r = Record::new(value)?;
    let plate = r
        .text(&["plate", "license_plate", "plate_number", "plateNumber"])
        .ok_or(NormalizeError::MissingField("plate"))?;

    Ok(Car {
        id: CarId(r.required_int("id", &["id", "car_id"])?),
        plate,
        bio: r.text(&["bio"]),
        avatar_url: r.text(&["avatar_url", "avatarUrl", "avatar", "image"]),
        owner_id: r.int(&["user_id", "owner_id", "userId"]).map(UserId),
    })
}

pub fn normalize_car_summary(value: &Value) -> Result<CarSummary, NormalizeError> {
    let r = Record::new(value)?;
    Ok(CarSummary {
        id: CarId(r.required_int("id", &["id", "car_id"])?),
        plate: r
            .text(&["plate", "license_plate", "plate_number", "plateNumber"])
            .unwrap_or_default(),
        avatar_url: r.text(&["avatar_url", "avatarUrl", "avatar", "image"]),
    })
}

pub fn normalize_stats(value: &Value) -> Result<CarStats, NormalizeError> {
    let r = Record::new(value)?;
    Ok(CarStats {
        posts: r.count(&["posts_count", "postsCount", "posts"]).unwrap_or(0),
        followers: r
            .count(&["followers_count", "followersCount", "followers"])
            .unwrap_or(0),
        following: r
            .count(&["following_count", "followingCount", "following"])
            .unwrap_or(0),
        followed_by_me: r
            .flag(&["is_following", "isFollowing", "followed_by_me"])
            .unwrap_or(false),
    })
}

pub fn normalize_user(value: &Value) -> Result<User, NormalizeError> {
    let r = Record::new(value)?;
    Ok(User {
        id: UserId(r.required_int("id", &["id", "user_id", "userId"])?),
        email: r.text(&["email"]).unwrap_or_default(),
    })
}

/// `me` is the active car; it is needed when the backend only describes the
/// other side of the conversation.
pub fn normalize_thread(value: &Value, me: Option<CarId>) -> Result<ChatThread, NormalizeError> {
    let r = Record::new(value)?;
    let id = ChatId(r.required_int("id", &["id", "chat_id", "chatId"])?);

    let other_car = r
        .first(&["other_car", "otherCar"])
        .filter(|v| v.is_object())
        .and_then(|v| normalize_car_summary(v).ok());

    let participants = thread_participants(&r, me, other_car.as_ref())
        .ok_or(NormalizeError::MissingField("participants"))?;

    // Fall back to whichever embedded car object is not us.
    let other_car = other_car.or_else(|| {
        let me = me?;
        ["car1", "car2", "car", "sender_car", "receiver_car"]
            .iter()
            .filter_map(|k| r.lookup(k))
            .filter(|v| v.is_object())
            .filter_map(|v| normalize_car_summary(v).ok())
            .find(|c| c.id != me && participants.contains(c.id))
    });

    let last_message_text = match r.first(&[
        "last_message_text",
        "lastMessageText",
        "last_message",
        "lastMessage",
    ]) {
        Some(v @ Value::Object(_)) => Record::new(v)?.text(&["text", "content", "message"]),
        Some(v) => value_to_string(v),
        None => None,
    };

    let has_unread = r
        .flag(&["has_unread", "hasUnread", "unread", "is_unread"])
        .or_else(|| r.count(&["unread_count", "unreadCount"]).map(|n| n > 0))
        .unwrap_or(false);

    Ok(ChatThread {
        id,
        participants,
        last_message_text,
        has_unread,
        other_car,
        updated_at: r.time(&["updated_at", "updatedAt", "last_message_at", "created_at"]),
        pending: false,
    })
}

fn thread_participants(
    r: &Record<'_>,
    me: Option<CarId>,
    other_car: Option<&CarSummary>,
) -> Option<ParticipantPair> {
    if let Some(Value::Array(items)) = r.first(&["participant_car_ids", "participants"]) {
        let ids: Vec<i64> = items.iter().filter_map(id_of).collect();
        if ids.len() >= 2 {
            return Some(ParticipantPair::new(CarId(ids[0]), CarId(ids[1])));
        }
    }

    let pairs: [(&[&str], &[&str]); 3] = [
        (&["car1_id", "car1.id"], &["car2_id", "car2.id"]),
        (&["car_id", "sender_car_id"], &["other_car_id", "receiver_car_id"]),
        (&["user1_car_id"], &["user2_car_id"]),
    ];
    for (a, b) in pairs {
        if let (Some(a), Some(b)) = (r.int(a), r.int(b)) {
            return Some(ParticipantPair::new(CarId(a), CarId(b)));
        }
    }

    match (me, other_car) {
        (Some(me), Some(other)) => Some(ParticipantPair::new(me, other.id)),
        _ => None,
    }
}

pub fn normalize_message(value: &Value) -> Result<ChatMessage, NormalizeError> {
    let r = Record::new(value)?;
    Ok(ChatMessage {
        id: MessageId(r.required_int("id", &["id", "message_id", "messageId"])?),
        chat_id: ChatId(r.required_int("chat_id", &["chat_id", "chatId", "thread_id"])?),
        sender_car_id: CarId(r.required_int(
            "sender_car_id",
            &["sender_car_id", "senderCarId", "sender_id", "senderId", "car_id"],
        )?),
        text: r.text(&["text", "content", "message"]).unwrap_or_default(),
        created_at: r.time(CREATED_KEYS).unwrap_or_else(Utc::now),
    })
}

pub fn normalize_notification(value: &Value) -> Result<Notification, NormalizeError> {
    let r = Record::new(value)?;
    let kind_raw = r
        .text(&["type", "kind"])
        .ok_or(NormalizeError::MissingField("type"))?;
    let kind = NotificationKind::parse(&kind_raw).ok_or_else(|| NormalizeError::InvalidField {
        field: "type",
        reason: format!("unknown notification type {kind_raw:?}"),
    })?;

    Ok(Notification {
        id: NotificationId(r.required_int("id", &["id", "notification_id"])?),
        kind,
        actor_car_id: CarId(r.required_int(
            "actor_car_id",
            &["actor_car_id", "actorCarId", "actor_id", "from_car_id", "actor.id"],
        )?),
        recipient_car_id: CarId(r.required_int(
            "recipient_car_id",
            &["recipient_car_id", "recipientCarId", "to_car_id", "car_id"],
        )?),
        post_id: r.int(&["post_id", "postId", "subject_post_id"]).map(PostId),
        is_read: r.flag(&["is_read", "isRead", "read"]).unwrap_or(false),
        created_at: r.time(CREATED_KEYS).unwrap_or_else(Utc::now),
    })
}

pub fn normalize_read_marker(value: &Value, chat_id: ChatId) -> Result<ReadMarker, NormalizeError> {
    let r = Record::new(value)?;
    Ok(ReadMarker {
        chat_id,
        other_last_read_at: r.time(&[
            "other_last_read_at",
            "otherLastReadAt",
            "last_read_at",
            "lastReadAt",
            "read_at",
        ]),
    })
}
