use serde::{Deserialize, Serialize};

// Server-assigned identifiers are plain 64-bit integers on the wire.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Account identity.
    UserId
);
id_type!(
    /// A registered car profile. Every social action is performed as a car.
    CarId
);
id_type!(PostId);
id_type!(CommentId);
id_type!(
    /// Chat thread id. Negative values are local placeholders for threads
    /// that the backend has not confirmed yet.
    ChatId
);
id_type!(MessageId);
id_type!(NotificationId);

impl ChatId {
    pub fn is_local(&self) -> bool {
        self.0 < 0
    }
}

/// Unordered pair of car ids taking part in a chat.
///
/// Stored as `(min, max)` so `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantPair(CarId, CarId);

impl ParticipantPair {
    pub fn new(a: CarId, b: CarId) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn contains(&self, car: CarId) -> bool {
        self.0 == car || self.1 == car
    }

    /// The participant that is not `me`, if `me` is part of the pair.
    pub fn other(&self, me: CarId) -> Option<CarId> {
        if self.0 == me {
            Some(self.1)
        } else if self.1 == me {
            Some(self.0)
        } else {
            None
        }
    }

    pub fn cars(&self) -> (CarId, CarId) {
        (self.0, self.1)
    }
}

/// A feed collection. Collections are ordered views over the post store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Global news feed.
    News,
    /// Posts from cars the active car follows.
    Following,
    /// Posts authored by one car.
    Car(CarId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionMode {
    Connected,
    Disconnected,
}
