//! Process-wide client state.
//!
//! The [`AppState`] struct lives behind `Arc<Mutex<>>` inside
//! [`crate::SyncClient`]. Every access is a short scoped lock that is never
//! held across an `.await`, so each store mutation runs to completion before
//! the next one starts.

use serde::Serialize;

use platesync_shared::models::Session;
use platesync_shared::types::{CarId, ChatId, ConnectionMode};
use platesync_store::{Database, EntityStores};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    /// Loading a persisted session at startup.
    Restoring,
    Authenticated,
}

pub struct AppState {
    /// `None` until logged in or restored. Token and user come and go
    /// together.
    pub session: Option<Session>,

    pub phase: SessionPhase,

    /// Realtime channel status.
    pub connection: ConnectionMode,

    pub stores: EntityStores,

    /// Handle to the local session/settings database.
    pub database: Database,

    /// Source of temporary ids for threads not yet confirmed by the backend.
    next_local_chat: i64,
}

impl AppState {
    pub fn new(database: Database) -> Self {
        Self {
            session: None,
            phase: SessionPhase::Unauthenticated,
            connection: ConnectionMode::Disconnected,
            stores: EntityStores::new(),
            database,
            next_local_chat: 0,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub fn active_car(&self) -> Option<CarId> {
        self.session.as_ref().and_then(|s| s.active_car_id)
    }

    /// A fresh negative chat id.
    pub fn next_local_chat_id(&mut self) -> ChatId {
        self.next_local_chat -= 1;
        ChatId(self.next_local_chat)
    }
}
