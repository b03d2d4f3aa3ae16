use thiserror::Error;

use platesync_shared::{NormalizeError, TransportError};
use platesync_store::StoreError;

/// Errors surfaced by [`crate::SyncClient`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable response was obtained.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend answered with a non-success status.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Bad input, rejected before reaching the network.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The operation does not fit the current local state.
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Not logged in")]
    Unauthenticated,

    /// Local persistence (session database, avatar cache) failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Coarse classification used for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Server,
    Validation,
    StateConflict,
    Persistence,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Server { .. } => ErrorKind::Server,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::StateConflict(_) | SyncError::Unauthenticated => ErrorKind::StateConflict,
            SyncError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether the failure happened locally, without any network traffic.
    pub fn is_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::StateConflict | ErrorKind::Persistence
        )
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        SyncError::StateConflict(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }
}

/// A success response whose body cannot be understood is as useless as a
/// malformed one.
impl From<NormalizeError> for SyncError {
    fn from(e: NormalizeError) -> Self {
        SyncError::Transport(e.into())
    }
}
