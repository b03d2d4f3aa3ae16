//! Operations exposed to the presentation layer, grouped by entity.
//!
//! Each submodule adds an `impl SyncClient` block. Reads replace store
//! contents only on success; optimistic writes go through
//! [`crate::optimistic`]; other writes touch the stores after the backend
//! confirmed them.

pub mod avatars;
pub mod cars;
pub mod chats;
pub mod comments;
pub mod feed;
pub mod notifications;
