//! Types shared by every platesync crate: identifiers, entity models, the
//! realtime push protocol, and the normalization boundary for server records.

pub mod constants;
pub mod error;
pub mod models;
pub mod normalize;
pub mod protocol;
pub mod types;

pub use error::{NormalizeError, TransportError};
pub use types::*;
