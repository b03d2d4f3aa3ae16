pub mod api;
pub mod bridge;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod optimistic;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use bridge::PushOutcome;
pub use client::SyncClient;
pub use commands::chats::compute_seen;
pub use config::{ClientConfig, LikeCountPolicy};
pub use error::{ErrorKind, SyncError};
pub use events::StateChange;
pub use optimistic::{LikeState, LikeTarget};
pub use state::SessionPhase;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("platesync_client=debug,platesync_net=debug,platesync_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
