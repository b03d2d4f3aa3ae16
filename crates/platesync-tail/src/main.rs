//! # platesync-tail
//!
//! Headless consumer of the sync layer: restores (or opens) a session,
//! loads the initial state and logs every state change until Ctrl+C.
//!
//! Credentials for a fresh login come from `PLATESYNC_EMAIL` and
//! `PLATESYNC_PASSWORD`; everything else is read by
//! [`ClientConfig::from_env`].

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use platesync_client::{ClientConfig, SessionPhase, StateChange, SyncClient};
use platesync_shared::types::FeedKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    platesync_client::init_tracing();
    info!("Starting platesync-tail v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let client = SyncClient::from_config(config).context("building sync client")?;
    let mut changes = client.subscribe();

    // -----------------------------------------------------------------------
    // 2. Session
    // -----------------------------------------------------------------------
    if client.start().await? == SessionPhase::Unauthenticated {
        let (Ok(email), Ok(password)) = (
            std::env::var("PLATESYNC_EMAIL"),
            std::env::var("PLATESYNC_PASSWORD"),
        ) else {
            bail!("no saved session; set PLATESYNC_EMAIL and PLATESYNC_PASSWORD to sign in");
        };
        client
            .login(&email, &password)
            .await
            .context("signing in")?;
    }

    if let Ok(device) = std::env::var("PLATESYNC_PUSH_TOKEN") {
        match client.register_push_token(&device).await {
            Ok(true) => info!("Push token registered"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Push token registration failed"),
        }
    }

    if let Err(e) = client.load_notifications().await {
        warn!(error = %e, "Could not load notifications");
    }

    info!(
        car = ?client.active_car(),
        feed = client.posts(FeedKind::News).len(),
        threads = client.threads().len(),
        unread = client.unread_notifications(),
        "Initial state loaded"
    );

    // -----------------------------------------------------------------------
    // 3. Tail until shutdown
    // -----------------------------------------------------------------------
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => log_change(&client, &change),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Observer lagged behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn log_change(client: &SyncClient, change: &StateChange) {
    let rendered = serde_json::to_string(change).unwrap_or_else(|_| format!("{change:?}"));
    match change {
        StateChange::Inbox => info!(change = %rendered, threads = client.threads().len(), "State changed"),
        StateChange::Notifications => info!(
            change = %rendered,
            unread = client.unread_notifications(),
            "State changed"
        ),
        StateChange::Messages(_) => info!(
            change = %rendered,
            messages = client.messages().len(),
            seen = ?client.seen_message(),
            "State changed"
        ),
        _ => info!(change = %rendered, "State changed"),
    }
}
