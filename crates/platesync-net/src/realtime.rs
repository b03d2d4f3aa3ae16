//! Realtime push channel with a tokio mpsc command/event pattern.
//!
//! One background task owns the WebSocket. Consumers read [`ChannelEvent`]s
//! from a bounded, ordered queue and stop the task through a
//! [`ChannelHandle`]. The task reconnects on its own after a drop; it does
//! not queue or replay anything missed while disconnected.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use platesync_shared::constants::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_RECONNECT_MAX_SECS, RECONNECT_STEP_SECS,
};
use platesync_shared::protocol::PushEvent;
use platesync_shared::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the channel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    Shutdown,
}

/// Events sent *from* the channel task to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Push(PushEvent),
}

/// Owning handle to a channel task. Dropping it disconnects.
#[derive(Debug)]
pub struct ChannelHandle {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl ChannelHandle {
    pub fn new(cmd_tx: mpsc::Sender<ChannelCommand>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            cmd_tx,
            task,
            closed: false,
        }
    }

    /// Stop the channel task. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.cmd_tx.try_send(ChannelCommand::Shutdown);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("Realtime channel disconnected");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// A connected realtime channel: the stop handle plus the inbound queue.
#[derive(Debug)]
pub struct RealtimeChannel {
    handle: ChannelHandle,
    events: mpsc::Receiver<ChannelEvent>,
}

impl RealtimeChannel {
    pub fn new(handle: ChannelHandle, events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { handle, events }
    }

    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn disconnect(&mut self) {
        self.handle.disconnect();
        self.events.close();
    }

    /// Split so the queue can be drained by one task while another keeps the
    /// ability to disconnect.
    pub fn into_parts(self) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
        (self.handle, self.events)
    }
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open a channel authenticated with `token`.
    async fn connect(&self, token: &str) -> Result<RealtimeChannel, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Connects to the backend's WebSocket endpoint, passing the token as a
/// query parameter.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    queue_capacity: usize,
    reconnect_max: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            reconnect_max: Duration::from_secs(DEFAULT_RECONNECT_MAX_SECS),
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_reconnect_max(mut self, max: Duration) -> Self {
        self.reconnect_max = max;
        self
    }

    fn url_with_token(&self, token: &str) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.url, sep, urlencoding::encode(token))
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<RealtimeChannel, TransportError> {
        let url = self.url_with_token(token);

        info!(url = %self.url, "Opening realtime channel");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Realtime(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<ChannelCommand>(8);
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(self.queue_capacity);

        let task = tokio::spawn(socket_loop(url, ws, event_tx, cmd_rx, self.reconnect_max));

        Ok(RealtimeChannel::new(
            ChannelHandle::new(cmd_tx, Some(task)),
            event_rx,
        ))
    }
}

enum PumpExit {
    /// Shutdown requested or the consumer went away.
    Stop,
    /// The socket closed or failed; try again.
    Dropped,
}

/// Linear backoff, capped.
pub fn reconnect_delay(attempt: u64, max: Duration) -> Duration {
    Duration::from_secs(attempt.saturating_mul(RECONNECT_STEP_SECS)).min(max)
}

async fn socket_loop(
    url: String,
    ws: WsStream,
    event_tx: mpsc::Sender<ChannelEvent>,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    reconnect_max: Duration,
) {
    let mut current = Some(ws);
    let mut attempt: u64 = 0;

    loop {
        if let Some(ws) = current.take() {
            if event_tx.send(ChannelEvent::Connected).await.is_err() {
                break;
            }
            match pump(ws, &event_tx, &mut cmd_rx).await {
                PumpExit::Stop => break,
                PumpExit::Dropped => {
                    if event_tx.send(ChannelEvent::Disconnected).await.is_err() {
                        break;
                    }
                }
            }
        }

        attempt += 1;
        let delay = reconnect_delay(attempt, reconnect_max);
        info!(?delay, attempt, "Realtime channel will reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Shutdown) | None => break,
            },
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(attempt, "Realtime channel reconnected");
                attempt = 0;
                current = Some(ws);
            }
            Err(e) => warn!(error = %e, attempt, "Realtime reconnect failed"),
        }
    }

    info!("Realtime channel task terminated");
}

async fn pump(
    ws: WsStream,
    event_tx: &mpsc::Sender<ChannelEvent>,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ChannelCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::Stop;
                    }
                }
            }

            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Realtime socket closed by server");
                        return PumpExit::Dropped;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Realtime socket error");
                        return PumpExit::Dropped;
                    }
                    None => return PumpExit::Dropped,
                };

                match PushEvent::decode(&text) {
                    Ok(Some(event)) => {
                        debug!(event = event.name(), "Push event received");
                        if event_tx.send(ChannelEvent::Push(event)).await.is_err() {
                            return PumpExit::Stop;
                        }
                    }
                    Ok(None) => debug!("Ignoring unconsumed push event type"),
                    Err(e) => warn!(error = %e, "Dropping undecodable push frame"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_with_token() {
        let c = WsConnector::new("ws://localhost:3000/ws");
        assert_eq!(c.url_with_token("a b"), "ws://localhost:3000/ws?token=a%20b");
        let c = WsConnector::new("ws://localhost:3000/ws?v=2");
        assert_eq!(c.url_with_token("t"), "ws://localhost:3000/ws?v=2&token=t");
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let max = Duration::from_secs(30);
        assert_eq!(reconnect_delay(1, max), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5, max), Duration::from_secs(10));
        assert_eq!(reconnect_delay(100, max), max);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_closes_queue() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        let mut channel = RealtimeChannel::new(ChannelHandle::new(cmd_tx, None), event_rx);

        event_tx.send(ChannelEvent::Connected).await.unwrap();
        assert_eq!(channel.recv().await, Some(ChannelEvent::Connected));

        channel.disconnect();
        channel.disconnect();

        assert_eq!(cmd_rx.recv().await, Some(ChannelCommand::Shutdown));
        assert!(cmd_rx.try_recv().is_err());
        assert!(event_tx.send(ChannelEvent::Disconnected).await.is_err());
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_task() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (alive_tx, mut alive_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        drop(ChannelHandle::new(cmd_tx, Some(task)));

        // The aborted task drops its sender.
        assert_eq!(alive_rx.recv().await, None);
    }
}
