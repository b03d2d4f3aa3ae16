//! Test doubles: a scripted HTTP transport and an in-memory realtime
//! connector, plus a harness wiring them into a [`SyncClient`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use platesync_net::{
    ApiRequest, ApiResponse, ChannelEvent, ChannelHandle, HttpTransport, Method, RealtimeChannel,
    RealtimeConnector,
};
use platesync_shared::models::{Car, ChatThread, Comment, Post, Session, User};
use platesync_shared::types::{CarId, ChatId, CommentId, ParticipantPair, PostId, UserId};
use platesync_shared::TransportError;
use platesync_store::{AvatarCache, Database};

use crate::client::SyncClient;
use crate::config::ClientConfig;
use crate::events::StateChange;
use crate::state::SessionPhase;

type Scripted = Result<ApiResponse, TransportError>;
type Hook = Box<dyn Fn() + Send + Sync>;

fn route_key(method: Method, path: &str) -> String {
    format!("{} {}", method.as_str(), path)
}

/// Replays scripted responses per `METHOD path`. The last response queued
/// for a route keeps being served; unknown routes answer 404.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<ApiRequest>>,
    before_reply: Mutex<Option<Hook>>,
}

impl MockTransport {
    pub(crate) fn on(&self, method: Method, path: &str, status: u16, body: Value) {
        self.script(method, path, Ok(ApiResponse::new(status, body)));
    }

    pub(crate) fn fail(&self, method: Method, path: &str, error: TransportError) {
        self.script(method, path, Err(error));
    }

    fn script(&self, method: Method, path: &str, response: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(route_key(method, path))
            .or_default()
            .push_back(response);
    }

    /// Run `hook` once per request, before the scripted reply is handed
    /// back. Stands in for whatever happens while a request is in flight.
    pub(crate) fn before_reply(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_reply.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn serve_bytes(&self, url: &str, bytes: &[u8]) {
        self.bytes.lock().unwrap().insert(url.to_string(), bytes.to_vec());
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let key = route_key(request.method, &request.path);
        self.requests.lock().unwrap().push(request);
        if let Some(hook) = self.before_reply.lock().unwrap().as_ref() {
            hook();
        }

        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Ok(ApiResponse::new(404, json!({ "error": format!("no route {key}") }))),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(TransportError::HttpStatus(404))
    }
}

/// Hands out channels whose producer side stays with the test.
#[derive(Default)]
pub(crate) struct MemoryConnector {
    senders: Mutex<Vec<mpsc::Sender<ChannelEvent>>>,
    tokens: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Deliver an event on the most recent channel.
    pub(crate) fn push(&self, event: ChannelEvent) {
        let senders = self.senders.lock().unwrap();
        let tx = senders.last().expect("no channel connected");
        tx.try_send(event).expect("channel queue full or closed");
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    /// Whether the consumer side of the latest channel is gone.
    pub(crate) fn latest_closed(&self) -> bool {
        self.senders
            .lock()
            .unwrap()
            .last()
            .map(|tx| tx.is_closed())
            .unwrap_or(true)
    }
}

#[async_trait]
impl RealtimeConnector for MemoryConnector {
    async fn connect(&self, token: &str) -> Result<RealtimeChannel, TransportError> {
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(event_tx);
        self.tokens.lock().unwrap().push(token.to_string());
        Ok(RealtimeChannel::new(ChannelHandle::new(cmd_tx, None), event_rx))
    }
}

pub(crate) struct Harness {
    pub client: SyncClient,
    pub http: Arc<MockTransport>,
    pub realtime: Arc<MemoryConnector>,
    pub dir: tempfile::TempDir,
}

pub(crate) fn harness() -> Harness {
    harness_with(ClientConfig::default())
}

pub(crate) fn harness_with(config: ClientConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let http = Arc::new(MockTransport::default());
    let realtime = Arc::new(MemoryConnector::default());
    let client = SyncClient::new(
        config,
        http.clone(),
        realtime.clone(),
        Database::open_in_memory().unwrap(),
        AvatarCache::new(dir.path().join("avatars")),
    );
    Harness {
        client,
        http,
        realtime,
        dir,
    }
}

impl Harness {
    /// Install an authenticated session acting as `car`, without network.
    pub(crate) fn sign_in(&self, car: CarId) {
        self.client.with_state(|s| {
            s.session = Some(Session {
                user: User {
                    id: UserId(1),
                    email: "driver@example.com".into(),
                },
                token: "tok".into(),
                active_car_id: Some(car),
            });
            s.phase = SessionPhase::Authenticated;
            s.stores.cars.replace_mine(vec![test_car(car.0, "AA111")]);
        });
    }
}

pub(crate) fn test_car(id: i64, plate: &str) -> Car {
    Car {
        id: CarId(id),
        plate: plate.into(),
        bio: None,
        avatar_url: None,
        owner_id: Some(UserId(1)),
    }
}

pub(crate) fn post(id: i64, likes: u32, liked: bool) -> Post {
    Post {
        id: PostId(id),
        author_car_id: CarId(20),
        author_plate: None,
        description: format!("post {id}"),
        images: Vec::new(),
        like_count: likes,
        comment_count: 0,
        liked_by_me: liked,
        created_at: Utc.timestamp_opt(1_000, 0).unwrap(),
    }
}

pub(crate) fn comment(id: i64, post: i64, car: i64) -> Comment {
    Comment {
        id: CommentId(id),
        post_id: PostId(post),
        author_car_id: CarId(car),
        text: format!("comment {id}"),
        like_count: 0,
        liked_by_me: false,
        created_at: Utc.timestamp_opt(2_000 + id, 0).unwrap(),
    }
}

pub(crate) fn thread(id: i64, a: i64, b: i64) -> ChatThread {
    ChatThread {
        id: ChatId(id),
        participants: ParticipantPair::new(CarId(a), CarId(b)),
        last_message_text: None,
        has_unread: false,
        other_car: None,
        updated_at: None,
        pending: id < 0,
    }
}

/// Wait (bounded) until a matching change is observed.
pub(crate) async fn wait_for<F: Fn(&StateChange) -> bool>(
    rx: &mut broadcast::Receiver<StateChange>,
    pred: F,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(change) if pred(&change) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("state events closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for state change");
}
