//! The composed synchronization service.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use platesync_net::{
    ApiRequest, HttpTransport, RealtimeConnector, ReqwestTransport, WsConnector,
};
use platesync_shared::constants::STATE_CHANGE_CAPACITY;
use platesync_shared::models::Session;
use platesync_shared::types::{CarId, ConnectionMode};
use platesync_shared::NormalizeError;
use platesync_store::database::default_data_dir;
use platesync_store::{AvatarCache, Database, EntityStores};

use crate::bridge::RealtimeLink;
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::events::{StateChange, StateEvents};
use crate::state::{AppState, SessionPhase};

/// Keys under which list responses may be wrapped.
pub(crate) const LIST_KEYS: &[&str] = &["data", "items", "results"];

/// Session lifecycle, entity stores and reconciliation behind one handle.
///
/// Constructed once and cloned into every consumer; clones share state.
#[derive(Clone)]
pub struct SyncClient {
    state: Arc<Mutex<AppState>>,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) connector: Arc<dyn RealtimeConnector>,
    pub(crate) avatars: Arc<AvatarCache>,
    pub(crate) events: StateEvents,
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) realtime: Arc<Mutex<Option<RealtimeLink>>>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("api_url", &self.config.api_url)
            .field("phase", &self.phase())
            .finish()
    }
}

impl SyncClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn RealtimeConnector>,
        database: Database,
        avatars: AvatarCache,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(AppState::new(database))),
            transport,
            connector,
            avatars: Arc::new(avatars),
            events: StateEvents::new(STATE_CHANGE_CAPACITY),
            config: Arc::new(config),
            realtime: Arc::new(Mutex::new(None)),
        }
    }

    /// Build the production client: reqwest transport, WebSocket connector,
    /// SQLite database and avatar cache under the data directory.
    pub fn from_config(config: ClientConfig) -> Result<Self, SyncError> {
        let transport = ReqwestTransport::new(config.api_url.clone(), config.request_timeout)?;
        let connector = WsConnector::new(config.ws_url.clone())
            .with_queue_capacity(config.event_queue_capacity)
            .with_reconnect_max(config.reconnect_max);

        let data_dir: PathBuf = match config.data_dir.clone() {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        let database = Database::open_in(&data_dir)?;
        let avatars = AvatarCache::new(data_dir.join("avatars"));

        info!(api = %config.api_url, ws = %config.ws_url, data_dir = %data_dir.display(), "Sync client configured");

        Ok(Self::new(
            config,
            Arc::new(transport),
            Arc::new(connector),
            database,
            avatars,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Receive a [`StateChange`] for every store update from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    // -- State access -------------------------------------------------------

    /// Run `f` under the state lock. The closure must not block.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("State lock poisoned, recovering");
            poisoned.into_inner()
        });
        f(&mut guard)
    }

    /// Read the entity stores.
    pub fn read<R>(&self, f: impl FnOnce(&EntityStores) -> R) -> R {
        self.with_state(|state| f(&state.stores))
    }

    pub fn phase(&self) -> SessionPhase {
        self.with_state(|state| state.phase)
    }

    pub fn session(&self) -> Option<Session> {
        self.with_state(|state| state.session.clone())
    }

    pub fn active_car(&self) -> Option<CarId> {
        self.with_state(|state| state.active_car())
    }

    pub fn connection(&self) -> ConnectionMode {
        self.with_state(|state| state.connection)
    }

    /// Current token, by value.
    pub(crate) fn token(&self) -> Result<String, SyncError> {
        self.with_state(|state| state.token().map(str::to_string))
            .ok_or(SyncError::Unauthenticated)
    }

    /// Run `f` only if the session still holds `token`. A response that
    /// arrives after logout or a token change must not repopulate stores.
    pub(crate) fn with_state_for<R>(
        &self,
        token: &str,
        f: impl FnOnce(&mut AppState) -> R,
    ) -> Result<R, SyncError> {
        self.with_state(|state| {
            if state.token() == Some(token) {
                Ok(f(state))
            } else {
                debug!("Discarding response for a previous session");
                Err(SyncError::conflict("session changed while the request was in flight"))
            }
        })
    }

    /// Like [`Self::with_state_for`], and additionally requires that the
    /// active car is still `car`. Car-scoped lists must not land on another
    /// car.
    pub(crate) fn with_state_as<R>(
        &self,
        token: &str,
        car: CarId,
        f: impl FnOnce(&mut AppState) -> R,
    ) -> Result<R, SyncError> {
        self.with_state_for(token, |state| {
            if state.active_car() == Some(car) {
                Ok(f(state))
            } else {
                debug!(car = %car, "Discarding response for a previously active car");
                Err(SyncError::conflict("active car changed while the request was in flight"))
            }
        })?
    }

    /// Token plus the car the user is acting as.
    pub(crate) fn acting(&self) -> Result<(String, CarId), SyncError> {
        self.with_state(|state| match &state.session {
            None => Err(SyncError::Unauthenticated),
            Some(session) => match session.active_car_id {
                Some(car) => Ok((session.token.clone(), car)),
                None => Err(SyncError::conflict("no active car selected")),
            },
        })
    }

    // -- Network ------------------------------------------------------------

    /// Issue one request. Non-success statuses become [`SyncError::Server`].
    pub(crate) async fn call(&self, request: ApiRequest) -> Result<Value, SyncError> {
        let method = request.method.as_str();
        let path = request.path.clone();

        match self.transport.request(request).await {
            Err(e) => {
                warn!(method, path = %path, error = %e, "Request failed");
                Err(e.into())
            }
            Ok(resp) if !resp.is_ok() => {
                let message = resp.error_message();
                warn!(method, path = %path, status = resp.status, message = %message, "Request rejected");
                Err(SyncError::Server {
                    status: resp.status,
                    message,
                })
            }
            Ok(resp) => {
                debug!(method, path = %path, "Request succeeded");
                Ok(resp.body)
            }
        }
    }

    /// Issue one request with the session's current token.
    pub(crate) async fn call_authed(&self, request: ApiRequest) -> Result<Value, SyncError> {
        let token = self.token()?;
        self.call(request.with_token(token)).await
    }

    pub(crate) fn emit(&self, change: StateChange) {
        self.events.emit(change);
    }
}

/// The entity inside a response, which some routes wrap under `key`.
pub(crate) fn entity<'a>(body: &'a Value, key: &str) -> &'a Value {
    match body.get(key) {
        Some(inner) if inner.is_object() => inner,
        _ => match body.get("data") {
            Some(inner) if inner.is_object() => inner,
            _ => body,
        },
    }
}

/// Log list items that failed normalization and were skipped.
pub(crate) fn report_skipped(what: &'static str, errors: &[NormalizeError]) {
    for e in errors {
        warn!(what, error = %e, "Skipping malformed record");
    }
}
