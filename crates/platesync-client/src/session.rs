//! Session lifecycle: restore at startup, login/register, logout, active car
//! switching and token rotation.
//!
//! Phases move `Unauthenticated -> Authenticated` on login, and
//! `Restoring -> Authenticated | Unauthenticated` at startup. Logout always
//! ends in `Unauthenticated` with every store empty.

use serde_json::Value;
use tracing::{info, warn};

use platesync_net::ApiRequest;
use platesync_shared::constants::MIN_PASSWORD_LEN;
use platesync_shared::models::{Session, User};
use platesync_shared::normalize::{normalize_user, Record};
use platesync_shared::types::{CarId, FeedKind};
use platesync_shared::NormalizeError;
use platesync_store::settings::RegisteredPushToken;

use crate::api;
use crate::client::SyncClient;
use crate::error::SyncError;
use crate::events::StateChange;
use crate::state::SessionPhase;

const TOKEN_KEYS: &[&str] = &["token", "access_token", "accessToken", "jwt"];
const ACTIVE_CAR_KEYS: &[&str] = &["active_car_id", "activeCarId", "user.active_car_id"];

/// Token, user and (if the backend says) the active car from an auth
/// response.
fn parse_auth(body: &Value, email: &str) -> Result<(User, String, Option<CarId>), SyncError> {
    let body = match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    };
    let record = Record::new(body)?;
    let token = record
        .text(TOKEN_KEYS)
        .filter(|t| !t.is_empty())
        .ok_or(NormalizeError::MissingField("token"))?;

    let user_value = match body.get("user") {
        Some(user) if user.is_object() => user,
        _ => body,
    };
    let mut user = normalize_user(user_value)?;
    if user.email.is_empty() {
        user.email = email.to_string();
    }
    Ok((user, token, record.int(ACTIVE_CAR_KEYS).map(CarId)))
}

fn validate_email(email: &str) -> Result<&str, SyncError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(SyncError::invalid("a valid email is required"));
    }
    Ok(email)
}

fn is_unauthorized(e: &SyncError) -> bool {
    matches!(e, SyncError::Server { status: 401, .. })
}

impl SyncClient {
    /// Restore the persisted session, if any, and bring the stores up.
    ///
    /// A persisted token the backend rejects with 401 ends in a logout.
    pub async fn start(&self) -> Result<SessionPhase, SyncError> {
        self.set_phase(SessionPhase::Restoring);
        let restored = self.with_state(|state| state.database.load_session());

        let session = match restored {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!("No persisted session");
                self.set_phase(SessionPhase::Unauthenticated);
                return Ok(SessionPhase::Unauthenticated);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                self.set_phase(SessionPhase::Unauthenticated);
                return Err(e.into());
            }
        };

        info!(user = %session.user.id, "Restoring session");
        let token = session.token.clone();
        let active = session.active_car_id;
        self.with_state(|state| state.session = Some(session));
        self.emit(StateChange::ActiveCar(active));

        if let Err(e) = self.populate().await {
            if is_unauthorized(&e) {
                warn!("Persisted session was rejected, signing out");
                self.logout().await?;
                return Ok(SessionPhase::Unauthenticated);
            }
        }

        self.set_phase(SessionPhase::Authenticated);
        self.connect_or_warn(&token).await;
        Ok(SessionPhase::Authenticated)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, SyncError> {
        let email = validate_email(email)?;
        if password.is_empty() {
            return Err(SyncError::invalid("password is required"));
        }
        self.authenticate(api::login(email, password), email).await
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Session, SyncError> {
        let email = validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SyncError::invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        self.authenticate(api::register(email, password), email).await
    }

    async fn authenticate(&self, request: ApiRequest, email: &str) -> Result<Session, SyncError> {
        if self.phase() == SessionPhase::Authenticated {
            return Err(SyncError::conflict("already signed in"));
        }

        let body = self.call(request).await?;
        let (user, token, active_car_id) = parse_auth(&body, email)?;
        let session = Session {
            user,
            token: token.clone(),
            active_car_id,
        };

        self.with_state(|state| {
            state.stores.clear();
            state.session = Some(session.clone());
            state.phase = SessionPhase::Authenticated;
        });
        if let Err(e) = self.persist_session() {
            warn!(error = %e, "Could not persist session");
        }
        self.events.emit_all([
            StateChange::Session(SessionPhase::Authenticated),
            StateChange::ActiveCar(active_car_id),
        ]);
        info!(user = %session.user.id, "Signed in");

        if let Err(e) = self.populate().await {
            warn!(error = %e, "Initial load after sign-in incomplete");
        }
        self.connect_or_warn(&token).await;
        Ok(self.session().unwrap_or(session))
    }

    /// Load what every screen needs: own cars first (they decide the active
    /// car), then the news feed and the inbox side by side.
    ///
    /// Individual failures are logged and skipped; only an authorization
    /// failure is returned.
    async fn populate(&self) -> Result<(), SyncError> {
        let cars = self.load_my_cars().await.map(drop);
        let inbox = async {
            if self.active_car().is_some() {
                self.refresh_inbox().await.map(drop)
            } else {
                Ok(())
            }
        };
        let (feed, inbox) = tokio::join!(self.load_feed(FeedKind::News), inbox);

        let mut first_auth_error = None;
        for result in [cars, feed.map(drop), inbox] {
            match result {
                Ok(()) => {}
                Err(e) if is_unauthorized(&e) => {
                    first_auth_error.get_or_insert(e);
                }
                Err(e) => warn!(error = %e, "Initial load step failed"),
            }
        }
        match first_auth_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the session and everything derived from it.
    pub async fn logout(&self) -> Result<(), SyncError> {
        self.disconnect_realtime();

        let persisted = self.with_state(|state| {
            state.stores.clear();
            state.session = None;
            state.phase = SessionPhase::Unauthenticated;
            state
                .database
                .clear_session()
                .and_then(|_| state.database.forget_push_token())
        });
        let avatars = self.avatars.clear().await;

        self.events.emit_all([
            StateChange::Cleared,
            StateChange::Session(SessionPhase::Unauthenticated),
            StateChange::ActiveCar(None),
        ]);
        info!("Signed out");

        persisted?;
        avatars?;
        Ok(())
    }

    /// Act as another of the user's cars. Everything computed relative to
    /// the previous car is dropped.
    pub async fn set_active_car(&self, car: CarId) -> Result<(), SyncError> {
        let token = self.token()?;
        if !self.read(|stores| stores.cars.owns(car)) {
            return Err(SyncError::conflict(format!("car {car} is not yours")));
        }
        if self.active_car() == Some(car) {
            return Ok(());
        }

        self.call(api::set_active_car(car).with_token(token.clone()))
            .await?;

        self.with_state_for(&token, |state| {
            if let Some(session) = state.session.as_mut() {
                session.active_car_id = Some(car);
            }
            let stores = &mut state.stores;
            stores.posts.invalidate(FeedKind::Following);
            stores.cars.invalidate_scoped();
            stores.notifications.clear();
            stores.messages.deactivate();
            stores.threads.clear();
            stores.markers.clear();
        })?;
        self.persist_session()?;

        self.events.emit_all([
            StateChange::ActiveCar(Some(car)),
            StateChange::Feed(FeedKind::Following),
            StateChange::Cars,
            StateChange::Inbox,
            StateChange::Notifications,
        ]);
        info!(car = %car, "Active car switched");
        Ok(())
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), SyncError> {
        if new.chars().count() < MIN_PASSWORD_LEN {
            return Err(SyncError::invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if new == current {
            return Err(SyncError::invalid("new password must differ from the current one"));
        }

        let body = self.call_authed(api::change_password(current, new)).await?;
        info!("Password changed");

        // Some backends rotate the token on password change.
        let rotated = Record::new(&body)
            .ok()
            .and_then(|r| r.text(TOKEN_KEYS))
            .filter(|t| !t.is_empty());
        if let Some(token) = rotated {
            self.replace_token(token).await?;
        }
        Ok(())
    }

    /// Swap in a refreshed token and reconnect the realtime channel with it.
    pub async fn replace_token(&self, token: String) -> Result<(), SyncError> {
        if token.is_empty() {
            return Err(SyncError::invalid("token is empty"));
        }
        self.with_state(|state| match state.session.as_mut() {
            Some(session) => {
                session.token = token.clone();
                Ok(())
            }
            None => Err(SyncError::Unauthenticated),
        })?;
        self.persist_session()?;
        info!("Session token replaced");
        self.connect_or_warn(&token).await;
        Ok(())
    }

    /// Register this device for push delivery. Skipped when the same token
    /// is already registered for the signed-in user; returns whether a
    /// request was made.
    pub async fn register_push_token(&self, device_token: &str) -> Result<bool, SyncError> {
        if device_token.is_empty() {
            return Err(SyncError::invalid("push token is empty"));
        }
        let user_id = self
            .session()
            .map(|s| s.user.id)
            .ok_or(SyncError::Unauthenticated)?;
        let wanted = RegisteredPushToken {
            user_id,
            token: device_token.to_string(),
        };

        let known = self.with_state(|state| state.database.registered_push_token())?;
        if known.as_ref() == Some(&wanted) {
            return Ok(false);
        }

        self.call_authed(api::register_push_token(device_token))
            .await?;
        self.with_state(|state| state.database.remember_push_token(&wanted))?;
        info!(user = %user_id, "Push token registered");
        Ok(true)
    }

    /// Write the current session to the local database.
    pub(crate) fn persist_session(&self) -> Result<(), SyncError> {
        self.with_state(|state| match &state.session {
            Some(session) => state.database.save_session(session),
            None => Ok(()),
        })?;
        Ok(())
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.with_state(|state| state.phase = phase);
        self.emit(StateChange::Session(phase));
    }

    async fn connect_or_warn(&self, token: &str) {
        if let Err(e) = self.connect_realtime(token).await {
            warn!(error = %e, "Realtime channel unavailable, continuing without it");
        }
    }
}
