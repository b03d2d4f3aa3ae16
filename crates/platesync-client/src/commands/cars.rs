use tracing::{info, warn};

use platesync_shared::constants::MAX_BIO_LEN;
use platesync_shared::models::{Car, CarStats, CarSummary};
use platesync_shared::normalize::{normalize_car, normalize_car_summary, normalize_list, normalize_stats};
use platesync_shared::types::{CarId, FeedKind};

use crate::api;
use crate::client::{entity, report_skipped, SyncClient};
use crate::error::SyncError;
use crate::events::StateChange;
use crate::state::AppState;

const CAR_LIST_KEYS: &[&str] = &["cars", "results", "data", "items"];
const FOLLOW_LIST_KEYS: &[&str] = &["followers", "following", "cars", "data", "items"];

/// Pick the first owned car when the session's active car is unset or no
/// longer owned. Returns the new selection if it changed.
fn reselect_active_car(state: &mut AppState) -> Option<Option<CarId>> {
    let current = state.active_car();
    if current.is_some_and(|car| state.stores.cars.owns(car)) {
        return None;
    }
    let next = state.stores.cars.mine().first().map(|c| c.id);
    if next == current {
        return None;
    }
    let session = state.session.as_mut()?;
    session.active_car_id = next;
    Some(next)
}

fn shift(value: &mut u32, up: bool) {
    *value = if up {
        value.saturating_add(1)
    } else {
        value.saturating_sub(1)
    };
}

impl SyncClient {
    /// Reload the user's cars. If the active car is missing or no longer
    /// owned, the first car becomes active.
    pub async fn load_my_cars(&self) -> Result<Vec<Car>, SyncError> {
        let token = self.token()?;
        let body = self.call(api::my_cars().with_token(token.clone())).await?;
        let (cars, skipped) = normalize_list(&body, CAR_LIST_KEYS, normalize_car);
        report_skipped("car", &skipped);

        let reselected = self.with_state_for(&token, |state| {
            state.stores.cars.replace_mine(cars.clone());
            reselect_active_car(state)
        })?;
        self.emit(StateChange::Cars);

        if let Some(active) = reselected {
            info!(car = ?active, "Active car selected");
            if let Err(e) = self.persist_session() {
                warn!(error = %e, "Could not persist active car");
            }
            self.emit(StateChange::ActiveCar(active));
        }
        Ok(cars)
    }

    pub fn my_cars(&self) -> Vec<Car> {
        self.read(|stores| stores.cars.mine().to_vec())
    }

    /// Any car seen so far, owned or not.
    pub fn car(&self, id: CarId) -> Option<Car> {
        self.read(|stores| stores.cars.get(id).cloned())
    }

    pub fn car_stats(&self, id: CarId) -> Option<CarStats> {
        self.read(|stores| stores.cars.stats(id).cloned())
    }

    pub fn followers(&self, id: CarId) -> Option<Vec<CarSummary>> {
        self.read(|stores| stores.cars.followers(id).map(<[CarSummary]>::to_vec))
    }

    pub fn following(&self, id: CarId) -> Option<Vec<CarSummary>> {
        self.read(|stores| stores.cars.following(id).map(<[CarSummary]>::to_vec))
    }

    /// Register a car by plate.
    pub async fn add_car(&self, plate: &str) -> Result<Car, SyncError> {
        let plate = plate.trim();
        if plate.is_empty() {
            return Err(SyncError::invalid("plate is empty"));
        }
        let token = self.token()?;
        let body = self.call(api::add_car(plate).with_token(token.clone())).await?;
        let car = normalize_car(entity(&body, "car"))?;

        let reselected = self.with_state_for(&token, |state| {
            state.stores.cars.upsert_mine(car.clone());
            reselect_active_car(state)
        })?;
        self.emit(StateChange::Cars);
        if let Some(active) = reselected {
            if let Err(e) = self.persist_session() {
                warn!(error = %e, "Could not persist active car");
            }
            self.emit(StateChange::ActiveCar(active));
        }
        info!(car = %car.id, "Car added");
        Ok(car)
    }

    pub async fn update_bio(&self, car: CarId, bio: &str) -> Result<Car, SyncError> {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(SyncError::invalid(format!("bio exceeds {MAX_BIO_LEN} characters")));
        }
        let mut local = self
            .read(|stores| stores.cars.mine().iter().find(|c| c.id == car).cloned())
            .ok_or_else(|| SyncError::conflict(format!("car {car} is not yours")))?;

        let token = self.token()?;
        let body = self
            .call(api::update_bio(car, bio).with_token(token.clone()))
            .await?;

        let updated = match normalize_car(entity(&body, "car")) {
            Ok(server) if server.id == car => server,
            _ => {
                local.bio = (!bio.is_empty()).then(|| bio.to_string());
                local
            }
        };
        self.with_state_for(&token, |state| state.stores.cars.upsert_mine(updated.clone()))?;
        self.events
            .emit_all([StateChange::Cars, StateChange::CarProfile(car)]);
        Ok(updated)
    }

    /// Delete one of the user's cars. The active car cannot be deleted.
    pub async fn delete_car(&self, car: CarId) -> Result<(), SyncError> {
        let (token, active) = self.with_state(|state| {
            (state.token().map(str::to_string), state.active_car())
        });
        let token = token.ok_or(SyncError::Unauthenticated)?;
        if active == Some(car) {
            return Err(SyncError::conflict("cannot delete the active car"));
        }
        if !self.read(|stores| stores.cars.owns(car)) {
            return Err(SyncError::conflict(format!("car {car} is not yours")));
        }

        self.call(api::delete_car(car).with_token(token.clone())).await?;
        self.with_state_for(&token, |state| {
            state.stores.cars.remove_mine(car);
            state.stores.posts.invalidate(FeedKind::Car(car));
        })?;
        self.emit(StateChange::Cars);
        info!(car = %car, "Car deleted");
        Ok(())
    }

    /// Find cars by plate. Hits are remembered for later display.
    pub async fn search_cars(&self, plate: &str) -> Result<Vec<Car>, SyncError> {
        let plate = plate.trim();
        if plate.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.token()?;
        let body = self
            .call(api::search_cars(plate).with_token(token.clone()))
            .await?;
        let (cars, skipped) = normalize_list(&body, CAR_LIST_KEYS, normalize_car);
        report_skipped("car", &skipped);

        self.with_state_for(&token, |state| {
            for car in &cars {
                state.stores.cars.remember(car.clone());
            }
        })?;
        Ok(cars)
    }

    pub async fn load_car_profile(&self, car: CarId) -> Result<Car, SyncError> {
        let token = self.token()?;
        let body = self
            .call(api::car_profile(car).with_token(token.clone()))
            .await?;
        let profile = normalize_car(entity(&body, "car"))?;

        self.with_state_for(&token, |state| {
            if state.stores.cars.owns(profile.id) {
                state.stores.cars.upsert_mine(profile.clone());
            } else {
                state.stores.cars.remember(profile.clone());
            }
        })?;
        self.emit(StateChange::CarProfile(profile.id));
        Ok(profile)
    }

    /// Counters of `car` as seen by the active car.
    pub async fn load_car_stats(&self, car: CarId) -> Result<CarStats, SyncError> {
        let (token, viewer) = self.acting()?;
        let body = self
            .call(api::car_stats(car, Some(viewer)).with_token(token.clone()))
            .await?;
        let stats = normalize_stats(entity(&body, "stats"))?;

        self.with_state_as(&token, viewer, |state| {
            state.stores.cars.set_stats(car, stats.clone())
        })?;
        self.emit(StateChange::CarProfile(car));
        Ok(stats)
    }

    pub async fn load_followers(&self, car: CarId) -> Result<Vec<CarSummary>, SyncError> {
        let token = self.token()?;
        let body = self.call(api::followers(car).with_token(token.clone())).await?;
        let (list, skipped) = normalize_list(&body, FOLLOW_LIST_KEYS, normalize_car_summary);
        report_skipped("follower", &skipped);

        self.with_state_for(&token, |state| {
            state.stores.cars.set_followers(car, list.clone())
        })?;
        self.emit(StateChange::CarProfile(car));
        Ok(list)
    }

    pub async fn load_following(&self, car: CarId) -> Result<Vec<CarSummary>, SyncError> {
        let token = self.token()?;
        let body = self.call(api::following(car).with_token(token.clone())).await?;
        let (list, skipped) = normalize_list(&body, FOLLOW_LIST_KEYS, normalize_car_summary);
        report_skipped("following", &skipped);

        self.with_state_for(&token, |state| {
            state.stores.cars.set_following(car, list.clone())
        })?;
        self.emit(StateChange::CarProfile(car));
        Ok(list)
    }

    /// Follow or unfollow `target` as the active car.
    pub async fn follow_car(&self, target: CarId, follow: bool) -> Result<(), SyncError> {
        let (token, me) = self.acting()?;
        if target == me {
            return Err(SyncError::invalid("a car cannot follow itself"));
        }
        let request = if follow {
            api::follow(target, me)
        } else {
            api::unfollow(target, me)
        };
        self.call(request.with_token(token.clone())).await?;

        self.with_state_as(&token, me, |state| {
            let cars = &mut state.stores.cars;
            let mut flipped = false;
            cars.update_stats(target, |stats| {
                if stats.followed_by_me != follow {
                    stats.followed_by_me = follow;
                    shift(&mut stats.followers, follow);
                    flipped = true;
                }
            });
            if flipped {
                cars.update_stats(me, |stats| shift(&mut stats.following, follow));
            }
            state.stores.posts.invalidate(FeedKind::Following);
        })?;
        self.events.emit_all([
            StateChange::CarProfile(target),
            StateChange::Feed(FeedKind::Following),
        ]);
        info!(car = %target, follow, "Follow state changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use platesync_net::Method;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_my_cars_selects_first_when_unset() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            if let Some(session) = s.session.as_mut() {
                session.active_car_id = None;
            }
        });
        h.http.on(
            Method::Get,
            "/cars/mine",
            200,
            json!({"cars": [{"id": 11, "plate": "BB222"}, {"id": 12, "plate": "CC333"}]}),
        );

        let cars = h.client.load_my_cars().await.unwrap();
        assert_eq!(cars.len(), 2);
        assert_eq!(h.client.active_car(), Some(CarId(11)));
        let persisted = h.client.with_state(|s| s.database.load_session().unwrap());
        assert_eq!(persisted.unwrap().active_car_id, Some(CarId(11)));
    }

    #[tokio::test]
    async fn test_load_my_cars_keeps_owned_active_car() {
        let h = harness();
        h.sign_in(CarId(12));
        h.http.on(
            Method::Get,
            "/cars/mine",
            200,
            json!([{"id": 11, "plate": "BB222"}, {"id": 12, "plate": "CC333"}]),
        );
        h.client.load_my_cars().await.unwrap();
        assert_eq!(h.client.active_car(), Some(CarId(12)));
    }

    #[tokio::test]
    async fn test_follow_and_unfollow_adjust_stats() {
        let h = harness();
        h.sign_in(CarId(10));
        h.client.with_state(|s| {
            s.stores.cars.set_stats(
                CarId(20),
                CarStats {
                    followers: 4,
                    ..CarStats::default()
                },
            );
            s.stores.posts.replace_collection(FeedKind::Following, vec![post(7, 0, false)]);
        });
        h.http.on(Method::Post, "/cars/20/follow", 200, json!({"ok": true}));
        h.http.on(Method::Delete, "/cars/20/follow?car_id=10", 200, json!({"ok": true}));

        h.client.follow_car(CarId(20), true).await.unwrap();
        let stats = h.client.car_stats(CarId(20)).unwrap();
        assert!(stats.followed_by_me);
        assert_eq!(stats.followers, 5);
        assert!(!h.client.read(|s| s.posts.is_loaded(FeedKind::Following)));

        h.client.follow_car(CarId(20), false).await.unwrap();
        assert_eq!(h.client.car_stats(CarId(20)).unwrap().followers, 4);
    }

    #[tokio::test]
    async fn test_delete_active_car_is_refused() {
        let h = harness();
        h.sign_in(CarId(10));
        let err = h.client.delete_car(CarId(10)).await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));
        assert!(h.http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_search_encodes_plate_and_remembers_hits() {
        let h = harness();
        h.sign_in(CarId(10));
        h.http.on(
            Method::Get,
            "/cars/search?plate=AB%20123",
            200,
            json!({"results": [{"id": 40, "plate": "AB 123"}]}),
        );

        let hits = h.client.search_cars(" AB 123 ").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(h.client.car(CarId(40)).unwrap().plate, "AB 123");
        assert!(h.client.search_cars("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_bio_requires_ownership() {
        let h = harness();
        h.sign_in(CarId(10));
        let err = h.client.update_bio(CarId(40), "hi").await.unwrap_err();
        assert!(matches!(err, SyncError::StateConflict(_)));

        h.http.on(Method::Put, "/cars/10", 200, json!({"ok": true}));
        let car = h.client.update_bio(CarId(10), "daily driver").await.unwrap();
        assert_eq!(car.bio.as_deref(), Some("daily driver"));
        assert_eq!(h.client.my_cars()[0].bio.as_deref(), Some("daily driver"));
    }
}
