//! The user's own cars, plus profile data about any car that was looked at.
//!
//! Stats and follower lists are scoped to the active car (they carry
//! "followed by me"), so they are dropped when the active car changes.

use std::collections::HashMap;

use platesync_shared::models::{Car, CarStats, CarSummary};
use platesync_shared::types::CarId;

#[derive(Debug, Default, Clone)]
pub struct CarStore {
    mine: Vec<Car>,
    others: HashMap<CarId, Car>,
    stats: HashMap<CarId, CarStats>,
    followers: HashMap<CarId, Vec<CarSummary>>,
    following: HashMap<CarId, Vec<CarSummary>>,
}

impl CarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_mine(&mut self, cars: Vec<Car>) {
        self.mine = cars;
    }

    /// Insert or overwrite one of the user's cars.
    pub fn upsert_mine(&mut self, car: Car) {
        self.others.remove(&car.id);
        match self.mine.iter_mut().find(|c| c.id == car.id) {
            Some(existing) => *existing = car,
            None => self.mine.push(car),
        }
    }

    pub fn remove_mine(&mut self, id: CarId) -> Option<Car> {
        let idx = self.mine.iter().position(|c| c.id == id)?;
        self.stats.remove(&id);
        self.followers.remove(&id);
        self.following.remove(&id);
        Some(self.mine.remove(idx))
    }

    pub fn mine(&self) -> &[Car] {
        &self.mine
    }

    pub fn owns(&self, id: CarId) -> bool {
        self.mine.iter().any(|c| c.id == id)
    }

    /// Remember a car that is not the user's (search hit, profile view).
    pub fn remember(&mut self, car: Car) {
        if !self.owns(car.id) {
            self.others.insert(car.id, car);
        }
    }

    pub fn get(&self, id: CarId) -> Option<&Car> {
        self.mine
            .iter()
            .find(|c| c.id == id)
            .or_else(|| self.others.get(&id))
    }

    pub fn summary(&self, id: CarId) -> Option<CarSummary> {
        self.get(id).map(CarSummary::from)
    }

    pub fn set_stats(&mut self, id: CarId, stats: CarStats) {
        self.stats.insert(id, stats);
    }

    pub fn stats(&self, id: CarId) -> Option<&CarStats> {
        self.stats.get(&id)
    }

    pub fn update_stats<F: FnOnce(&mut CarStats)>(&mut self, id: CarId, f: F) -> bool {
        match self.stats.get_mut(&id) {
            Some(stats) => {
                f(stats);
                true
            }
            None => false,
        }
    }

    pub fn set_followers(&mut self, id: CarId, list: Vec<CarSummary>) {
        self.followers.insert(id, list);
    }

    pub fn followers(&self, id: CarId) -> Option<&[CarSummary]> {
        self.followers.get(&id).map(Vec::as_slice)
    }

    pub fn set_following(&mut self, id: CarId, list: Vec<CarSummary>) {
        self.following.insert(id, list);
    }

    pub fn following(&self, id: CarId) -> Option<&[CarSummary]> {
        self.following.get(&id).map(Vec::as_slice)
    }

    /// Drop everything computed relative to the active car.
    pub fn invalidate_scoped(&mut self) {
        self.stats.clear();
        self.followers.clear();
        self.following.clear();
    }

    pub fn clear(&mut self) {
        self.mine.clear();
        self.others.clear();
        self.invalidate_scoped();
    }
}
