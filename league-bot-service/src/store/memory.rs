// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Process-local store used when no database is configured and by tests.
//!
//! A transaction owns the table lock for its whole lifetime and works on a
//! copy of the tables; `commit` swaps the copy in, anything else drops it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use league_common::{
    Assignment, Car, CarId, Driver, DriverId, NewAssignment, NewCar, NewDriver, NewRace, NewRaceResult,
    NewSeason, Race, RaceId, RaceRegistration, RaceResult, RaceState, Season, SeasonId,
    total_score,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{CarCatalog, LeagueStore, LeagueTx, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: i64,
    drivers: BTreeMap<DriverId, Driver>,
    seasons: BTreeMap<SeasonId, Season>,
    races: BTreeMap<RaceId, Race>,
    registrations: BTreeMap<i64, RaceRegistration>,
    assignments: BTreeMap<i64, Assignment>,
    results: BTreeMap<i64, RaceResult>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn registration_mut(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> Option<&mut RaceRegistration> {
        self.registrations
            .values_mut()
            .find(|r| r.race_id == race_id && r.driver_id == driver_id)
    }

    fn assignment_mut(&mut self, race_id: RaceId, driver_id: DriverId) -> Option<&mut Assignment> {
        self.assignments
            .values_mut()
            .find(|a| a.race_id == race_id && a.driver_id == driver_id)
    }

    fn result_mut(&mut self, race_id: RaceId, driver_id: DriverId) -> Option<&mut RaceResult> {
        self.results
            .values_mut()
            .find(|r| r.race_id == race_id && r.driver_id == driver_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    cars: Arc<RwLock<Vec<Car>>>,
    #[cfg(test)]
    faults: Arc<std::sync::Mutex<Option<usize>>>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn with_cars(cars: Vec<NewCar>) -> Self {
        let store = Self::default();
        let catalog = catalog_from(cars);
        Self {
            cars: Arc::new(RwLock::new(catalog)),
            ..store
        }
    }

    /// Makes the assignment insert after `successful` more inserts fail.
    #[cfg(test)]
    pub fn fail_assignment_insert_after(&self, successful: usize) {
        *self.faults.lock().unwrap() = Some(successful);
    }
}

fn catalog_from(cars: Vec<NewCar>) -> Vec<Car> {
    let mut catalog: Vec<Car> = cars
        .into_iter()
        .zip(1..)
        .map(|(car, id)| Car {
            id,
            name: car.name,
            year: car.year,
            image_url: car.image_url,
            price: car.price,
            rarity: car.rarity,
            speed: car.speed,
            handling: car.handling,
            acceleration: car.acceleration,
            launch: car.launch,
            braking: car.braking,
            class_letter: car.class_letter,
            class_number: car.class_number,
        })
        .collect();
    catalog.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.year.cmp(&b.year))
            .then(a.id.cmp(&b.id))
    });
    catalog
}

#[async_trait]
impl CarCatalog for MemoryStore {
    async fn cars_by_class(&self, class_letter: &str) -> StoreResult<Vec<Car>> {
        let cars = self.cars.read().await;
        Ok(cars
            .iter()
            .filter(|car| car.class_letter == class_letter)
            .cloned()
            .collect())
    }

    async fn car(&self, car_id: CarId) -> StoreResult<Option<Car>> {
        let cars = self.cars.read().await;
        Ok(cars.iter().find(|car| car.id == car_id).cloned())
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.cars.read().await.len() as i64)
    }

    async fn count_by_class(&self) -> StoreResult<BTreeMap<String, i64>> {
        let cars = self.cars.read().await;
        let mut counts = BTreeMap::new();
        for car in cars.iter() {
            *counts.entry(car.class_letter.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl LeagueStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn LeagueTx>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            #[cfg(test)]
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn driver_by_chat_id(&self, external_chat_id: i64) -> StoreResult<Option<Driver>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .drivers
            .values()
            .find(|d| d.external_chat_id == external_chat_id)
            .cloned())
    }

    async fn create_driver(&self, driver: NewDriver) -> StoreResult<Driver> {
        let mut tables = self.tables.lock().await;
        if tables
            .drivers
            .values()
            .any(|d| d.external_chat_id == driver.external_chat_id)
        {
            return Err(StoreError::Conflict(format!(
                "driver with chat id {} already exists",
                driver.external_chat_id
            )));
        }
        let id = tables.next_id();
        let driver = Driver {
            id,
            external_chat_id: driver.external_chat_id,
            name: driver.name,
            description: driver.description,
            photo_ref: driver.photo_ref,
        };
        tables.drivers.insert(id, driver.clone());
        Ok(driver)
    }

    async fn active_season(&self) -> StoreResult<Option<Season>> {
        let tables = self.tables.lock().await;
        Ok(tables.seasons.values().rev().find(|s| s.active).cloned())
    }

    async fn create_season(&self, season: NewSeason) -> StoreResult<Season> {
        let mut tables = self.tables.lock().await;
        for existing in tables.seasons.values_mut() {
            existing.active = false;
        }
        let id = tables.next_id();
        let season = Season {
            id,
            name: season.name,
            start_date: season.start_date,
            end_date: None,
            active: true,
        };
        tables.seasons.insert(id, season.clone());
        Ok(season)
    }

    async fn race(&self, race_id: RaceId) -> StoreResult<Option<Race>> {
        Ok(self.tables.lock().await.races.get(&race_id).cloned())
    }

    async fn create_race(&self, race: NewRace) -> StoreResult<Race> {
        let mut tables = self.tables.lock().await;
        if !tables.seasons.contains_key(&race.season_id) {
            return Err(StoreError::Conflict(format!(
                "season {} does not exist",
                race.season_id
            )));
        }
        let id = tables.next_id();
        let race = Race {
            id,
            season_id: race.season_id,
            name: race.name,
            date: race.date,
            car_class: race.car_class,
            disciplines: race.disciplines,
            completed: false,
            state: RaceState::NotStarted,
        };
        tables.races.insert(id, race.clone());
        Ok(race)
    }

    async fn registrations(&self, race_id: RaceId) -> StoreResult<Vec<RaceRegistration>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .filter(|r| r.race_id == race_id)
            .cloned()
            .collect())
    }

    async fn assignments(&self, race_id: RaceId) -> StoreResult<Vec<Assignment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assignments
            .values()
            .filter(|a| a.race_id == race_id)
            .cloned()
            .collect())
    }

    async fn result_for(
        &self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<RaceResult>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.result_mut(race_id, driver_id).map(|r| r.clone()))
    }

    async fn seed_cars(&self, cars: Vec<NewCar>) -> StoreResult<usize> {
        let mut catalog = self.cars.write().await;
        if !catalog.is_empty() {
            return Ok(0);
        }
        *catalog = catalog_from(cars);
        Ok(catalog.len())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    #[cfg(test)]
    faults: Arc<std::sync::Mutex<Option<usize>>>,
}

impl MemoryTx {
    #[cfg(test)]
    fn injected_fault(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap();
        match *faults {
            Some(0) => {
                *faults = None;
                Err(StoreError::Unavailable("injected fault".to_string()))
            }
            Some(remaining) => {
                *faults = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn injected_fault(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LeagueTx for MemoryTx {
    async fn race_for_update(&mut self, race_id: RaceId) -> StoreResult<Option<Race>> {
        Ok(self.work.races.get(&race_id).cloned())
    }

    async fn set_race_car_class(&mut self, race_id: RaceId, car_class: &str) -> StoreResult<()> {
        if let Some(race) = self.work.races.get_mut(&race_id) {
            race.car_class = car_class.to_string();
        }
        Ok(())
    }

    async fn set_race_state(&mut self, race_id: RaceId, state: RaceState) -> StoreResult<()> {
        if let Some(race) = self.work.races.get_mut(&race_id) {
            race.state = state;
            race.completed = state == RaceState::Completed;
        }
        Ok(())
    }

    async fn insert_registration(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        if self.work.registration_mut(race_id, driver_id).is_some() {
            return Ok(false);
        }
        let id = self.work.next_id();
        self.work.registrations.insert(
            id,
            RaceRegistration {
                id,
                race_id,
                driver_id,
                registered_at: Utc::now(),
                reroll_used: false,
                car_confirmed: false,
            },
        );
        Ok(true)
    }

    async fn delete_registration(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        let before = self.work.registrations.len();
        self.work
            .registrations
            .retain(|_, r| !(r.race_id == race_id && r.driver_id == driver_id));
        Ok(self.work.registrations.len() < before)
    }

    async fn registrations_for_update(
        &mut self,
        race_id: RaceId,
    ) -> StoreResult<Vec<RaceRegistration>> {
        Ok(self
            .work
            .registrations
            .values()
            .filter(|r| r.race_id == race_id)
            .cloned()
            .collect())
    }

    async fn registration_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<RaceRegistration>> {
        Ok(self
            .work
            .registration_mut(race_id, driver_id)
            .map(|r| r.clone()))
    }

    async fn mark_reroll_used(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()> {
        if let Some(registration) = self.work.registration_mut(race_id, driver_id) {
            registration.reroll_used = true;
        }
        Ok(())
    }

    async fn confirm_car(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()> {
        if let Some(registration) = self.work.registration_mut(race_id, driver_id) {
            registration.car_confirmed = true;
        }
        Ok(())
    }

    async fn delete_assignments(&mut self, race_id: RaceId) -> StoreResult<u64> {
        let before = self.work.assignments.len();
        self.work.assignments.retain(|_, a| a.race_id != race_id);
        Ok((before - self.work.assignments.len()) as u64)
    }

    async fn delete_assignment(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        let before = self.work.assignments.len();
        self.work
            .assignments
            .retain(|_, a| !(a.race_id == race_id && a.driver_id == driver_id));
        Ok(self.work.assignments.len() < before)
    }

    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment> {
        self.injected_fault()?;
        if self
            .work
            .assignment_mut(assignment.race_id, assignment.driver_id)
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "driver {} already has a car for race {}",
                assignment.driver_id, assignment.race_id
            )));
        }
        let id = self.work.next_id();
        let row = Assignment {
            id,
            race_id: assignment.race_id,
            driver_id: assignment.driver_id,
            car_id: assignment.car_id,
            assignment_number: assignment.assignment_number,
            is_reroll: false,
            previous_car_id: None,
        };
        self.work.assignments.insert(id, row.clone());
        Ok(row)
    }

    async fn assignment_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .work
            .assignment_mut(race_id, driver_id)
            .map(|a| a.clone()))
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        match self.work.assignments.get_mut(&assignment.id) {
            Some(row) => {
                *row = assignment.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!(
                "assignment {} does not exist",
                assignment.id
            ))),
        }
    }

    async fn apply_reroll_penalty(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
        penalty: i32,
    ) -> StoreResult<bool> {
        match self.work.result_mut(race_id, driver_id) {
            Some(result) => {
                result.total_score -= penalty;
                result.reroll_penalty = penalty;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_result(
        &mut self,
        result: NewRaceResult,
        reroll_penalty: i32,
    ) -> StoreResult<RaceResult> {
        if self
            .work
            .result_mut(result.race_id, result.driver_id)
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "driver {} already has a result for race {}",
                result.driver_id, result.race_id
            )));
        }
        let id = self.work.next_id();
        let row = RaceResult {
            id,
            race_id: result.race_id,
            driver_id: result.driver_id,
            car_number: result.car_number,
            car_name: result.car_name,
            car_photo: result.car_photo,
            total_score: total_score(&result.placements, reroll_penalty),
            placements: result.placements,
            reroll_penalty,
        };
        self.work.results.insert(id, row.clone());
        Ok(row)
    }

    async fn count_results(&mut self, race_id: RaceId) -> StoreResult<i64> {
        Ok(self
            .work
            .results
            .values()
            .filter(|r| r.race_id == race_id)
            .count() as i64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let tx = *self;
        let mut guard = tx.guard;
        *guard = tx.work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
