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

//! Persistence ports.
//!
//! Reads and single-row writes go straight through [`LeagueStore`]. Anything
//! that must succeed or fail together runs on a [`LeagueTx`] obtained from
//! [`LeagueStore::begin`]. A transaction that is dropped without `commit` is
//! rolled back, so an early return or a panic never publishes half a batch.

pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use async_trait::async_trait;
use league_common::{
    Assignment, Car, CarId, Driver, DriverId, NewAssignment, NewCar, NewDriver, NewRace,
    NewRaceResult, NewSeason, Race, RaceId, RaceRegistration, RaceResult, RaceState, Season,
};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read side of the car catalog.
#[async_trait]
pub trait CarCatalog: Send + Sync {
    /// Cars of one class, ordered by name, year and id. Lottery numbers are
    /// mapped onto this order, so it must not change between calls.
    async fn cars_by_class(&self, class_letter: &str) -> StoreResult<Vec<Car>>;
    async fn car(&self, car_id: CarId) -> StoreResult<Option<Car>>;
    async fn count(&self) -> StoreResult<i64>;
    async fn count_by_class(&self) -> StoreResult<BTreeMap<String, i64>>;
}

#[async_trait]
pub trait LeagueStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LeagueTx>>;

    async fn driver_by_chat_id(&self, external_chat_id: i64) -> StoreResult<Option<Driver>>;
    async fn create_driver(&self, driver: NewDriver) -> StoreResult<Driver>;

    async fn active_season(&self) -> StoreResult<Option<Season>>;
    /// Creates the season as the only active one.
    async fn create_season(&self, season: NewSeason) -> StoreResult<Season>;

    async fn race(&self, race_id: RaceId) -> StoreResult<Option<Race>>;
    async fn create_race(&self, race: NewRace) -> StoreResult<Race>;

    async fn registrations(&self, race_id: RaceId) -> StoreResult<Vec<RaceRegistration>>;
    async fn assignments(&self, race_id: RaceId) -> StoreResult<Vec<Assignment>>;
    async fn result_for(&self, race_id: RaceId, driver_id: DriverId)
    -> StoreResult<Option<RaceResult>>;

    /// Loads `cars` only when the catalog is empty. Returns how many were inserted.
    async fn seed_cars(&self, cars: Vec<NewCar>) -> StoreResult<usize>;
}

#[async_trait]
pub trait LeagueTx: Send {
    /// Locks the race row for the rest of the transaction.
    async fn race_for_update(&mut self, race_id: RaceId) -> StoreResult<Option<Race>>;
    async fn set_race_car_class(&mut self, race_id: RaceId, car_class: &str) -> StoreResult<()>;
    async fn set_race_state(&mut self, race_id: RaceId, state: RaceState) -> StoreResult<()>;

    /// Returns `false` when the driver was already registered.
    async fn insert_registration(&mut self, race_id: RaceId, driver_id: DriverId)
    -> StoreResult<bool>;
    /// Returns `false` when there was no registration to remove.
    async fn delete_registration(&mut self, race_id: RaceId, driver_id: DriverId)
    -> StoreResult<bool>;
    /// Every registration of the race in sign-up order, locked.
    async fn registrations_for_update(&mut self, race_id: RaceId)
    -> StoreResult<Vec<RaceRegistration>>;
    async fn registration_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<RaceRegistration>>;
    async fn mark_reroll_used(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()>;
    async fn confirm_car(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()>;

    async fn delete_assignments(&mut self, race_id: RaceId) -> StoreResult<u64>;
    async fn delete_assignment(&mut self, race_id: RaceId, driver_id: DriverId)
    -> StoreResult<bool>;
    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment>;
    async fn assignment_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<Assignment>>;
    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()>;

    /// Subtracts `penalty` from an existing result. Returns `false` if the
    /// driver has no result for the race yet.
    async fn apply_reroll_penalty(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
        penalty: i32,
    ) -> StoreResult<bool>;
    async fn insert_result(
        &mut self,
        result: NewRaceResult,
        reroll_penalty: i32,
    ) -> StoreResult<RaceResult>;
    async fn count_results(&mut self, race_id: RaceId) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
