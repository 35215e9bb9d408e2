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

//! Car lottery for a race.
//!
//! Every driver draws a distinct number from an inflated range
//! (`floor(cars * 1.7)`), and the number picks the car by wrapping around the
//! class catalog. The whole batch replaces the previous one in a single
//! transaction.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use league_common::{
    AssignmentNumber, Car, DriverId, NewAssignment, RaceId, RaceState, car_index_for_number,
    number_space,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{CarCatalog, LeagueStore, LeagueTx, StoreError};

pub type SharedRng = Arc<Mutex<StdRng>>;

pub fn shared_rng() -> SharedRng {
    Arc::new(Mutex::new(StdRng::from_os_rng()))
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("class {0} has no cars in the catalog")]
    EmptyClass(String),
    #[error("{drivers} drivers do not fit into {number_space} lottery numbers")]
    InsufficientNumberSpace { number_space: usize, drivers: usize },
    #[error("race {0} not found")]
    RaceNotFound(RaceId),
    #[error("race {0} is already completed")]
    RaceCompleted(RaceId),
    #[error("nobody is registered for race {0}")]
    NoRegistrations(RaceId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One driver's outcome of a batch draw.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedCar {
    pub driver_id: DriverId,
    pub number: AssignmentNumber,
    pub car: Car,
}

/// Draws `count` distinct numbers from `1..=number_space`.
pub fn draw_numbers<R: Rng + ?Sized>(
    rng: &mut R,
    number_space: usize,
    count: usize,
) -> Result<Vec<AssignmentNumber>, AllocationError> {
    let upper = AssignmentNumber::try_from(number_space).unwrap_or(AssignmentNumber::MAX);
    if (upper as usize) < count {
        return Err(AllocationError::InsufficientNumberSpace {
            number_space,
            drivers: count,
        });
    }

    let mut used = HashSet::with_capacity(count);
    let mut numbers = Vec::with_capacity(count);
    while numbers.len() < count {
        let number = rng.random_range(1..=upper);
        if used.insert(number) {
            numbers.push(number);
        }
    }
    Ok(numbers)
}

/// Draws a single number from `1..=number_space`.
pub fn draw_number<R: Rng + ?Sized>(rng: &mut R, number_space: usize) -> AssignmentNumber {
    let upper = AssignmentNumber::try_from(number_space)
        .unwrap_or(AssignmentNumber::MAX)
        .max(1);
    rng.random_range(1..=upper)
}

pub fn car_for_number(cars: &[Car], number: AssignmentNumber) -> Option<&Car> {
    cars.get(car_index_for_number(number, cars.len()))
}

#[derive(Clone)]
pub struct AssignmentAllocator {
    store: Arc<dyn LeagueStore>,
    catalog: Arc<dyn CarCatalog>,
    rng: SharedRng,
}

impl AssignmentAllocator {
    pub fn new(store: Arc<dyn LeagueStore>, catalog: Arc<dyn CarCatalog>, rng: SharedRng) -> Self {
        Self {
            store,
            catalog,
            rng,
        }
    }

    /// Replaces the race's assignments with a fresh draw from `class_letter`
    /// and records that class on the race.
    pub async fn allocate(
        &self,
        race_id: RaceId,
        class_letter: &str,
        drivers: &[DriverId],
    ) -> Result<Vec<AllocatedCar>, AllocationError> {
        if drivers.is_empty() {
            debug!(race_id, "no drivers to allocate cars for");
            return Ok(Vec::new());
        }
        let plan = self.draw_plan(class_letter, drivers).await?;

        let mut tx = self.store.begin().await?;
        let written = write_batch(tx.as_mut(), race_id, class_letter, &plan, None).await;
        finish(tx, written, race_id).await?;

        info!(race_id, class = %class_letter, drivers = plan.len(), "cars allocated");
        Ok(plan)
    }

    /// Draws cars for everyone registered and moves the race to
    /// `in_progress`. The race row stays locked from the state check to the
    /// commit, so the class and the roster cannot change underneath the draw.
    pub async fn start_race(&self, race_id: RaceId) -> Result<Vec<AllocatedCar>, AllocationError> {
        let mut tx = self.store.begin().await?;
        let started = self.start_in(tx.as_mut(), race_id).await;
        let plan = finish(tx, started, race_id).await?;

        info!(race_id, drivers = plan.len(), "race started");
        Ok(plan)
    }

    async fn start_in(
        &self,
        tx: &mut dyn LeagueTx,
        race_id: RaceId,
    ) -> Result<Vec<AllocatedCar>, AllocationError> {
        let race = tx
            .race_for_update(race_id)
            .await?
            .ok_or(AllocationError::RaceNotFound(race_id))?;
        if race.state == RaceState::Completed {
            return Err(AllocationError::RaceCompleted(race_id));
        }

        let drivers: Vec<DriverId> = tx
            .registrations_for_update(race_id)
            .await?
            .into_iter()
            .map(|registration| registration.driver_id)
            .collect();
        if drivers.is_empty() {
            return Err(AllocationError::NoRegistrations(race_id));
        }

        let plan = self.draw_plan(&race.car_class, &drivers).await?;
        write_batch(
            tx,
            race_id,
            &race.car_class,
            &plan,
            Some(RaceState::InProgress),
        )
        .await?;
        Ok(plan)
    }

    async fn draw_plan(
        &self,
        class_letter: &str,
        drivers: &[DriverId],
    ) -> Result<Vec<AllocatedCar>, AllocationError> {
        let cars = self.catalog.cars_by_class(class_letter).await?;
        if cars.is_empty() {
            return Err(AllocationError::EmptyClass(class_letter.to_string()));
        }

        let space = number_space(cars.len());
        let numbers = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            draw_numbers(&mut *rng, space, drivers.len())?
        };
        debug!(class = %class_letter, number_space = space, drivers = drivers.len(), "numbers drawn");
        Ok(drivers
            .iter()
            .zip(numbers)
            .filter_map(|(driver_id, number)| {
                car_for_number(&cars, number).map(|car| AllocatedCar {
                    driver_id: *driver_id,
                    number,
                    car: car.clone(),
                })
            })
            .collect())
    }
}

/// Commits on success and rolls back otherwise.
async fn finish<T>(
    tx: Box<dyn LeagueTx>,
    outcome: Result<T, AllocationError>,
    race_id: RaceId,
) -> Result<T, AllocationError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(race_id, error = %rollback_error, "failed to roll back car allocation");
            }
            Err(error)
        }
    }
}

async fn write_batch(
    tx: &mut dyn LeagueTx,
    race_id: RaceId,
    class_letter: &str,
    plan: &[AllocatedCar],
    next_state: Option<RaceState>,
) -> Result<(), AllocationError> {
    if tx.race_for_update(race_id).await?.is_none() {
        return Err(AllocationError::RaceNotFound(race_id));
    }

    let replaced = tx.delete_assignments(race_id).await?;
    for allocated in plan {
        tx.insert_assignment(NewAssignment {
            race_id,
            driver_id: allocated.driver_id,
            car_id: allocated.car.id,
            assignment_number: allocated.number,
        })
        .await?;
    }
    tx.set_race_car_class(race_id, class_letter).await?;
    if let Some(state) = next_state {
        tx.set_race_state(race_id, state).await?;
    }

    debug!(race_id, replaced, inserted = plan.len(), "assignment batch written");
    Ok(())
}
