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

use std::sync::{Arc, PoisonError};

use league_common::{
    Assignment, AssignmentNumber, Car, CarId, DriverId, MAX_REROLL_ATTEMPTS, REROLL_PENALTY, RaceId,
    number_space,
};
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::allocator::{SharedRng, car_for_number, draw_number};
use crate::store::{CarCatalog, LeagueStore, LeagueTx, StoreError};

#[derive(Debug, Error)]
pub enum RerollError {
    #[error("race {0} not found")]
    RaceNotFound(RaceId),
    #[error("driver {driver_id} is not registered for race {race_id}")]
    NotRegistered { race_id: RaceId, driver_id: DriverId },
    #[error("reroll already used")]
    AlreadyUsed,
    #[error("no car assigned yet")]
    NoCurrentAssignment,
    #[error("class {0} has no cars in the catalog")]
    EmptyClass(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerollOutcome {
    pub assignment: Assignment,
    pub car: Car,
    pub previous_car_id: CarId,
    /// Whether an already recorded result lost points.
    pub penalty_applied: bool,
}

/// Draws one number, trying a few times to land on a car other than
/// `current`. The last draw is kept either way.
pub fn reroll_draw<'c, R: Rng + ?Sized>(
    rng: &mut R,
    cars: &'c [Car],
    current: CarId,
) -> Option<(AssignmentNumber, &'c Car)> {
    let space = number_space(cars.len());
    let mut drawn = None;
    for _ in 0..MAX_REROLL_ATTEMPTS {
        let number = draw_number(&mut *rng, space);
        let car = car_for_number(cars, number)?;
        drawn = Some((number, car));
        if car.id != current {
            break;
        }
    }
    drawn
}

/// One penalized re-draw per driver per race.
#[derive(Clone)]
pub struct RerollPolicy {
    store: Arc<dyn LeagueStore>,
    catalog: Arc<dyn CarCatalog>,
    rng: SharedRng,
}

impl RerollPolicy {
    pub fn new(store: Arc<dyn LeagueStore>, catalog: Arc<dyn CarCatalog>, rng: SharedRng) -> Self {
        Self {
            store,
            catalog,
            rng,
        }
    }

    pub async fn reroll(
        &self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> Result<RerollOutcome, RerollError> {
        let mut tx = self.store.begin().await?;
        let outcome = match self.reroll_in(tx.as_mut(), race_id, driver_id).await {
            Ok(outcome) => {
                tx.commit().await?;
                outcome
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(race_id, driver_id, error = %rollback_error, "failed to roll back reroll");
                }
                return Err(error);
            }
        };

        info!(
            race_id,
            driver_id,
            previous_car_id = outcome.previous_car_id,
            car_id = outcome.car.id,
            number = outcome.assignment.assignment_number,
            penalty_applied = outcome.penalty_applied,
            "car rerolled"
        );
        Ok(outcome)
    }

    /// Locks the race before the registration so a concurrent class change
    /// either lands first or waits for this reroll.
    async fn reroll_in(
        &self,
        tx: &mut dyn LeagueTx,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> Result<RerollOutcome, RerollError> {
        let race = tx
            .race_for_update(race_id)
            .await?
            .ok_or(RerollError::RaceNotFound(race_id))?;
        let registration = tx
            .registration_for_update(race.id, driver_id)
            .await?
            .ok_or(RerollError::NotRegistered {
                race_id: race.id,
                driver_id,
            })?;
        if registration.reroll_used {
            return Err(RerollError::AlreadyUsed);
        }
        let current = tx
            .assignment_for_update(race.id, driver_id)
            .await?
            .ok_or(RerollError::NoCurrentAssignment)?;

        let cars = self.catalog.cars_by_class(&race.car_class).await?;
        let (number, car) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let (number, car) = reroll_draw(&mut *rng, &cars, current.car_id)
                .ok_or_else(|| RerollError::EmptyClass(race.car_class.clone()))?;
            (number, car.clone())
        };

        // Other drivers may already hold `number`; only the batch draw keeps
        // numbers unique within a race.
        let updated = Assignment {
            car_id: car.id,
            assignment_number: number,
            is_reroll: true,
            previous_car_id: Some(current.car_id),
            ..current.clone()
        };
        tx.update_assignment(&updated).await?;
        tx.mark_reroll_used(race.id, driver_id).await?;
        tx.confirm_car(race.id, driver_id).await?;
        let penalty_applied = tx
            .apply_reroll_penalty(race.id, driver_id, REROLL_PENALTY)
            .await?;

        Ok(RerollOutcome {
            assignment: updated,
            car,
            previous_car_id: current.car_id,
            penalty_applied,
        })
    }
}
