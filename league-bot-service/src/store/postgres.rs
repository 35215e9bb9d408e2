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

//! Postgres adapter.
//!
//! Queries needed both on a pooled connection and inside a transaction are
//! free functions over `&mut PgConnection`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use league_common::{
    Assignment, Car, CarId, Driver, DriverId, NewAssignment, NewCar, NewDriver, NewRace, NewRaceResult,
    NewSeason, Placements, Race, RaceId, RaceRegistration, RaceResult, RaceState, Season,
    total_score,
};
use sqlx::{PgConnection, PgPool, postgres::PgPoolOptions, types::Json};
use tracing::info;

use super::{CarCatalog, LeagueStore, LeagueTx, StoreError, StoreResult};

pub type PgTransaction<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CarCatalog for PgStore {
    async fn cars_by_class(&self, class_letter: &str) -> StoreResult<Vec<Car>> {
        let mut conn = self.pool.acquire().await?;
        cars_by_class(&mut *conn, class_letter).await
    }

    async fn car(&self, car_id: CarId) -> StoreResult<Option<Car>> {
        const QUERY: &str = r#"
SELECT id, name, year, image_url, price, rarity, speed, handling, acceleration, launch,
       braking, class_letter, class_number
FROM cars
WHERE id = $1
        "#;
        let row = sqlx::query_as::<_, CarRow>(QUERY)
            .bind(car_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Car::from))
    }

    async fn count(&self) -> StoreResult<i64> {
        let mut conn = self.pool.acquire().await?;
        count_cars(&mut *conn).await
    }

    async fn count_by_class(&self) -> StoreResult<BTreeMap<String, i64>> {
        const QUERY: &str = r#"
SELECT class_letter, COUNT(*)
FROM cars
GROUP BY class_letter
        "#;
        let rows = sqlx::query_as::<_, (String, i64)>(QUERY)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl LeagueStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn LeagueTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn driver_by_chat_id(&self, external_chat_id: i64) -> StoreResult<Option<Driver>> {
        const QUERY: &str = r#"
SELECT id, telegram_id, name, description, photo_ref
FROM drivers
WHERE telegram_id = $1
        "#;
        let row = sqlx::query_as::<_, DriverRow>(QUERY)
            .bind(external_chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Driver::from))
    }

    async fn create_driver(&self, driver: NewDriver) -> StoreResult<Driver> {
        const QUERY: &str = r#"
INSERT INTO drivers (telegram_id, name, description, photo_ref)
VALUES ($1, $2, $3, $4)
RETURNING id, telegram_id, name, description, photo_ref
        "#;
        let row = sqlx::query_as::<_, DriverRow>(QUERY)
            .bind(driver.external_chat_id)
            .bind(&driver.name)
            .bind(&driver.description)
            .bind(&driver.photo_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| conflict_or_database(err, "driver already registered"))?;
        Ok(row.into())
    }

    async fn active_season(&self) -> StoreResult<Option<Season>> {
        const QUERY: &str = r#"
SELECT id, name, start_date, end_date, active
FROM seasons
WHERE active
ORDER BY id DESC
LIMIT 1
        "#;
        let row = sqlx::query_as::<_, SeasonRow>(QUERY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Season::from))
    }

    async fn create_season(&self, season: NewSeason) -> StoreResult<Season> {
        const DEACTIVATE: &str = "UPDATE seasons SET active = FALSE WHERE active";
        const INSERT: &str = r#"
INSERT INTO seasons (name, start_date, active)
VALUES ($1, $2, TRUE)
RETURNING id, name, start_date, end_date, active
        "#;
        let mut tx = self.pool.begin().await?;
        sqlx::query(DEACTIVATE).execute(&mut *tx).await?;
        let row = sqlx::query_as::<_, SeasonRow>(INSERT)
            .bind(&season.name)
            .bind(season.start_date)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn race(&self, race_id: RaceId) -> StoreResult<Option<Race>> {
        const QUERY: &str = r#"
SELECT id, season_id, name, date, car_class, disciplines, completed, state
FROM races
WHERE id = $1
        "#;
        let row = sqlx::query_as::<_, RaceRow>(QUERY)
            .bind(race_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Race::try_from).transpose()
    }

    async fn create_race(&self, race: NewRace) -> StoreResult<Race> {
        const QUERY: &str = r#"
INSERT INTO races (season_id, name, date, car_class, disciplines)
VALUES ($1, $2, $3, $4, $5)
RETURNING id, season_id, name, date, car_class, disciplines, completed, state
        "#;
        let row = sqlx::query_as::<_, RaceRow>(QUERY)
            .bind(race.season_id)
            .bind(&race.name)
            .bind(race.date)
            .bind(&race.car_class)
            .bind(Json(&race.disciplines))
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn registrations(&self, race_id: RaceId) -> StoreResult<Vec<RaceRegistration>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, registered_at, reroll_used, car_confirmed
FROM race_registrations
WHERE race_id = $1
ORDER BY registered_at, id
        "#;
        let rows = sqlx::query_as::<_, RegistrationRow>(QUERY)
            .bind(race_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RaceRegistration::from).collect())
    }

    async fn assignments(&self, race_id: RaceId) -> StoreResult<Vec<Assignment>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, car_id, assignment_number, is_reroll, previous_car_id
FROM race_car_assignments
WHERE race_id = $1
ORDER BY assignment_number, id
        "#;
        let rows = sqlx::query_as::<_, AssignmentRow>(QUERY)
            .bind(race_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Assignment::from).collect())
    }

    async fn result_for(
        &self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<RaceResult>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, car_number, car_name, car_photo, placements,
       total_score, reroll_penalty
FROM race_results
WHERE race_id = $1 AND driver_id = $2
        "#;
        let row = sqlx::query_as::<_, ResultRow>(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RaceResult::from))
    }

    async fn seed_cars(&self, cars: Vec<NewCar>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        if count_cars(&mut *tx).await? > 0 {
            return Ok(0);
        }
        for car in &cars {
            insert_car(&mut *tx, car).await?;
        }
        tx.commit().await?;
        Ok(cars.len())
    }
}

struct PgTx {
    tx: PgTransaction<'static>,
}

#[async_trait]
impl LeagueTx for PgTx {
    async fn race_for_update(&mut self, race_id: RaceId) -> StoreResult<Option<Race>> {
        const QUERY: &str = r#"
SELECT id, season_id, name, date, car_class, disciplines, completed, state
FROM races
WHERE id = $1
FOR UPDATE
        "#;
        let row = sqlx::query_as::<_, RaceRow>(QUERY)
            .bind(race_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Race::try_from).transpose()
    }

    async fn set_race_car_class(&mut self, race_id: RaceId, car_class: &str) -> StoreResult<()> {
        const QUERY: &str = "UPDATE races SET car_class = $2 WHERE id = $1";
        sqlx::query(QUERY)
            .bind(race_id)
            .bind(car_class)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_race_state(&mut self, race_id: RaceId, state: RaceState) -> StoreResult<()> {
        const QUERY: &str = "UPDATE races SET state = $2, completed = $3 WHERE id = $1";
        sqlx::query(QUERY)
            .bind(race_id)
            .bind(state.as_str())
            .bind(state == RaceState::Completed)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_registration(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        const QUERY: &str = r#"
INSERT INTO race_registrations (race_id, driver_id)
VALUES ($1, $2)
ON CONFLICT (race_id, driver_id) DO NOTHING
        "#;
        let done = sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn delete_registration(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        const QUERY: &str = "DELETE FROM race_registrations WHERE race_id = $1 AND driver_id = $2";
        let done = sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn registrations_for_update(
        &mut self,
        race_id: RaceId,
    ) -> StoreResult<Vec<RaceRegistration>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, registered_at, reroll_used, car_confirmed
FROM race_registrations
WHERE race_id = $1
ORDER BY registered_at, id
FOR UPDATE
        "#;
        let rows = sqlx::query_as::<_, RegistrationRow>(QUERY)
            .bind(race_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(RaceRegistration::from).collect())
    }

    async fn registration_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<RaceRegistration>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, registered_at, reroll_used, car_confirmed
FROM race_registrations
WHERE race_id = $1 AND driver_id = $2
FOR UPDATE
        "#;
        let row = sqlx::query_as::<_, RegistrationRow>(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(RaceRegistration::from))
    }

    async fn mark_reroll_used(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()> {
        const QUERY: &str = r#"
UPDATE race_registrations
SET reroll_used = TRUE
WHERE race_id = $1 AND driver_id = $2
        "#;
        sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn confirm_car(&mut self, race_id: RaceId, driver_id: DriverId) -> StoreResult<()> {
        const QUERY: &str = r#"
UPDATE race_registrations
SET car_confirmed = TRUE
WHERE race_id = $1 AND driver_id = $2
        "#;
        sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_assignments(&mut self, race_id: RaceId) -> StoreResult<u64> {
        const QUERY: &str = "DELETE FROM race_car_assignments WHERE race_id = $1";
        let done = sqlx::query(QUERY)
            .bind(race_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete_assignment(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<bool> {
        const QUERY: &str =
            "DELETE FROM race_car_assignments WHERE race_id = $1 AND driver_id = $2";
        let done = sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment> {
        const QUERY: &str = r#"
INSERT INTO race_car_assignments (race_id, driver_id, car_id, assignment_number)
VALUES ($1, $2, $3, $4)
RETURNING id, race_id, driver_id, car_id, assignment_number, is_reroll, previous_car_id
        "#;
        let row = sqlx::query_as::<_, AssignmentRow>(QUERY)
            .bind(assignment.race_id)
            .bind(assignment.driver_id)
            .bind(assignment.car_id)
            .bind(assignment.assignment_number)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| conflict_or_database(err, "driver already has a car for this race"))?;
        Ok(row.into())
    }

    async fn assignment_for_update(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
    ) -> StoreResult<Option<Assignment>> {
        const QUERY: &str = r#"
SELECT id, race_id, driver_id, car_id, assignment_number, is_reroll, previous_car_id
FROM race_car_assignments
WHERE race_id = $1 AND driver_id = $2
FOR UPDATE
        "#;
        let row = sqlx::query_as::<_, AssignmentRow>(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Assignment::from))
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        const QUERY: &str = r#"
UPDATE race_car_assignments
SET car_id = $2, assignment_number = $3, is_reroll = $4, previous_car_id = $5
WHERE id = $1
        "#;
        let done = sqlx::query(QUERY)
            .bind(assignment.id)
            .bind(assignment.car_id)
            .bind(assignment.assignment_number)
            .bind(assignment.is_reroll)
            .bind(assignment.previous_car_id)
            .execute(&mut *self.tx)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "assignment {} does not exist",
                assignment.id
            )));
        }
        Ok(())
    }

    async fn apply_reroll_penalty(
        &mut self,
        race_id: RaceId,
        driver_id: DriverId,
        penalty: i32,
    ) -> StoreResult<bool> {
        const QUERY: &str = r#"
UPDATE race_results
SET total_score = total_score - $3, reroll_penalty = $3
WHERE race_id = $1 AND driver_id = $2
        "#;
        let done = sqlx::query(QUERY)
            .bind(race_id)
            .bind(driver_id)
            .bind(penalty)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_result(
        &mut self,
        result: NewRaceResult,
        reroll_penalty: i32,
    ) -> StoreResult<RaceResult> {
        const QUERY: &str = r#"
INSERT INTO race_results
    (race_id, driver_id, car_number, car_name, car_photo, placements, total_score, reroll_penalty)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING id, race_id, driver_id, car_number, car_name, car_photo, placements,
          total_score, reroll_penalty
        "#;
        let row = sqlx::query_as::<_, ResultRow>(QUERY)
            .bind(result.race_id)
            .bind(result.driver_id)
            .bind(result.car_number)
            .bind(&result.car_name)
            .bind(&result.car_photo)
            .bind(Json(&result.placements))
            .bind(total_score(&result.placements, reroll_penalty))
            .bind(reroll_penalty)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| conflict_or_database(err, "result already recorded"))?;
        Ok(row.into())
    }

    async fn count_results(&mut self, race_id: RaceId) -> StoreResult<i64> {
        const QUERY: &str = "SELECT COUNT(*) FROM race_results WHERE race_id = $1";
        Ok(sqlx::query_scalar::<_, i64>(QUERY)
            .bind(race_id)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn cars_by_class(ex: &mut PgConnection, class_letter: &str) -> StoreResult<Vec<Car>> {
    const QUERY: &str = r#"
SELECT id, name, year, image_url, price, rarity, speed, handling, acceleration, launch,
       braking, class_letter, class_number
FROM cars
WHERE class_letter = $1
ORDER BY name, year NULLS FIRST, id
    "#;
    let rows = sqlx::query_as::<_, CarRow>(QUERY)
        .bind(class_letter)
        .fetch_all(ex)
        .await?;
    Ok(rows.into_iter().map(Car::from).collect())
}

async fn count_cars(ex: &mut PgConnection) -> StoreResult<i64> {
    const QUERY: &str = "SELECT COUNT(*) FROM cars";
    Ok(sqlx::query_scalar::<_, i64>(QUERY).fetch_one(ex).await?)
}

async fn insert_car(ex: &mut PgConnection, car: &NewCar) -> StoreResult<()> {
    const QUERY: &str = r#"
INSERT INTO cars (name, year, image_url, price, rarity, speed, handling, acceleration,
                  launch, braking, class_letter, class_number)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    "#;
    sqlx::query(QUERY)
        .bind(&car.name)
        .bind(car.year)
        .bind(&car.image_url)
        .bind(car.price)
        .bind(&car.rarity)
        .bind(car.speed)
        .bind(car.handling)
        .bind(car.acceleration)
        .bind(car.launch)
        .bind(car.braking)
        .bind(&car.class_letter)
        .bind(car.class_number)
        .execute(ex)
        .await?;
    Ok(())
}

fn conflict_or_database(err: sqlx::Error, conflict: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(conflict.to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: i64,
    telegram_id: i64,
    name: String,
    description: String,
    photo_ref: String,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Self {
            id: row.id,
            external_chat_id: row.telegram_id,
            name: row.name,
            description: row.description,
            photo_ref: row.photo_ref,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SeasonRow {
    id: i64,
    name: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    active: bool,
}

impl From<SeasonRow> for Season {
    fn from(row: SeasonRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            active: row.active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RaceRow {
    id: i64,
    season_id: i64,
    name: String,
    date: NaiveDate,
    car_class: String,
    disciplines: Json<Vec<String>>,
    completed: bool,
    state: String,
}

impl TryFrom<RaceRow> for Race {
    type Error = StoreError;

    fn try_from(row: RaceRow) -> Result<Self, Self::Error> {
        let state = RaceState::parse(&row.state).ok_or_else(|| {
            StoreError::Corrupt(format!("race {} has unknown state {}", row.id, row.state))
        })?;
        Ok(Self {
            id: row.id,
            season_id: row.season_id,
            name: row.name,
            date: row.date,
            car_class: row.car_class,
            disciplines: row.disciplines.0,
            completed: row.completed,
            state,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RegistrationRow {
    id: i64,
    race_id: i64,
    driver_id: i64,
    registered_at: DateTime<Utc>,
    reroll_used: bool,
    car_confirmed: bool,
}

impl From<RegistrationRow> for RaceRegistration {
    fn from(row: RegistrationRow) -> Self {
        Self {
            id: row.id,
            race_id: row.race_id,
            driver_id: row.driver_id,
            registered_at: row.registered_at,
            reroll_used: row.reroll_used,
            car_confirmed: row.car_confirmed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    race_id: i64,
    driver_id: i64,
    car_id: i64,
    assignment_number: i32,
    is_reroll: bool,
    previous_car_id: Option<i64>,
}

impl From<AssignmentRow> for Assignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            id: row.id,
            race_id: row.race_id,
            driver_id: row.driver_id,
            car_id: row.car_id,
            assignment_number: row.assignment_number,
            is_reroll: row.is_reroll,
            previous_car_id: row.previous_car_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CarRow {
    id: i64,
    name: String,
    year: Option<i32>,
    image_url: Option<String>,
    price: i64,
    rarity: String,
    speed: f64,
    handling: f64,
    acceleration: f64,
    launch: f64,
    braking: f64,
    class_letter: String,
    class_number: i32,
}

impl From<CarRow> for Car {
    fn from(row: CarRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            year: row.year,
            image_url: row.image_url,
            price: row.price,
            rarity: row.rarity,
            speed: row.speed,
            handling: row.handling,
            acceleration: row.acceleration,
            launch: row.launch,
            braking: row.braking,
            class_letter: row.class_letter,
            class_number: row.class_number,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: i64,
    race_id: i64,
    driver_id: i64,
    car_number: i32,
    car_name: String,
    car_photo: String,
    placements: Json<Placements>,
    total_score: i32,
    reroll_penalty: i32,
}

impl From<ResultRow> for RaceResult {
    fn from(row: ResultRow) -> Self {
        Self {
            id: row.id,
            race_id: row.race_id,
            driver_id: row.driver_id,
            car_number: row.car_number,
            car_name: row.car_name,
            car_photo: row.car_photo,
            placements: row.placements.0,
            total_score: row.total_score,
            reroll_penalty: row.reroll_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> PgStore {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql://".to_string());
        let store = PgStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_assignment_batch_is_atomic() {
        let store = connect().await;
        let season = store
            .create_season(NewSeason {
                name: "Postgres test".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            })
            .await
            .unwrap();
        let race = store
            .create_race(NewRace {
                season_id: season.id,
                name: "Atomic".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
                car_class: "A".to_string(),
                disciplines: vec!["Drag".to_string()],
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.race_for_update(race.id).await.unwrap().is_some());
        tx.set_race_car_class(race.id, "S1").await.unwrap();
        tx.rollback().await.unwrap();

        let reloaded = store.race(race.id).await.unwrap().unwrap();
        assert_eq!(reloaded.car_class, "A");
        assert_eq!(reloaded.state, RaceState::NotStarted);
        assert_eq!(reloaded.disciplines, vec!["Drag".to_string()]);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_registration_is_idempotent() {
        let store = connect().await;
        let season = store
            .create_season(NewSeason {
                name: "Registrations".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            })
            .await
            .unwrap();
        let race = store
            .create_race(NewRace {
                season_id: season.id,
                name: "Twice".to_string(),
                date: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
                car_class: "B".to_string(),
                disciplines: vec!["Rally".to_string()],
            })
            .await
            .unwrap();
        let chat_id = Utc::now().timestamp_micros();
        let driver = store
            .create_driver(NewDriver {
                external_chat_id: chat_id,
                name: "Pg".to_string(),
                description: String::new(),
                photo_ref: String::new(),
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_registration(race.id, driver.id).await.unwrap());
        assert!(!tx.insert_registration(race.id, driver.id).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.registrations(race.id).await.unwrap().len(), 1);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.delete_registration(race.id, driver.id).await.unwrap());
        tx.commit().await.unwrap();
        assert!(store.registrations(race.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_orders_undated_cars_first() {
        let store = connect().await;
        let class_letter = format!("T{}", Utc::now().timestamp_micros());
        let car = |year: Option<i32>| NewCar {
            name: "Countach".to_string(),
            year,
            image_url: None,
            price: 0,
            rarity: String::new(),
            speed: 0.0,
            handling: 0.0,
            acceleration: 0.0,
            launch: 0.0,
            braking: 0.0,
            class_letter: class_letter.clone(),
            class_number: 0,
        };

        let mut tx = store.pool.begin().await.unwrap();
        for year in [Some(1988), None, Some(1974)] {
            insert_car(&mut *tx, &car(year)).await.unwrap();
        }
        let years: Vec<Option<i32>> = cars_by_class(&mut *tx, &class_letter)
            .await
            .unwrap()
            .iter()
            .map(|c| c.year)
            .collect();
        tx.rollback().await.unwrap();

        assert_eq!(years, vec![None, Some(1974), Some(1988)]);
    }
}
