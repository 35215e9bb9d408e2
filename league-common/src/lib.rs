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

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MIN_DRIVER_NAME_LEN: usize = 2;
pub const MAX_DRIVER_NAME_LEN: usize = 30;
pub const MIN_SEASON_NAME_LEN: usize = 3;
pub const MAX_SEASON_NAME_LEN: usize = 30;
pub const MIN_RACE_NAME_LEN: usize = 3;
pub const MAX_RACE_NAME_LEN: usize = 50;
pub const MIN_CAR_NAME_LEN: usize = 2;
pub const MAX_CAR_NAME_LEN: usize = 50;
pub const MAX_RESULT_CAR_NUMBER: i32 = 999;
pub const MAX_PLACE: u8 = 3;

/// Points taken from a driver's total once their reroll is spent.
pub const REROLL_PENALTY: i32 = 1;
/// How many draws a reroll may spend looking for a different car.
pub const MAX_REROLL_ATTEMPTS: usize = 5;

/// Input that stands for "leave this field empty" in wizards.
pub const SKIP_MARKER: &str = "-";
pub const DATE_FORMAT: &str = "%d.%m.%Y";

/// Car classes in ascending order of performance.
pub const CAR_CLASSES: [&str; 7] = ["D", "C", "B", "A", "S1", "S2", "X"];

pub const DEFAULT_DISCIPLINES: [&str; 6] =
    ["Visual", "Drag", "Circuit", "Off-road", "Sprint", "Rally"];

pub type DriverId = i64;
pub type SeasonId = i64;
pub type RaceId = i64;
pub type CarId = i64;
pub type AssignmentNumber = i32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub external_chat_id: i64,
    pub name: String,
    pub description: String,
    pub photo_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDriver {
    pub external_chat_id: i64,
    pub name: String,
    pub description: String,
    pub photo_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSeason {
    pub name: String,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    NotStarted,
    InProgress,
    Completed,
}

impl RaceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    pub id: RaceId,
    pub season_id: SeasonId,
    pub name: String,
    pub date: NaiveDate,
    pub car_class: String,
    pub disciplines: Vec<String>,
    pub completed: bool,
    pub state: RaceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRace {
    pub season_id: SeasonId,
    pub name: String,
    pub date: NaiveDate,
    pub car_class: String,
    pub disciplines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceRegistration {
    pub id: i64,
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub registered_at: DateTime<Utc>,
    pub reroll_used: bool,
    /// The driver accepted the assigned car. A reroll also confirms it.
    pub car_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub name: String,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub price: i64,
    pub rarity: String,
    pub speed: f64,
    pub handling: f64,
    pub acceleration: f64,
    pub launch: f64,
    pub braking: f64,
    pub class_letter: String,
    pub class_number: i32,
}

/// Catalog entry as it appears in a seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCar {
    pub name: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub rarity: String,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub handling: f64,
    #[serde(default)]
    pub acceleration: f64,
    #[serde(default)]
    pub launch: f64,
    #[serde(default)]
    pub braking: f64,
    pub class_letter: String,
    #[serde(default)]
    pub class_number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub car_id: CarId,
    pub assignment_number: AssignmentNumber,
    pub is_reroll: bool,
    pub previous_car_id: Option<CarId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssignment {
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub car_id: CarId,
    pub assignment_number: AssignmentNumber,
}

/// Places per discipline, keyed by discipline name.
pub type Placements = BTreeMap<String, u8>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceResult {
    pub id: i64,
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub car_number: i32,
    pub car_name: String,
    pub car_photo: String,
    pub placements: Placements,
    pub total_score: i32,
    pub reroll_penalty: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRaceResult {
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub car_number: i32,
    pub car_name: String,
    pub car_photo: String,
    pub placements: Placements,
}

/// Size of the lottery range for a class of `car_count` cars:
/// `floor(car_count * 1.7)`, never below 1.
pub fn number_space(car_count: usize) -> usize {
    (car_count * 17 / 10).max(1)
}

/// Catalog index of the car bound to a lottery number.
pub fn car_index_for_number(number: AssignmentNumber, car_count: usize) -> usize {
    let offset = usize::try_from(number.saturating_sub(1)).unwrap_or_default();
    offset % car_count.max(1)
}

pub fn placement_points(place: u8) -> i32 {
    match place {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => 0,
    }
}

pub fn total_score(placements: &Placements, reroll_penalty: i32) -> i32 {
    placements
        .values()
        .map(|place| placement_points(*place))
        .sum::<i32>()
        - reroll_penalty
}

/// Canonical spelling of a car class, if it is one we race in.
pub fn normalize_car_class(input: &str) -> Option<&'static str> {
    let wanted = input.trim().to_uppercase();
    CAR_CLASSES.iter().copied().find(|class| *class == wanted)
}

pub fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is a valid regex")
});

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}
