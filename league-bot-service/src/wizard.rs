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

//! Wizard steps and the pure transition function that drives them.
//!
//! Each variant of [`WizardState`] is one step and carries exactly what the
//! user has entered so far. [`transition`] never touches storage; the router
//! applies its verdict atomically and runs the final [`Effect`].

use chrono::NaiveDate;
use league_common::{
    CAR_CLASSES, DEFAULT_DISCIPLINES, DriverId, MAX_CAR_NAME_LEN, MAX_DRIVER_NAME_LEN, MAX_PLACE,
    MAX_RACE_NAME_LEN, MAX_RESULT_CAR_NUMBER, MAX_SEASON_NAME_LEN, MIN_CAR_NAME_LEN,
    MIN_DRIVER_NAME_LEN, MIN_RACE_NAME_LEN, MIN_SEASON_NAME_LEN, NewRace, NewRaceResult, NewSeason,
    Placements, RaceId, SKIP_MARKER, SeasonId, normalize_car_class, parse_date,
};

use crate::messaging::Button;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceDraft {
    pub season_id: SeasonId,
    pub name: String,
    pub date: NaiveDate,
    pub car_class: String,
}

/// The race a driver is entering a result for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    pub race_id: RaceId,
    pub driver_id: DriverId,
    pub disciplines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDraft {
    pub entry: ResultEntry,
    pub car_number: i32,
    pub car_name: String,
    pub car_photo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardState {
    RegisterName,
    RegisterDescription {
        name: String,
    },
    RegisterPhoto {
        name: String,
        description: String,
    },
    NewSeasonName,
    NewSeasonStartDate {
        name: String,
    },
    NewRaceName {
        season_id: SeasonId,
    },
    NewRaceDate {
        season_id: SeasonId,
        name: String,
    },
    NewRaceCarClass {
        season_id: SeasonId,
        name: String,
        date: NaiveDate,
    },
    NewRaceDisciplines {
        draft: RaceDraft,
        selected: Vec<String>,
    },
    ResultCarNumber {
        entry: ResultEntry,
    },
    ResultCarName {
        entry: ResultEntry,
        car_number: i32,
    },
    ResultCarPhoto {
        entry: ResultEntry,
        car_number: i32,
        car_name: String,
    },
    ResultPlacements {
        draft: ResultDraft,
        placements: Placements,
    },
}

impl WizardState {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RegisterName => "register_name",
            Self::RegisterDescription { .. } => "register_description",
            Self::RegisterPhoto { .. } => "register_photo",
            Self::NewSeasonName => "new_season_name",
            Self::NewSeasonStartDate { .. } => "new_season_start_date",
            Self::NewRaceName { .. } => "new_race_name",
            Self::NewRaceDate { .. } => "new_race_date",
            Self::NewRaceCarClass { .. } => "new_race_car_class",
            Self::NewRaceDisciplines { .. } => "new_race_disciplines",
            Self::ResultCarNumber { .. } => "add_result_car_number",
            Self::ResultCarName { .. } => "add_result_car_name",
            Self::ResultCarPhoto { .. } => "add_result_car_photo",
            Self::ResultPlacements { .. } => "add_result_placements",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardInput<'a> {
    Text(&'a str),
    /// Photo attachment, identified by the messenger's file id.
    Photo(&'a str),
    ToggleDiscipline(usize),
    DisciplinesDone,
    Place {
        discipline: &'a str,
        place: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }
}

/// Side effect of a completed wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RegisterDriver {
        name: String,
        description: String,
        photo_ref: String,
    },
    CreateSeason(NewSeason),
    CreateRace(NewRace),
    RecordResult(NewRaceResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Input rejected; state stays as it is.
    Stay(Reply),
    Move(WizardState, Reply),
    Finish(Effect),
    /// The event does not belong to this step at all.
    Mismatch,
}

/// The message that asks for a step's input.
pub fn prompt(state: &WizardState) -> Reply {
    match state {
        WizardState::RegisterName => Reply::text(format!(
            "Enter your driver name ({MIN_DRIVER_NAME_LEN}-{MAX_DRIVER_NAME_LEN} characters)."
        )),
        WizardState::RegisterDescription { .. } => {
            Reply::text(format!("Tell us about yourself, or send {SKIP_MARKER} to skip."))
        }
        WizardState::RegisterPhoto { .. } => Reply::text(format!(
            "Send a photo for your driver card, or {SKIP_MARKER} to skip."
        )),
        WizardState::NewSeasonName => Reply::text(format!(
            "Season name ({MIN_SEASON_NAME_LEN}-{MAX_SEASON_NAME_LEN} characters)?"
        )),
        WizardState::NewSeasonStartDate { .. } => Reply::text("Season start date (DD.MM.YYYY)?"),
        WizardState::NewRaceName { .. } => Reply::text(format!(
            "Race name ({MIN_RACE_NAME_LEN}-{MAX_RACE_NAME_LEN} characters)?"
        )),
        WizardState::NewRaceDate { .. } => Reply::text("Race date (DD.MM.YYYY)?"),
        WizardState::NewRaceCarClass { .. } => {
            Reply::text(format!("Car class ({})?", CAR_CLASSES.join(", ")))
        }
        WizardState::NewRaceDisciplines { selected, .. } => {
            let mut buttons: Vec<Button> = DEFAULT_DISCIPLINES
                .iter()
                .enumerate()
                .map(|(index, discipline)| {
                    let mark = if selected.iter().any(|s| s == discipline) {
                        "[x]"
                    } else {
                        "[ ]"
                    };
                    Button::new(format!("{mark} {discipline}"), format!("discipline:{index}"))
                })
                .collect();
            buttons.push(Button::new("Done", "disciplines_done"));
            buttons.push(Button::new("Cancel", "cancel"));
            Reply {
                text: "Pick the disciplines, then press Done.".to_string(),
                buttons,
            }
        }
        WizardState::ResultCarNumber { .. } => Reply::text(format!(
            "Your car number (1-{MAX_RESULT_CAR_NUMBER})?"
        )),
        WizardState::ResultCarName { .. } => Reply::text(format!(
            "Car name ({MIN_CAR_NAME_LEN}-{MAX_CAR_NAME_LEN} characters)?"
        )),
        WizardState::ResultCarPhoto { .. } => {
            Reply::text(format!("Send a photo of the car, or {SKIP_MARKER} to skip."))
        }
        WizardState::ResultPlacements { draft, placements } => {
            let Some(discipline) = pending_discipline(draft, placements) else {
                return Reply::text("All places are in.");
            };
            let buttons = (0..=MAX_PLACE)
                .map(|place| {
                    Button::new(place.to_string(), format!("place:{discipline}:{place}"))
                })
                .collect();
            Reply {
                text: format!("Your place in {discipline} (0-{MAX_PLACE}, 0 if you did not place)?"),
                buttons,
            }
        }
    }
}

pub fn transition(state: &WizardState, input: WizardInput<'_>) -> Transition {
    use WizardInput::{DisciplinesDone, Photo, Place, Text, ToggleDiscipline};

    match (state, input) {
        (WizardState::RegisterName, Text(text)) => {
            match bounded_text(text, MIN_DRIVER_NAME_LEN, MAX_DRIVER_NAME_LEN) {
                Ok(name) => advance(WizardState::RegisterDescription { name }),
                Err(problem) => retry(state, &problem),
            }
        }
        (WizardState::RegisterDescription { name }, Text(text)) => {
            advance(WizardState::RegisterPhoto {
                name: name.clone(),
                description: optional_text(text),
            })
        }
        (WizardState::RegisterPhoto { name, description }, Photo(file_id)) => {
            Transition::Finish(Effect::RegisterDriver {
                name: name.clone(),
                description: description.clone(),
                photo_ref: file_id.to_string(),
            })
        }
        (WizardState::RegisterPhoto { name, description }, Text(text)) if is_skip(text) => {
            Transition::Finish(Effect::RegisterDriver {
                name: name.clone(),
                description: description.clone(),
                photo_ref: String::new(),
            })
        }

        (WizardState::NewSeasonName, Text(text)) => {
            match bounded_text(text, MIN_SEASON_NAME_LEN, MAX_SEASON_NAME_LEN) {
                Ok(name) => advance(WizardState::NewSeasonStartDate { name }),
                Err(problem) => retry(state, &problem),
            }
        }
        (WizardState::NewSeasonStartDate { name }, Text(text)) => match parse_date(text) {
            Some(start_date) => Transition::Finish(Effect::CreateSeason(NewSeason {
                name: name.clone(),
                start_date,
            })),
            None => retry(state, "That is not a DD.MM.YYYY date."),
        },

        (WizardState::NewRaceName { season_id }, Text(text)) => {
            match bounded_text(text, MIN_RACE_NAME_LEN, MAX_RACE_NAME_LEN) {
                Ok(name) => advance(WizardState::NewRaceDate {
                    season_id: *season_id,
                    name,
                }),
                Err(problem) => retry(state, &problem),
            }
        }
        (WizardState::NewRaceDate { season_id, name }, Text(text)) => match parse_date(text) {
            Some(date) => advance(WizardState::NewRaceCarClass {
                season_id: *season_id,
                name: name.clone(),
                date,
            }),
            None => retry(state, "That is not a DD.MM.YYYY date."),
        },
        (
            WizardState::NewRaceCarClass {
                season_id,
                name,
                date,
            },
            Text(text),
        ) => match normalize_car_class(text) {
            Some(car_class) => advance(WizardState::NewRaceDisciplines {
                draft: RaceDraft {
                    season_id: *season_id,
                    name: name.clone(),
                    date: *date,
                    car_class: car_class.to_string(),
                },
                selected: Vec::new(),
            }),
            None => retry(state, "Unknown car class."),
        },
        (WizardState::NewRaceDisciplines { draft, selected }, ToggleDiscipline(index)) => {
            let Some(discipline) = DEFAULT_DISCIPLINES.get(index) else {
                return retry(state, "Unknown discipline.");
            };
            let mut selected = selected.clone();
            match selected.iter().position(|s| s == discipline) {
                Some(at) => {
                    selected.remove(at);
                }
                None => selected.push(discipline.to_string()),
            }
            advance(WizardState::NewRaceDisciplines {
                draft: draft.clone(),
                selected,
            })
        }
        (WizardState::NewRaceDisciplines { draft, selected }, DisciplinesDone) => {
            if selected.is_empty() {
                return retry(state, "Pick at least one discipline.");
            }
            let disciplines = DEFAULT_DISCIPLINES
                .iter()
                .filter(|d| selected.iter().any(|s| s == *d))
                .map(|d| d.to_string())
                .collect();
            Transition::Finish(Effect::CreateRace(NewRace {
                season_id: draft.season_id,
                name: draft.name.clone(),
                date: draft.date,
                car_class: draft.car_class.clone(),
                disciplines,
            }))
        }
        (WizardState::NewRaceDisciplines { .. }, Text(_) | Photo(_)) => {
            retry(state, "Use the buttons below.")
        }

        (WizardState::ResultCarNumber { entry }, Text(text)) => match text.trim().parse::<i32>() {
            Ok(car_number) if (1..=MAX_RESULT_CAR_NUMBER).contains(&car_number) => {
                advance(WizardState::ResultCarName {
                    entry: entry.clone(),
                    car_number,
                })
            }
            _ => retry(
                state,
                &format!("The car number must be between 1 and {MAX_RESULT_CAR_NUMBER}."),
            ),
        },
        (WizardState::ResultCarName { entry, car_number }, Text(text)) => {
            match bounded_text(text, MIN_CAR_NAME_LEN, MAX_CAR_NAME_LEN) {
                Ok(car_name) => advance(WizardState::ResultCarPhoto {
                    entry: entry.clone(),
                    car_number: *car_number,
                    car_name,
                }),
                Err(problem) => retry(state, &problem),
            }
        }
        (
            WizardState::ResultCarPhoto {
                entry,
                car_number,
                car_name,
            },
            Photo(_) | Text(_),
        ) => {
            let car_photo = match input {
                Photo(file_id) => file_id.to_string(),
                Text(text) if is_skip(text) => String::new(),
                _ => return retry(state, &format!("Send a photo or {SKIP_MARKER}.")),
            };
            let draft = ResultDraft {
                entry: entry.clone(),
                car_number: *car_number,
                car_name: car_name.clone(),
                car_photo,
            };
            placements_step(draft, Placements::new())
        }
        (WizardState::ResultPlacements { draft, placements }, Place { discipline, place }) => {
            if pending_discipline(draft, placements) != Some(discipline) {
                return retry(state, "That answer is for a different discipline.");
            }
            record_place(state, draft, placements, place)
        }
        (WizardState::ResultPlacements { draft, placements }, Text(text)) => {
            record_place(state, draft, placements, text)
        }

        (WizardState::RegisterPhoto { .. }, Text(_)) => {
            retry(state, &format!("Send a photo or {SKIP_MARKER}."))
        }
        (_, Text(_)) => retry(state, "Please answer the question."),
        (_, Photo(_)) => retry(state, "Please answer with text."),
        _ => Transition::Mismatch,
    }
}

fn advance(next: WizardState) -> Transition {
    let reply = prompt(&next);
    Transition::Move(next, reply)
}

fn retry(state: &WizardState, problem: &str) -> Transition {
    let mut reply = prompt(state);
    reply.text = format!("{problem}\n{}", reply.text);
    Transition::Stay(reply)
}

fn is_skip(text: &str) -> bool {
    text.trim() == SKIP_MARKER
}

fn optional_text(text: &str) -> String {
    if is_skip(text) {
        String::new()
    } else {
        text.trim().to_string()
    }
}

fn bounded_text(text: &str, min: usize, max: usize) -> Result<String, String> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if (min..=max).contains(&len) {
        Ok(trimmed.to_string())
    } else {
        Err(format!("Must be {min} to {max} characters long."))
    }
}

fn pending_discipline<'a>(draft: &'a ResultDraft, placements: &Placements) -> Option<&'a str> {
    draft
        .entry
        .disciplines
        .iter()
        .find(|d| !placements.contains_key(*d))
        .map(String::as_str)
}

fn record_place(
    state: &WizardState,
    draft: &ResultDraft,
    placements: &Placements,
    raw: &str,
) -> Transition {
    let Some(discipline) = pending_discipline(draft, placements) else {
        return placements_step(draft.clone(), placements.clone());
    };
    match raw.trim().parse::<u8>() {
        Ok(place) if place <= MAX_PLACE => {
            let mut placements = placements.clone();
            placements.insert(discipline.to_string(), place);
            placements_step(draft.clone(), placements)
        }
        _ => retry(state, &format!("The place must be between 0 and {MAX_PLACE}.")),
    }
}

fn placements_step(draft: ResultDraft, placements: Placements) -> Transition {
    if pending_discipline(&draft, &placements).is_some() {
        return advance(WizardState::ResultPlacements { draft, placements });
    }
    Transition::Finish(Effect::RecordResult(NewRaceResult {
        race_id: draft.entry.race_id,
        driver_id: draft.entry.driver_id,
        car_number: draft.car_number,
        car_name: draft.car_name,
        car_photo: draft.car_photo,
        placements,
    }))
}
