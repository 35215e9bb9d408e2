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

use std::collections::HashSet;
use std::sync::Arc;

use league_common::{
    DriverId, NewDriver, NewRaceResult, REROLL_PENALTY, Race, RaceId, RaceResult, RaceState,
    format_date, normalize_car_class,
};
use tracing::{debug, info, warn};

use crate::allocator::{AllocatedCar, AssignmentAllocator};
use crate::error::BotError;
use crate::messaging::{Button, ChatId, Messenger};
use crate::reroll::RerollPolicy;
use crate::state::{Next, StateStore, UserId};
use crate::store::{CarCatalog, LeagueStore, LeagueTx};
use crate::wizard::{self, Effect, Reply, ResultEntry, Transition, WizardInput, WizardState};

const HELP_TEXT: &str = "\
/register - join the league as a driver
/joinrace <race> - sign up for a race
/leaverace <race> - withdraw before the race starts
/mycar <race> - show the car you drew
/reroll <race> - swap your car once, for a 1 point penalty
/addresult <race> - enter your race result
/cancel - abort the current dialog
Admins: /newseason, /newrace, /startrace <race>, /assigncars <race> <class>, /completerace <race>";

const UNRECOGNIZED_HINT: &str = "I did not understand that. Send /help for the list of commands.";
const REGISTRATION_CLOSED: &str = "Registration for this race is closed.";
const NOT_REGISTERED: &str = "You are not registered for this race.";
const NO_CAR_YET: &str = "You have no car for this race yet.";
const RACE_FINISHED: &str = "This race is already finished.";

/// An inbound chat event, already stripped of transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Command {
        user: UserId,
        chat: ChatId,
        verb: String,
        args: Vec<String>,
    },
    Message {
        user: UserId,
        chat: ChatId,
        text: Option<String>,
        photo: Option<String>,
    },
    Callback {
        user: UserId,
        chat: ChatId,
        message_id: Option<i64>,
        action: String,
        args: Vec<String>,
    },
}

impl ChatEvent {
    /// Parses `/verb@botname arg1 arg2`. `None` for text that is not a command.
    pub fn command(user: UserId, chat: ChatId, text: &str) -> Option<Self> {
        let mut words = text.trim().strip_prefix('/')?.split_whitespace();
        let verb = words.next()?.split('@').next()?.to_lowercase();
        if verb.is_empty() {
            return None;
        }
        Some(Self::Command {
            user,
            chat,
            verb,
            args: words.map(str::to_string).collect(),
        })
    }

    /// Splits callback data of the form `action:arg1:arg2`.
    pub fn callback(user: UserId, chat: ChatId, message_id: Option<i64>, data: &str) -> Self {
        let mut parts = data.split(':');
        let action = parts.next().unwrap_or_default().to_string();
        Self::Callback {
            user,
            chat,
            message_id,
            action,
            args: parts.map(str::to_string).collect(),
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            Self::Command { user, .. } | Self::Message { user, .. } | Self::Callback { user, .. } => {
                *user
            }
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            Self::Command { chat, .. } | Self::Message { chat, .. } | Self::Callback { chat, .. } => {
                *chat
            }
        }
    }
}

enum StepOutcome {
    Reply(Reply),
    Effect(Effect),
    Mismatch(&'static str),
}

pub struct ConversationRouter {
    states: Arc<StateStore>,
    store: Arc<dyn LeagueStore>,
    catalog: Arc<dyn CarCatalog>,
    messenger: Arc<dyn Messenger>,
    allocator: AssignmentAllocator,
    rerolls: RerollPolicy,
    admins: HashSet<UserId>,
}

impl ConversationRouter {
    pub fn new(
        states: Arc<StateStore>,
        store: Arc<dyn LeagueStore>,
        catalog: Arc<dyn CarCatalog>,
        messenger: Arc<dyn Messenger>,
        allocator: AssignmentAllocator,
        rerolls: RerollPolicy,
        admins: HashSet<UserId>,
    ) -> Self {
        Self {
            states,
            store,
            catalog,
            messenger,
            allocator,
            rerolls,
            admins,
        }
    }

    /// Handles one event end to end. Failures are reported to the user and
    /// logged, never returned.
    pub async fn handle(&self, event: ChatEvent) {
        let user = event.user();
        let chat = event.chat();
        if let Err(error) = self.dispatch(event).await {
            error.log(user);
            self.say(chat, &error.user_message()).await;
        }
    }

    async fn dispatch(&self, event: ChatEvent) -> Result<(), BotError> {
        match event {
            ChatEvent::Command {
                user,
                chat,
                verb,
                args,
            } => self.on_command(user, chat, &verb, &args).await,
            ChatEvent::Message {
                user,
                chat,
                text,
                photo,
            } => self.on_message(user, chat, text.as_deref(), photo.as_deref()).await,
            ChatEvent::Callback {
                user,
                chat,
                message_id,
                action,
                args,
            } => {
                self.on_callback(user, chat, message_id, &action, &args)
                    .await
            }
        }
    }

    async fn on_command(
        &self,
        user: UserId,
        chat: ChatId,
        verb: &str,
        args: &[String],
    ) -> Result<(), BotError> {
        debug!(user, verb, "command received");
        match verb {
            "start" | "help" => {
                self.say(chat, HELP_TEXT).await;
                Ok(())
            }
            "cancel" => self.cancel(user, chat).await,
            "register" => self.begin_registration(user, chat).await,
            "newseason" => {
                self.require_admin(user)?;
                self.enter(user, chat, WizardState::NewSeasonName).await;
                Ok(())
            }
            "newrace" => {
                self.require_admin(user)?;
                let season = self
                    .store
                    .active_season()
                    .await?
                    .ok_or_else(|| BotError::NotFound("an active season".to_string()))?;
                self.enter(
                    user,
                    chat,
                    WizardState::NewRaceName {
                        season_id: season.id,
                    },
                )
                .await;
                Ok(())
            }
            "joinrace" => self.join_race(user, chat, race_arg(args, verb)?).await,
            "leaverace" => self.leave_race(user, chat, race_arg(args, verb)?).await,
            "mycar" => self.my_car(user, chat, race_arg(args, verb)?).await,
            "addresult" => self.begin_result(user, chat, race_arg(args, verb)?).await,
            "reroll" => self.reroll(user, chat, race_arg(args, verb)?).await,
            "startrace" => {
                self.require_admin(user)?;
                self.start_race(chat, race_arg(args, verb)?).await
            }
            "assigncars" => {
                self.require_admin(user)?;
                let race_id = race_arg(args, verb)?;
                let class = args.get(1).ok_or_else(|| {
                    BotError::Validation("Usage: /assigncars <race> <class>".to_string())
                })?;
                self.assign_cars(chat, race_id, class).await
            }
            "completerace" => {
                self.require_admin(user)?;
                self.ask_to_complete(chat, race_arg(args, verb)?).await
            }
            _ => {
                self.say(chat, "Unknown command, see /help.").await;
                Ok(())
            }
        }
    }

    async fn on_message(
        &self,
        user: UserId,
        chat: ChatId,
        text: Option<&str>,
        photo: Option<&str>,
    ) -> Result<(), BotError> {
        let input = match (photo, text) {
            (Some(file_id), _) => WizardInput::Photo(file_id),
            (None, Some(text)) => WizardInput::Text(text),
            (None, None) => return Ok(()),
        };
        if !self.advance(user, chat, input).await? {
            self.say(chat, UNRECOGNIZED_HINT).await;
        }
        Ok(())
    }

    async fn on_callback(
        &self,
        user: UserId,
        chat: ChatId,
        message_id: Option<i64>,
        action: &str,
        args: &[String],
    ) -> Result<(), BotError> {
        debug!(user, action, ?args, "callback received");
        match action {
            "cancel" => self.cancel(user, chat).await,
            "discipline" => {
                let index = args
                    .first()
                    .and_then(|arg| arg.parse::<usize>().ok())
                    .ok_or_else(|| BotError::Validation("Unknown discipline.".to_string()))?;
                self.wizard_callback(user, chat, message_id, WizardInput::ToggleDiscipline(index))
                    .await
            }
            "disciplines_done" => {
                self.wizard_callback(user, chat, message_id, WizardInput::DisciplinesDone)
                    .await
            }
            "place" => match args {
                [discipline, place] => {
                    let input = WizardInput::Place { discipline, place };
                    self.wizard_callback(user, chat, message_id, input).await
                }
                _ => Err(BotError::Validation("Unknown place.".to_string())),
            },
            "register_race" => self.join_race(user, chat, race_arg(args, action)?).await,
            "unregister_race" => self.leave_race(user, chat, race_arg(args, action)?).await,
            "add_result" => self.begin_result(user, chat, race_arg(args, action)?).await,
            "reroll_car" => self.reroll(user, chat, race_arg(args, action)?).await,
            "confirm_car" => self.confirm_car(user, chat, race_arg(args, action)?).await,
            "race_start_confirm" => {
                self.require_admin(user)?;
                self.start_race(chat, race_arg(args, action)?).await
            }
            "race_assign_cars" => {
                self.require_admin(user)?;
                let race_id = race_arg(args, action)?;
                let class = args
                    .get(1)
                    .ok_or_else(|| BotError::Validation("Pick a car class.".to_string()))?;
                self.assign_cars(chat, race_id, class).await
            }
            "race_complete_confirm" => {
                self.require_admin(user)?;
                self.complete_race(chat, race_arg(args, action)?).await?;
                self.drop_keyboard(chat, message_id).await;
                Ok(())
            }
            _ => Err(BotError::Validation("Unknown action.".to_string())),
        }
    }

    /// Feeds `input` to the user's wizard. `false` when there is no wizard.
    async fn advance(
        &self,
        user: UserId,
        chat: ChatId,
        input: WizardInput<'_>,
    ) -> Result<bool, BotError> {
        let outcome = self
            .states
            .step(user, |state| match wizard::transition(state, input) {
                Transition::Stay(reply) => (Next::Keep, StepOutcome::Reply(reply)),
                Transition::Move(next, reply) => (Next::Replace(next), StepOutcome::Reply(reply)),
                Transition::Finish(effect) => (Next::Clear, StepOutcome::Effect(effect)),
                Transition::Mismatch => (Next::Keep, StepOutcome::Mismatch(state.tag())),
            })
            .await;

        match outcome {
            None => Ok(false),
            Some(StepOutcome::Reply(reply)) => {
                self.reply(chat, &reply).await;
                Ok(true)
            }
            Some(StepOutcome::Effect(effect)) => {
                self.apply(user, chat, effect).await?;
                Ok(true)
            }
            Some(StepOutcome::Mismatch(tag)) => Err(BotError::State(format!(
                "event does not belong to step {tag}"
            ))),
        }
    }

    async fn wizard_callback(
        &self,
        user: UserId,
        chat: ChatId,
        message_id: Option<i64>,
        input: WizardInput<'_>,
    ) -> Result<(), BotError> {
        if !self.advance(user, chat, input).await? {
            return Err(BotError::State("no wizard in progress".to_string()));
        }
        self.drop_keyboard(chat, message_id).await;
        Ok(())
    }

    async fn drop_keyboard(&self, chat: ChatId, message_id: Option<i64>) {
        if let Some(message_id) = message_id {
            if let Err(error) = self.messenger.delete_message(chat, message_id).await {
                warn!(chat, message_id, error = %error, "failed to delete stale keyboard");
            }
        }
    }

    /// Runs a finished wizard's side effect. The wizard state is already gone.
    async fn apply(&self, user: UserId, chat: ChatId, effect: Effect) -> Result<(), BotError> {
        match effect {
            Effect::RegisterDriver {
                name,
                description,
                photo_ref,
            } => {
                let driver = self
                    .store
                    .create_driver(NewDriver {
                        external_chat_id: user,
                        name,
                        description,
                        photo_ref,
                    })
                    .await?;
                info!(user, driver_id = driver.id, "driver registered");
                self.say(chat, &format!("Welcome to the league, {}!", driver.name))
                    .await;
            }
            Effect::CreateSeason(season) => {
                let season = self.store.create_season(season).await?;
                info!(user, season_id = season.id, "season created");
                self.say(
                    chat,
                    &format!(
                        "Season {} starts {} and is now active.",
                        season.name,
                        format_date(season.start_date)
                    ),
                )
                .await;
            }
            Effect::CreateRace(race) => {
                let race = self.store.create_race(race).await?;
                info!(user, race_id = race.id, class = %race.car_class, "race created");
                let buttons = vec![Button::new("Join", format!("register_race:{}", race.id))];
                self.reply(
                    chat,
                    &Reply {
                        text: format!(
                            "Race {} (#{}) on {}, class {}: {}.",
                            race.name,
                            race.id,
                            format_date(race.date),
                            race.car_class,
                            race.disciplines.join(", ")
                        ),
                        buttons,
                    },
                )
                .await;
            }
            Effect::RecordResult(result) => {
                let result = self.record_result(result).await?;
                info!(
                    user,
                    race_id = result.race_id,
                    total_score = result.total_score,
                    reroll_penalty = result.reroll_penalty,
                    "result recorded"
                );
                self.say(
                    chat,
                    &format!("Result saved: {} points.", result.total_score),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn record_result(&self, result: NewRaceResult) -> Result<RaceResult, BotError> {
        let mut tx = self.store.begin().await?;
        let saved = insert_result(tx.as_mut(), result).await;
        finish(tx, saved, "result").await
    }

    async fn begin_registration(&self, user: UserId, chat: ChatId) -> Result<(), BotError> {
        if self.store.driver_by_chat_id(user).await?.is_some() {
            return Err(BotError::Validation("You are already registered.".to_string()));
        }
        self.enter(user, chat, WizardState::RegisterName).await;
        Ok(())
    }

    async fn begin_result(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let race = self
            .store
            .race(race_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("race {race_id}")))?;
        if race.state == RaceState::Completed {
            return Err(BotError::Validation(RACE_FINISHED.to_string()));
        }
        if self.store.result_for(race_id, driver_id).await?.is_some() {
            return Err(BotError::Validation(
                "You already entered a result for this race.".to_string(),
            ));
        }
        self.enter(
            user,
            chat,
            WizardState::ResultCarNumber {
                entry: ResultEntry {
                    race_id,
                    driver_id,
                    disciplines: race.disciplines,
                },
            },
        )
        .await;
        Ok(())
    }

    async fn join_race(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let mut tx = self.store.begin().await?;
        let joined = join_in(tx.as_mut(), race_id, driver_id).await;
        let (race, joined) = finish(tx, joined, "race registration").await?;
        if joined {
            info!(user, race_id, driver_id, "driver joined race");
            self.say(chat, &format!("You are in for {}.", race.name)).await;
        } else {
            self.say(chat, "You are already registered for this race.").await;
        }
        Ok(())
    }

    async fn leave_race(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let mut tx = self.store.begin().await?;
        let left = leave_in(tx.as_mut(), race_id, driver_id).await;
        let race = finish(tx, left, "race withdrawal").await?;
        info!(user, race_id, driver_id, "driver left race");
        self.say(chat, &format!("You are no longer registered for {}.", race.name))
            .await;
        Ok(())
    }

    async fn my_car(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let race = self
            .store
            .race(race_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("race {race_id}")))?;
        let registration = self
            .store
            .registrations(race_id)
            .await?
            .into_iter()
            .find(|registration| registration.driver_id == driver_id)
            .ok_or_else(|| BotError::Validation(NOT_REGISTERED.to_string()))?;
        let assignment = self
            .store
            .assignments(race_id)
            .await?
            .into_iter()
            .find(|assignment| assignment.driver_id == driver_id)
            .ok_or_else(|| BotError::Validation(NO_CAR_YET.to_string()))?;
        let car = self
            .catalog
            .car(assignment.car_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("car {}", assignment.car_id)))?;

        let year = car.year.map(|year| format!(" ({year})")).unwrap_or_default();
        let mut text = format!(
            "Your car for {}: {}{year}, number {}.\n\
             Class {} {}, {} CR, {}.\n\
             Speed {:.1}, handling {:.1}, acceleration {:.1}, launch {:.1}, braking {:.1}.",
            race.name,
            car.name,
            assignment.assignment_number,
            car.class_letter,
            car.class_number,
            car.price,
            car.rarity,
            car.speed,
            car.handling,
            car.acceleration,
            car.launch,
            car.braking,
        );
        if assignment.is_reroll {
            text.push_str("\nDrawn by a reroll.");
        }

        let mut buttons = Vec::new();
        if registration.car_confirmed {
            text.push_str("\nConfirmed.");
        } else if race.state != RaceState::Completed {
            buttons.push(Button::new("Confirm car", format!("confirm_car:{race_id}")));
            if !registration.reroll_used {
                buttons.push(Button::new(
                    format!("Reroll (-{REROLL_PENALTY})"),
                    format!("reroll_car:{race_id}"),
                ));
            }
        }
        self.reply(chat, &Reply { text, buttons }).await;
        Ok(())
    }

    async fn confirm_car(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let mut tx = self.store.begin().await?;
        let confirmed = confirm_in(tx.as_mut(), race_id, driver_id).await;
        if finish(tx, confirmed, "car confirmation").await? {
            info!(user, race_id, driver_id, "car confirmed");
            self.say(chat, "Car confirmed. Good luck!").await;
        } else {
            self.say(chat, "Your car is already confirmed.").await;
        }
        Ok(())
    }

    async fn ask_to_complete(&self, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let race = self
            .store
            .race(race_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("race {race_id}")))?;
        if race.state == RaceState::Completed {
            return Err(BotError::Validation(RACE_FINISHED.to_string()));
        }
        self.reply(
            chat,
            &Reply {
                text: format!(
                    "Finish {}? Drivers will no longer be able to enter results.",
                    race.name
                ),
                buttons: vec![Button::new(
                    "Finish race",
                    format!("race_complete_confirm:{race_id}"),
                )],
            },
        )
        .await;
        Ok(())
    }

    async fn complete_race(&self, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let mut tx = self.store.begin().await?;
        let completed = complete_in(tx.as_mut(), race_id).await;
        let (race, results) = finish(tx, completed, "race completion").await?;
        info!(race_id, results, "race completed");
        self.say(
            chat,
            &format!("{} is finished. Results recorded: {results}.", race.name),
        )
        .await;
        Ok(())
    }

    async fn start_race(&self, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let plan = self.allocator.start_race(race_id).await?;
        self.say(chat, &format!("Race started.\n{}", describe_plan(&plan)))
            .await;
        Ok(())
    }

    async fn assign_cars(&self, chat: ChatId, race_id: RaceId, class: &str) -> Result<(), BotError> {
        let class = normalize_car_class(class)
            .ok_or_else(|| BotError::Validation(format!("Unknown car class {class}.")))?;
        let drivers: Vec<DriverId> = self
            .store
            .registrations(race_id)
            .await?
            .into_iter()
            .map(|registration| registration.driver_id)
            .collect();
        let plan = self.allocator.allocate(race_id, class, &drivers).await?;
        if plan.is_empty() {
            self.say(chat, "Nobody is registered, nothing to assign.").await;
        } else {
            self.say(chat, &format!("Cars drawn from class {class}.\n{}", describe_plan(&plan)))
                .await;
        }
        Ok(())
    }

    async fn reroll(&self, user: UserId, chat: ChatId, race_id: RaceId) -> Result<(), BotError> {
        let driver_id = self.driver_id(user).await?;
        let outcome = self.rerolls.reroll(race_id, driver_id).await?;
        let mut text = format!(
            "Your new car: {} (#{}).",
            outcome.car.name, outcome.assignment.assignment_number
        );
        if outcome.car.id == outcome.previous_car_id {
            text.push_str(" The lottery gave you the same car again.");
        }
        text.push_str(&format!(" {REROLL_PENALTY} point will be taken from your result."));
        self.say(chat, &text).await;
        Ok(())
    }

    async fn cancel(&self, user: UserId, chat: ChatId) -> Result<(), BotError> {
        if self.states.clear_state(user).await {
            self.say(chat, "Cancelled.").await;
        } else {
            self.say(chat, "Nothing to cancel.").await;
        }
        Ok(())
    }

    async fn enter(&self, user: UserId, chat: ChatId, state: WizardState) {
        if let Some(previous) = self.states.get_state(user).await {
            debug!(user, step = previous.tag(), "wizard replaced");
        }
        let reply = wizard::prompt(&state);
        debug!(user, step = state.tag(), "wizard started");
        self.states.set_state(user, state).await;
        self.reply(chat, &reply).await;
    }

    async fn driver_id(&self, user: UserId) -> Result<DriverId, BotError> {
        self.store
            .driver_by_chat_id(user)
            .await?
            .map(|driver| driver.id)
            .ok_or_else(|| BotError::NotFound("your driver profile, use /register first".to_string()))
    }

    fn require_admin(&self, user: UserId) -> Result<(), BotError> {
        if self.admins.contains(&user) {
            Ok(())
        } else {
            Err(BotError::Forbidden)
        }
    }

    async fn reply(&self, chat: ChatId, reply: &Reply) {
        let sent = if reply.buttons.is_empty() {
            self.messenger.send_text(chat, &reply.text).await
        } else {
            self.messenger
                .send_choices(chat, &reply.text, &reply.buttons)
                .await
        };
        if let Err(error) = sent {
            warn!(chat, error = %error, "failed to send reply");
        }
    }

    async fn say(&self, chat: ChatId, text: &str) {
        if let Err(error) = self.messenger.send_text(chat, text).await {
            warn!(chat, error = %error, "failed to send message");
        }
    }
}

/// A finished race takes no more results.
async fn insert_result(
    tx: &mut dyn LeagueTx,
    result: NewRaceResult,
) -> Result<RaceResult, BotError> {
    let race = race_for_update(tx, result.race_id).await?;
    if race.state == RaceState::Completed {
        return Err(BotError::Validation(RACE_FINISHED.to_string()));
    }
    let penalty = match tx
        .registration_for_update(result.race_id, result.driver_id)
        .await?
    {
        Some(registration) if registration.reroll_used => REROLL_PENALTY,
        _ => 0,
    };
    Ok(tx.insert_result(result, penalty).await?)
}

/// Commits on success and rolls back otherwise.
async fn finish<T>(
    tx: Box<dyn LeagueTx>,
    outcome: Result<T, BotError>,
    what: &str,
) -> Result<T, BotError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(what, error = %rollback_error, "failed to roll back");
            }
            Err(error)
        }
    }
}

async fn race_for_update(tx: &mut dyn LeagueTx, race_id: RaceId) -> Result<Race, BotError> {
    tx.race_for_update(race_id)
        .await?
        .ok_or_else(|| BotError::NotFound(format!("race {race_id}")))
}

/// Registration stays open until the race starts.
async fn join_in(
    tx: &mut dyn LeagueTx,
    race_id: RaceId,
    driver_id: DriverId,
) -> Result<(Race, bool), BotError> {
    let race = race_for_update(tx, race_id).await?;
    if race.state != RaceState::NotStarted {
        return Err(BotError::Validation(REGISTRATION_CLOSED.to_string()));
    }
    let joined = tx.insert_registration(race_id, driver_id).await?;
    Ok((race, joined))
}

/// Withdrawing also gives back a car drawn before the start.
async fn leave_in(
    tx: &mut dyn LeagueTx,
    race_id: RaceId,
    driver_id: DriverId,
) -> Result<Race, BotError> {
    let race = race_for_update(tx, race_id).await?;
    if race.state != RaceState::NotStarted {
        return Err(BotError::Validation(REGISTRATION_CLOSED.to_string()));
    }
    if !tx.delete_registration(race_id, driver_id).await? {
        return Err(BotError::Validation(NOT_REGISTERED.to_string()));
    }
    tx.delete_assignment(race_id, driver_id).await?;
    Ok(race)
}

/// `false` when the car was confirmed already.
async fn confirm_in(
    tx: &mut dyn LeagueTx,
    race_id: RaceId,
    driver_id: DriverId,
) -> Result<bool, BotError> {
    let registration = tx
        .registration_for_update(race_id, driver_id)
        .await?
        .ok_or_else(|| BotError::Validation(NOT_REGISTERED.to_string()))?;
    if tx.assignment_for_update(race_id, driver_id).await?.is_none() {
        return Err(BotError::Validation(NO_CAR_YET.to_string()));
    }
    if registration.car_confirmed {
        return Ok(false);
    }
    tx.confirm_car(race_id, driver_id).await?;
    Ok(true)
}

/// Only a started race with at least one result can be finished.
async fn complete_in(tx: &mut dyn LeagueTx, race_id: RaceId) -> Result<(Race, i64), BotError> {
    let race = race_for_update(tx, race_id).await?;
    match race.state {
        RaceState::Completed => return Err(BotError::Validation(RACE_FINISHED.to_string())),
        RaceState::NotStarted => {
            return Err(BotError::Validation(
                "This race has not started yet.".to_string(),
            ));
        }
        RaceState::InProgress => {}
    }
    let results = tx.count_results(race_id).await?;
    if results == 0 {
        return Err(BotError::Validation(
            "Nobody has entered a result for this race yet.".to_string(),
        ));
    }
    tx.set_race_state(race_id, RaceState::Completed).await?;
    Ok((race, results))
}

fn race_arg(args: &[String], verb: &str) -> Result<RaceId, BotError> {
    args.first()
        .and_then(|arg| arg.parse::<RaceId>().ok())
        .ok_or_else(|| BotError::Validation(format!("Usage: /{verb} <race id>")))
}

fn describe_plan(plan: &[AllocatedCar]) -> String {
    let mut lines: Vec<String> = plan
        .iter()
        .map(|allocated| {
            format!(
                "#{} {} - driver {}",
                allocated.number, allocated.car.name, allocated.driver_id
            )
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tests::{catalog, race_with_drivers, seeded_rng};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use league_common::{DEFAULT_DISCIPLINES, NewSeason};
    use std::sync::Mutex;

    const ADMIN: UserId = 1;
    const DRIVER: UserId = 1_000;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(ChatId, String),
        Choices(ChatId, String, Vec<Button>),
        Deleted(ChatId, i64),
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingMessenger {
        fn last_text(&self) -> String {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find_map(|sent| match sent {
                    Sent::Text(_, text) | Sent::Choices(_, text, _) => Some(text.clone()),
                    Sent::Deleted(..) => None,
                })
                .expect("no message sent")
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_text(&self, chat: ChatId, text: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Text(chat, text.to_string()));
            Ok(())
        }

        async fn send_choices(
            &self,
            chat: ChatId,
            text: &str,
            buttons: &[Button],
        ) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Choices(chat, text.to_string(), buttons.to_vec()));
            Ok(())
        }

        async fn delete_message(&self, chat: ChatId, message_id: i64) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Deleted(chat, message_id));
            Ok(())
        }
    }

    struct Harness {
        router: Arc<ConversationRouter>,
        states: Arc<StateStore>,
        store: MemoryStore,
        messenger: Arc<RecordingMessenger>,
    }

    fn harness(store: MemoryStore) -> Harness {
        let states = Arc::new(StateStore::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let rng = seeded_rng(42);
        let router = ConversationRouter::new(
            Arc::clone(&states),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            messenger.clone(),
            AssignmentAllocator::new(Arc::new(store.clone()), Arc::new(store.clone()), rng.clone()),
            RerollPolicy::new(Arc::new(store.clone()), Arc::new(store.clone()), rng),
            [ADMIN].into_iter().collect(),
        );
        Harness {
            router: Arc::new(router),
            states,
            store,
            messenger,
        }
    }

    fn command(user: UserId, text: &str) -> ChatEvent {
        ChatEvent::command(user, user, text).unwrap()
    }

    fn text(user: UserId, text: &str) -> ChatEvent {
        ChatEvent::Message {
            user,
            chat: user,
            text: Some(text.to_string()),
            photo: None,
        }
    }

    fn callback(user: UserId, data: &str) -> ChatEvent {
        ChatEvent::callback(user, user, Some(500), data)
    }

    async fn tag_of(h: &Harness, user: UserId) -> Option<&'static str> {
        h.states.get_state(user).await.map(|state| state.tag())
    }

    #[test]
    fn commands_and_callbacks_are_parsed() {
        assert_eq!(
            ChatEvent::command(1, 2, "/JoinRace@league_bot 12 extra"),
            Some(ChatEvent::Command {
                user: 1,
                chat: 2,
                verb: "joinrace".to_string(),
                args: vec!["12".to_string(), "extra".to_string()],
            })
        );
        assert_eq!(ChatEvent::command(1, 2, "hello"), None);
        assert_eq!(ChatEvent::command(1, 2, "/"), None);

        assert_eq!(
            ChatEvent::callback(1, 2, None, "place:Drag:3"),
            ChatEvent::Callback {
                user: 1,
                chat: 2,
                message_id: None,
                action: "place".to_string(),
                args: vec!["Drag".to_string(), "3".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn registration_round_trip_stores_one_driver() {
        let h = harness(MemoryStore::default());

        h.router.handle(command(DRIVER, "/register")).await;
        assert_eq!(tag_of(&h, DRIVER).await, Some("register_name"));
        h.router.handle(text(DRIVER, "Sebastian")).await;
        h.router.handle(text(DRIVER, "-")).await;
        assert_eq!(tag_of(&h, DRIVER).await, Some("register_photo"));
        h.router.handle(text(DRIVER, "-")).await;

        let driver = h.store.driver_by_chat_id(DRIVER).await.unwrap().unwrap();
        assert_eq!(driver.name, "Sebastian");
        assert_eq!(driver.description, "");
        assert_eq!(driver.photo_ref, "");
        assert!(!h.states.has_state(DRIVER).await);
        assert!(h.messenger.last_text().contains("Welcome"));

        h.router.handle(command(DRIVER, "/register")).await;
        assert!(h.messenger.last_text().contains("already registered"));
        assert!(!h.states.has_state(DRIVER).await);
    }

    #[tokio::test]
    async fn photo_completes_registration() {
        let h = harness(MemoryStore::default());
        h.router.handle(command(DRIVER, "/register")).await;
        h.router.handle(text(DRIVER, "Fernando")).await;
        h.router.handle(text(DRIVER, "Two titles")).await;
        h.router
            .handle(ChatEvent::Message {
                user: DRIVER,
                chat: DRIVER,
                text: None,
                photo: Some("photo-file-id".to_string()),
            })
            .await;

        let driver = h.store.driver_by_chat_id(DRIVER).await.unwrap().unwrap();
        assert_eq!(driver.description, "Two titles");
        assert_eq!(driver.photo_ref, "photo-file-id");
    }

    #[tokio::test]
    async fn short_race_name_keeps_the_step_and_stores_nothing() {
        let h = harness(MemoryStore::default());
        let season = h
            .store
            .create_season(NewSeason {
                name: "Spring".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            })
            .await
            .unwrap();

        h.router.handle(command(ADMIN, "/newrace")).await;
        h.router.handle(text(ADMIN, "ab")).await;

        assert_eq!(tag_of(&h, ADMIN).await, Some("new_race_name"));
        assert!(h.messenger.last_text().contains("Race name"));
        assert_eq!(h.store.race(season.id + 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn race_creation_wizard_persists_the_race() {
        let h = harness(MemoryStore::default());
        let season = h
            .store
            .create_season(NewSeason {
                name: "Spring".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            })
            .await
            .unwrap();

        h.router.handle(command(ADMIN, "/newrace")).await;
        h.router.handle(text(ADMIN, "Grand Prix")).await;
        h.router.handle(text(ADMIN, "01.05.2026")).await;
        h.router.handle(text(ADMIN, "a")).await;
        h.router.handle(callback(ADMIN, "disciplines_done")).await;
        assert_eq!(tag_of(&h, ADMIN).await, Some("new_race_disciplines"));

        h.router.handle(callback(ADMIN, "discipline:2")).await;
        h.router.handle(callback(ADMIN, "discipline:0")).await;
        assert!(h.messenger.sent().contains(&Sent::Deleted(ADMIN, 500)));
        h.router.handle(callback(ADMIN, "disciplines_done")).await;

        assert!(!h.states.has_state(ADMIN).await);
        let race = h.store.race(season.id + 1).await.unwrap().unwrap();
        assert_eq!(race.name, "Grand Prix");
        assert_eq!(race.car_class, "A");
        assert_eq!(race.season_id, season.id);
        assert_eq!(
            race.disciplines,
            vec![DEFAULT_DISCIPLINES[0].to_string(), DEFAULT_DISCIPLINES[2].to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_toggles_all_take_effect() {
        let h = harness(MemoryStore::default());
        h.states
            .set_state(
                ADMIN,
                WizardState::NewRaceDisciplines {
                    draft: wizard::RaceDraft {
                        season_id: 1,
                        name: "Parallel".to_string(),
                        date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
                        car_class: "B".to_string(),
                    },
                    selected: Vec::new(),
                },
            )
            .await;

        let handles: Vec<_> = (0..DEFAULT_DISCIPLINES.len())
            .map(|index| {
                let router = Arc::clone(&h.router);
                tokio::spawn(async move {
                    router
                        .handle(callback(ADMIN, &format!("discipline:{index}")))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        match h.states.get_state(ADMIN).await {
            Some(WizardState::NewRaceDisciplines { selected, .. }) => {
                let selected: HashSet<String> = selected.into_iter().collect();
                let all: HashSet<String> =
                    DEFAULT_DISCIPLINES.iter().map(|d| d.to_string()).collect();
                assert_eq!(selected, all);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_clears_any_step() {
        let h = harness(MemoryStore::default());
        h.router.handle(command(DRIVER, "/register")).await;
        h.router.handle(text(DRIVER, "Valtteri")).await;

        h.router.handle(callback(DRIVER, "cancel")).await;
        assert!(!h.states.has_state(DRIVER).await);
        assert_eq!(h.messenger.last_text(), "Cancelled.");

        h.router.handle(command(DRIVER, "/cancel")).await;
        assert_eq!(h.messenger.last_text(), "Nothing to cancel.");
    }

    #[tokio::test]
    async fn stray_text_gets_a_hint() {
        let h = harness(MemoryStore::default());
        h.router.handle(text(DRIVER, "hello?")).await;

        assert_eq!(h.messenger.last_text(), UNRECOGNIZED_HINT);
        assert!(!h.states.has_state(DRIVER).await);
    }

    #[tokio::test]
    async fn toggle_without_a_wizard_asks_to_start_again() {
        let h = harness(MemoryStore::default());
        h.router.handle(callback(ADMIN, "discipline:1")).await;

        assert!(h.messenger.last_text().contains("Start again"));
        assert!(!h.states.has_state(ADMIN).await);
    }

    #[tokio::test]
    async fn admin_commands_are_refused_for_drivers() {
        let h = harness(MemoryStore::default());
        h.router.handle(command(DRIVER, "/newseason")).await;

        assert_eq!(h.messenger.last_text(), "Only league admins can do that.");
        assert!(!h.states.has_state(DRIVER).await);
    }

    #[tokio::test]
    async fn unknown_command_points_to_help() {
        let h = harness(MemoryStore::default());
        h.router.handle(command(DRIVER, "/dance")).await;
        assert_eq!(h.messenger.last_text(), "Unknown command, see /help.");
    }

    #[tokio::test]
    async fn failed_final_write_still_clears_the_wizard() {
        let h = harness(MemoryStore::default());
        h.store
            .create_driver(NewDriver {
                external_chat_id: DRIVER,
                name: "Existing".to_string(),
                description: String::new(),
                photo_ref: String::new(),
            })
            .await
            .unwrap();
        h.states
            .set_state(
                DRIVER,
                WizardState::RegisterPhoto {
                    name: "Duplicate".to_string(),
                    description: String::new(),
                },
            )
            .await;

        h.router.handle(text(DRIVER, "-")).await;

        assert!(!h.states.has_state(DRIVER).await);
        assert_eq!(
            h.messenger.last_text(),
            "Something went wrong, please try again later."
        );
        let driver = h.store.driver_by_chat_id(DRIVER).await.unwrap().unwrap();
        assert_eq!(driver.name, "Existing");
    }

    #[tokio::test]
    async fn season_wizard_creates_an_active_season() {
        let h = harness(MemoryStore::default());
        h.router.handle(command(ADMIN, "/newseason")).await;
        h.router.handle(text(ADMIN, "Autumn Cup")).await;
        h.router.handle(text(ADMIN, "not a date")).await;
        assert_eq!(tag_of(&h, ADMIN).await, Some("new_season_start_date"));
        h.router.handle(text(ADMIN, "01.09.2026")).await;

        let season = h.store.active_season().await.unwrap().unwrap();
        assert_eq!(season.name, "Autumn Cup");
        assert!(!h.states.has_state(ADMIN).await);
    }

    #[tokio::test]
    async fn joining_and_starting_a_race() {
        let store = MemoryStore::with_cars(catalog("A", 6));
        let h = harness(store);
        let (race, _) = race_with_drivers(&h.store, 2).await;

        h.router
            .handle(command(DRIVER + 50, &format!("/joinrace {}", race.id)))
            .await;
        assert!(h.messenger.last_text().contains("/register"));

        h.router
            .handle(command(ADMIN, &format!("/startrace {}", race.id)))
            .await;
        assert!(h.messenger.last_text().starts_with("Race started."));
        assert_eq!(
            h.store.race(race.id).await.unwrap().unwrap().state,
            RaceState::InProgress
        );
        assert_eq!(h.store.assignments(race.id).await.unwrap().len(), 2);

        h.router
            .handle(callback(DRIVER, &format!("register_race:{}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "Registration for this race is closed."
        );
    }

    #[tokio::test]
    async fn assigning_an_empty_class_reports_it() {
        let store = MemoryStore::with_cars(catalog("A", 6));
        let h = harness(store);
        let (race, _) = race_with_drivers(&h.store, 2).await;

        h.router
            .handle(command(ADMIN, &format!("/assigncars {} x", race.id)))
            .await;

        assert_eq!(h.messenger.last_text(), "There are no cars in class X.");
        assert!(h.store.assignments(race.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn result_after_reroll_carries_the_penalty() {
        let store = MemoryStore::with_cars(catalog("A", 10));
        let h = harness(store);
        // race_with_drivers registers chat ids 1000 and 1001.
        let (race, drivers) = race_with_drivers(&h.store, 2).await;
        h.router
            .handle(command(ADMIN, &format!("/assigncars {} A", race.id)))
            .await;
        assert!(h.messenger.last_text().starts_with("Cars drawn from class A."));

        h.router
            .handle(command(DRIVER, &format!("/reroll {}", race.id)))
            .await;
        assert!(h.messenger.last_text().starts_with("Your new car:"));
        h.router
            .handle(callback(DRIVER, &format!("reroll_car:{}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "You have already used your reroll for this race."
        );

        h.router
            .handle(command(DRIVER, &format!("/addresult {}", race.id)))
            .await;
        h.router.handle(text(DRIVER, "42")).await;
        h.router.handle(text(DRIVER, "Huracan")).await;
        h.router.handle(text(DRIVER, "-")).await;
        h.router.handle(callback(DRIVER, "place:Drag:1")).await;
        h.router.handle(callback(DRIVER, "place:Circuit:2")).await;

        assert!(!h.states.has_state(DRIVER).await);
        let result = h
            .store
            .result_for(race.id, drivers[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.car_number, 42);
        assert_eq!(result.reroll_penalty, REROLL_PENALTY);
        assert_eq!(result.total_score, 3 + 2 - REROLL_PENALTY);
        assert_eq!(h.messenger.last_text(), "Result saved: 4 points.");

        h.router
            .handle(callback(DRIVER, &format!("add_result:{}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "You already entered a result for this race."
        );
    }

    fn last_sent(h: &Harness) -> Sent {
        h.messenger.sent().last().cloned().expect("no message sent")
    }

    async fn insert_result_for(store: &MemoryStore, race_id: RaceId, driver_id: DriverId) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_result(
            NewRaceResult {
                race_id,
                driver_id,
                car_number: 7,
                car_name: "Test car".to_string(),
                car_photo: String::new(),
                placements: [("Drag".to_string(), 1)].into_iter().collect(),
            },
            0,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn completed_race_refuses_start_and_results() {
        let h = harness(MemoryStore::with_cars(catalog("A", 6)));
        let (race, drivers) = race_with_drivers(&h.store, 2).await;
        h.router
            .handle(command(ADMIN, &format!("/startrace {}", race.id)))
            .await;

        h.router
            .handle(command(DRIVER, &format!("/completerace {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "Only league admins can do that.");

        h.router
            .handle(callback(ADMIN, &format!("race_complete_confirm:{}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "Nobody has entered a result for this race yet."
        );
        assert_eq!(
            h.store.race(race.id).await.unwrap().unwrap().state,
            RaceState::InProgress
        );

        insert_result_for(&h.store, race.id, drivers[0]).await;
        h.router
            .handle(command(ADMIN, &format!("/completerace {}", race.id)))
            .await;
        match last_sent(&h) {
            Sent::Choices(_, text, buttons) => {
                assert!(text.starts_with("Finish Test race?"));
                assert_eq!(buttons[0].action, format!("race_complete_confirm:{}", race.id));
            }
            other => panic!("expected a confirmation, got {other:?}"),
        }

        h.router
            .handle(callback(ADMIN, &format!("race_complete_confirm:{}", race.id)))
            .await;
        assert!(h.messenger.sent().contains(&Sent::Deleted(ADMIN, 500)));
        assert_eq!(
            h.messenger.last_text(),
            "Test race is finished. Results recorded: 1."
        );
        let finished = h.store.race(race.id).await.unwrap().unwrap();
        assert_eq!(finished.state, RaceState::Completed);
        assert!(finished.completed);

        h.router
            .handle(command(ADMIN, &format!("/startrace {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "This race is already finished.");
        h.router
            .handle(command(DRIVER + 1, &format!("/addresult {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "This race is already finished.");
        assert!(!h.states.has_state(DRIVER + 1).await);
        h.router
            .handle(callback(ADMIN, &format!("race_complete_confirm:{}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "This race is already finished.");
    }

    #[tokio::test]
    async fn result_finished_after_completion_is_refused() {
        let h = harness(MemoryStore::with_cars(catalog("A", 6)));
        let (race, drivers) = race_with_drivers(&h.store, 2).await;
        h.router
            .handle(command(ADMIN, &format!("/startrace {}", race.id)))
            .await;
        insert_result_for(&h.store, race.id, drivers[0]).await;

        h.router
            .handle(command(DRIVER + 1, &format!("/addresult {}", race.id)))
            .await;
        h.router.handle(text(DRIVER + 1, "12")).await;
        h.router.handle(text(DRIVER + 1, "Huracan")).await;
        h.router.handle(text(DRIVER + 1, "-")).await;
        h.router
            .handle(callback(ADMIN, &format!("race_complete_confirm:{}", race.id)))
            .await;
        h.router.handle(callback(DRIVER + 1, "place:Drag:1")).await;
        h.router.handle(callback(DRIVER + 1, "place:Circuit:2")).await;

        assert_eq!(h.messenger.last_text(), "This race is already finished.");
        assert!(!h.states.has_state(DRIVER + 1).await);
        assert!(
            h.store
                .result_for(race.id, drivers[1])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unstarted_race_cannot_be_completed() {
        let h = harness(MemoryStore::with_cars(catalog("A", 6)));
        let (race, drivers) = race_with_drivers(&h.store, 1).await;
        insert_result_for(&h.store, race.id, drivers[0]).await;

        h.router
            .handle(callback(ADMIN, &format!("race_complete_confirm:{}", race.id)))
            .await;

        assert_eq!(h.messenger.last_text(), "This race has not started yet.");
        assert!(!h.store.race(race.id).await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn leaving_a_race_before_the_start() {
        let h = harness(MemoryStore::with_cars(catalog("A", 6)));
        let (race, drivers) = race_with_drivers(&h.store, 2).await;
        h.router
            .handle(command(ADMIN, &format!("/assigncars {} A", race.id)))
            .await;
        assert_eq!(h.store.assignments(race.id).await.unwrap().len(), 2);

        h.router
            .handle(command(DRIVER, &format!("/leaverace {}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "You are no longer registered for Test race."
        );
        let registrations = h.store.registrations(race.id).await.unwrap();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].driver_id, drivers[1]);
        let assignments = h.store.assignments(race.id).await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].driver_id, drivers[1]);

        h.router
            .handle(callback(DRIVER, &format!("unregister_race:{}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "You are not registered for this race.");

        h.router
            .handle(command(DRIVER, &format!("/joinrace {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "You are in for Test race.");
        h.router
            .handle(callback(DRIVER, &format!("register_race:{}", race.id)))
            .await;
        assert_eq!(
            h.messenger.last_text(),
            "You are already registered for this race."
        );

        h.router
            .handle(command(ADMIN, &format!("/startrace {}", race.id)))
            .await;
        h.router
            .handle(command(DRIVER + 1, &format!("/leaverace {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "Registration for this race is closed.");
        assert_eq!(h.store.registrations(race.id).await.unwrap().len(), 2);
        assert_eq!(h.store.assignments(race.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn my_car_shows_the_draw_until_it_is_confirmed() {
        let h = harness(MemoryStore::with_cars(catalog("A", 10)));
        let (race, _) = race_with_drivers(&h.store, 1).await;

        h.router
            .handle(command(DRIVER, &format!("/mycar {}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "You have no car for this race yet.");
        h.router
            .handle(callback(DRIVER, &format!("confirm_car:{}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "You have no car for this race yet.");

        h.router
            .handle(command(ADMIN, &format!("/assigncars {} A", race.id)))
            .await;
        let assignment = h.store.assignments(race.id).await.unwrap().remove(0);
        let car = h.store.car(assignment.car_id).await.unwrap().unwrap();

        h.router
            .handle(command(DRIVER, &format!("/mycar {}", race.id)))
            .await;
        match last_sent(&h) {
            Sent::Choices(chat, text, buttons) => {
                assert_eq!(chat, DRIVER);
                assert!(text.contains(&car.name));
                assert!(text.contains(&format!("number {}", assignment.assignment_number)));
                let actions: Vec<String> = buttons.into_iter().map(|b| b.action).collect();
                assert_eq!(
                    actions,
                    vec![
                        format!("confirm_car:{}", race.id),
                        format!("reroll_car:{}", race.id),
                    ]
                );
            }
            other => panic!("expected car details with buttons, got {other:?}"),
        }

        h.router
            .handle(callback(DRIVER, &format!("confirm_car:{}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "Car confirmed. Good luck!");
        assert!(h.store.registrations(race.id).await.unwrap()[0].car_confirmed);
        h.router
            .handle(callback(DRIVER, &format!("confirm_car:{}", race.id)))
            .await;
        assert_eq!(h.messenger.last_text(), "Your car is already confirmed.");

        h.router
            .handle(command(DRIVER, &format!("/mycar {}", race.id)))
            .await;
        match last_sent(&h) {
            Sent::Text(_, text) => assert!(text.ends_with("Confirmed.")),
            other => panic!("expected plain car details, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn my_car_needs_a_registration() {
        let h = harness(MemoryStore::with_cars(catalog("A", 4)));
        let (race, _) = race_with_drivers(&h.store, 1).await;
        h.router
            .handle(command(ADMIN, &format!("/assigncars {} A", race.id)))
            .await;
        h.store
            .create_driver(NewDriver {
                external_chat_id: DRIVER + 7,
                name: "Spectator".to_string(),
                description: String::new(),
                photo_ref: String::new(),
            })
            .await
            .unwrap();

        h.router
            .handle(command(DRIVER + 7, &format!("/mycar {}", race.id)))
            .await;

        assert_eq!(h.messenger.last_text(), "You are not registered for this race.");
    }
}
