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

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::allocator::AllocationError;
use crate::reroll::RerollError;
use crate::store::StoreError;

/// Everything a chat event handler can fail with.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("wizard state error: {0}")]
    State(String),
    #[error("admin command used by a non-admin")]
    Forbidden,
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("reroll refused: {0}")]
    Policy(#[from] RerollError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl BotError {
    /// Text shown to the user who triggered the failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotFound(what) => format!("Not found: {what}."),
            Self::State(_) => "That step has expired. Start again from the command.".to_string(),
            Self::Forbidden => "Only league admins can do that.".to_string(),
            Self::Allocation(AllocationError::EmptyClass(class)) => {
                format!("There are no cars in class {class}.")
            }
            Self::Allocation(AllocationError::InsufficientNumberSpace {
                number_space,
                drivers,
            }) => format!(
                "Not enough cars for {drivers} drivers: only {number_space} lottery numbers."
            ),
            Self::Allocation(AllocationError::RaceNotFound(_))
            | Self::Policy(RerollError::RaceNotFound(_)) => "Race not found.".to_string(),
            Self::Allocation(AllocationError::RaceCompleted(_)) => {
                "This race is already finished.".to_string()
            }
            Self::Allocation(AllocationError::NoRegistrations(_)) => {
                "Nobody has joined this race yet.".to_string()
            }
            Self::Policy(RerollError::NotRegistered { .. }) => {
                "You are not registered for this race.".to_string()
            }
            Self::Policy(RerollError::AlreadyUsed) => {
                "You have already used your reroll for this race.".to_string()
            }
            Self::Policy(RerollError::NoCurrentAssignment) => {
                "You have no car for this race yet.".to_string()
            }
            Self::Policy(RerollError::EmptyClass(class)) => {
                format!("There are no cars in class {class}.")
            }
            Self::Allocation(AllocationError::Store(_))
            | Self::Policy(RerollError::Store(_))
            | Self::Persistence(_) => "Something went wrong, please try again later.".to_string(),
        }
    }

    /// Writes the operator-facing log line at a level matching the failure.
    pub fn log(&self, user: i64) {
        match self {
            Self::Allocation(AllocationError::Store(_))
            | Self::Policy(RerollError::Store(_))
            | Self::Persistence(_) => error!(user, error = %self, "persistence failed"),
            Self::Validation(_) => debug!(user, error = %self, "input rejected"),
            Self::Allocation(_) => warn!(user, error = %self, "car allocation refused"),
            Self::NotFound(_) | Self::State(_) | Self::Forbidden | Self::Policy(_) => {
                info!(user, error = %self, "request refused")
            }
        }
    }
}
