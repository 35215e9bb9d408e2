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

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::wizard::WizardState;

/// Chat user identity as reported by the messenger.
pub type UserId = i64;

/// What [`StateStore::step`] should do with the entry after inspecting it.
#[derive(Debug)]
pub enum Next {
    Keep,
    Replace(WizardState),
    Clear,
}

/// In-flight wizards, one per user. Entries live until cleared or the
/// process exits.
#[derive(Default)]
pub struct StateStore {
    states: RwLock<HashMap<UserId, WizardState>>,
}

impl StateStore {
    pub async fn set_state(&self, user: UserId, state: WizardState) {
        self.states.write().await.insert(user, state);
    }

    pub async fn get_state(&self, user: UserId) -> Option<WizardState> {
        self.states.read().await.get(&user).cloned()
    }

    /// Returns whether there was anything to clear.
    pub async fn clear_state(&self, user: UserId) -> bool {
        self.states.write().await.remove(&user).is_some()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn update_context<R>(
        &self,
        user: UserId,
        update: impl FnOnce(&mut WizardState) -> R,
    ) -> Option<R> {
        let mut states = self.states.write().await;
        states.get_mut(&user).map(update)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn has_state(&self, user: UserId) -> bool {
        self.states.read().await.contains_key(&user)
    }

    /// Reads the user's state and applies the follow-up `step` picks for it,
    /// all under one write lock. `None` when the user has no state.
    pub async fn step<R>(
        &self,
        user: UserId,
        step: impl FnOnce(&WizardState) -> (Next, R),
    ) -> Option<R> {
        let mut states = self.states.write().await;
        let current = states.get(&user)?;
        let (next, outcome) = step(current);
        match next {
            Next::Keep => {}
            Next::Replace(state) => {
                states.insert(user, state);
            }
            Next::Clear => {
                states.remove(&user);
            }
        }
        Some(outcome)
    }
}
