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

//! Telegram Bot API transport: webhook update decoding and outbound calls.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::messaging::{Button, ChatId, Messenger};
use crate::router::ChatEvent;

const BUTTONS_PER_ROW: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

impl TelegramUpdate {
    /// `None` for update kinds the bot ignores.
    pub fn into_event(self) -> Option<ChatEvent> {
        if let Some(query) = self.callback_query {
            let data = query.data?;
            let chat = query
                .message
                .as_ref()
                .map(|message| message.chat.id)
                .unwrap_or(query.from.id);
            let message_id = query.message.as_ref().map(|message| message.message_id);
            return Some(ChatEvent::callback(query.from.id, chat, message_id, &data));
        }

        let message = self.message?;
        let chat = message.chat.id;
        let user = message.from.as_ref().map(|from| from.id).unwrap_or(chat);
        if let Some(event) = message
            .text
            .as_deref()
            .and_then(|text| ChatEvent::command(user, chat, text))
        {
            return Some(event);
        }

        // Telegram lists every resolution of a photo, largest last.
        let photo = message
            .photo
            .and_then(|sizes| sizes.into_iter().last())
            .map(|size| size.file_id);
        Some(ChatEvent::Message {
            user,
            chat,
            text: message.text,
            photo,
        })
    }
}

fn inline_keyboard(buttons: &[Button]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(|button| json!({"text": button.label, "callback_data": button.action}))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[derive(Clone)]
pub struct TelegramMessenger {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
}

impl TelegramMessenger {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: config.api_base_url.clone(),
            token: config.token.clone(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base_url.trim_end_matches('/'),
            self.token
        )
    }

    /// Stops the loading spinner on the pressed button.
    pub async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        self.call("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
            .await
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to call telegram {method}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("telegram {method} returned {status}: {body}");
        }

        Ok(())
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> anyhow::Result<()> {
        self.call("sendMessage", json!({ "chat_id": chat, "text": text }))
            .await
    }

    async fn send_choices(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> anyhow::Result<()> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat,
                "text": text,
                "reply_markup": inline_keyboard(buttons),
            }),
        )
        .await
    }

    async fn delete_message(&self, chat: ChatId, message_id: i64) -> anyhow::Result<()> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat, "message_id": message_id }),
        )
        .await
    }
}
