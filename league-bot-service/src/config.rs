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
use std::net::SocketAddr;

use anyhow::Context;
use league_common::{NewCar, expand_env_vars};
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::UserId;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Shape of the optional YAML config file. Every field can be overridden
/// from the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    bind_addr: Option<String>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    telegram: FileTelegramConfig,
    admin_ids: Vec<UserId>,
    car_catalog_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileTelegramConfig {
    api_base_url: Option<String>,
    token: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub api_base_url: String,
    pub token: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header on webhook calls.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs the bot on the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub telegram: TelegramConfig,
    pub admin_ids: HashSet<UserId>,
    pub car_catalog_path: Option<String>,
}

impl BotConfig {
    /// Reads `LEAGUE_CONFIG_PATH` (if set) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let yaml = match non_empty(std::env::var("LEAGUE_CONFIG_PATH").ok()) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                info!(path = %path, "loaded league config file");
                Some(expand_env_vars(&raw))
            }
            None => None,
        };
        Self::from_sources(yaml.as_deref(), |name| std::env::var(name).ok())
    }

    /// Layers `env` over the already expanded `yaml` document.
    pub fn from_sources(
        yaml: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file = match yaml.filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => serde_yaml::from_str::<FileConfig>(raw).context("invalid config yaml")?,
            None => FileConfig::default(),
        };
        let env = |name: &str| non_empty(env(name));

        let bind = env("LEAGUE_BOT_BIND")
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = parse_bind_addr("LEAGUE_BOT_BIND", &bind)?;

        let database_max_connections = match env("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse()
                .context("invalid DATABASE_MAX_CONNECTIONS")?,
            None => file
                .database_max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };

        let admin_ids = match env("LEAGUE_ADMIN_IDS") {
            Some(value) => parse_admin_ids(&value)?,
            None => file.admin_ids.into_iter().collect(),
        };

        let token = env("TELEGRAM_BOT_TOKEN")
            .or(non_empty(file.telegram.token))
            .context("TELEGRAM_BOT_TOKEN is not set")?;

        Ok(Self {
            bind_addr,
            database_url: env("DATABASE_URL").or(non_empty(file.database_url)),
            database_max_connections,
            telegram: TelegramConfig {
                api_base_url: env("TELEGRAM_API_BASE_URL")
                    .or(non_empty(file.telegram.api_base_url))
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API.to_string()),
                token,
                webhook_secret: env("TELEGRAM_WEBHOOK_SECRET")
                    .or(non_empty(file.telegram.webhook_secret)),
            },
            admin_ids,
            car_catalog_path: env("CAR_CATALOG_PATH").or(non_empty(file.car_catalog_path)),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bind_addr(var_name: &str, value: &str) -> anyhow::Result<SocketAddr> {
    value.parse().context(format!("invalid {var_name}"))
}

/// Comma separated Telegram user ids.
fn parse_admin_ids(value: &str) -> anyhow::Result<HashSet<UserId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<UserId>()
                .with_context(|| format!("invalid admin id {id} in LEAGUE_ADMIN_IDS"))
        })
        .collect()
}

/// Reads the car catalog YAML (a list of cars). Any problem is logged and
/// yields an empty catalog.
pub fn load_car_catalog(path: &str) -> Vec<NewCar> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read car catalog file");
            return Vec::new();
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "car catalog file is empty");
        return Vec::new();
    }

    match serde_yaml::from_str::<Vec<NewCar>>(&raw) {
        Ok(cars) => cars,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse car catalog yaml");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_token_is_set() {
        let config = BotConfig::from_sources(None, env_of(&[("TELEGRAM_BOT_TOKEN", "t")])).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.telegram.api_base_url, DEFAULT_TELEGRAM_API);
        assert_eq!(config.telegram.webhook_secret, None);
        assert!(config.admin_ids.is_empty());
    }

    #[test]
    fn missing_token_is_an_error() {
        let error = BotConfig::from_sources(None, env_of(&[])).unwrap_err();
        assert!(error.to_string().contains("TELEGRAM_BOT_TOKEN"));

        let blank = BotConfig::from_sources(None, env_of(&[("TELEGRAM_BOT_TOKEN", "  ")]));
        assert!(blank.is_err());
    }

    #[test]
    fn environment_overrides_the_file() {
        let yaml = r#"
bind_addr: "127.0.0.1:9000"
database_url: "postgres://file/league"
admin_ids: [1, 2]
telegram:
  token: "from-file"
  webhook_secret: "file-secret"
car_catalog_path: "/etc/league/cars.yaml"
"#;
        let config = BotConfig::from_sources(
            Some(yaml),
            env_of(&[
                ("DATABASE_URL", "postgres://env/league"),
                ("LEAGUE_ADMIN_IDS", "7, 8,"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database_url.as_deref(), Some("postgres://env/league"));
        assert_eq!(config.telegram.token, "from-file");
        assert_eq!(config.telegram.webhook_secret.as_deref(), Some("file-secret"));
        assert_eq!(config.admin_ids, HashSet::from([7, 8]));
        assert_eq!(config.car_catalog_path.as_deref(), Some("/etc/league/cars.yaml"));
    }

    #[test]
    fn bad_values_are_reported_by_name() {
        let error = BotConfig::from_sources(
            None,
            env_of(&[("TELEGRAM_BOT_TOKEN", "t"), ("LEAGUE_BOT_BIND", "nowhere")]),
        )
        .unwrap_err();
        assert!(error.to_string().contains("LEAGUE_BOT_BIND"));

        let error = BotConfig::from_sources(
            None,
            env_of(&[("TELEGRAM_BOT_TOKEN", "t"), ("LEAGUE_ADMIN_IDS", "1,abc")]),
        )
        .unwrap_err();
        assert!(error.to_string().contains("abc"));
    }

    #[test]
    fn car_catalog_yaml_is_parsed() {
        let path = std::env::temp_dir().join(format!("league-cars-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            r#"
- name: Porsche 911 GT3
  year: 2022
  price: 180000
  class_letter: A
  class_number: 720
- name: Mini Cooper
  class_letter: D
"#,
        )
        .unwrap();

        let cars = load_car_catalog(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();

        assert_eq!(cars.len(), 2);
        assert_eq!(cars[0].name, "Porsche 911 GT3");
        assert_eq!(cars[0].year, Some(2022));
        assert_eq!(cars[1].class_letter, "D");
        assert_eq!(cars[1].year, None);
    }

    #[test]
    fn unreadable_car_catalog_is_empty() {
        assert!(load_car_catalog("/nonexistent/league/cars.yaml").is_empty());
    }
}
