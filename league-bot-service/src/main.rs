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

mod allocator;
mod config;
mod error;
mod messaging;
mod reroll;
mod router;
mod state;
mod store;
mod telegram;
mod wizard;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::allocator::{AssignmentAllocator, shared_rng};
use crate::config::{BotConfig, load_car_catalog};
use crate::reroll::RerollPolicy;
use crate::router::ConversationRouter;
use crate::state::StateStore;
use crate::store::{CarCatalog, LeagueStore, MemoryStore, PgStore};
use crate::telegram::{TelegramMessenger, TelegramUpdate};

const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct AppState {
    router: Arc<ConversationRouter>,
    telegram: Arc<TelegramMessenger>,
    webhook_secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "league_bot_service=debug,tower_http=info".to_string()),
        )
        .init();

    let config = BotConfig::load()?;

    let (store, catalog): (Arc<dyn LeagueStore>, Arc<dyn CarCatalog>) = match &config.database_url
    {
        Some(database_url) => {
            let pg = PgStore::connect(database_url, config.database_max_connections).await?;
            pg.migrate().await?;
            info!("connected to postgres and applied migrations");
            let pg = Arc::new(pg);
            (pg.clone(), pg)
        }
        None => {
            warn!("DATABASE_URL is not set; league data lives in memory only");
            let memory = Arc::new(MemoryStore::default());
            (memory.clone(), memory)
        }
    };

    if let Some(path) = &config.car_catalog_path {
        let cars = load_car_catalog(path);
        if !cars.is_empty() {
            let seeded = store.seed_cars(cars).await?;
            info!(path = %path, seeded, "car catalog seeded");
        }
    }
    let by_class = catalog.count_by_class().await?;
    info!(cars = catalog.count().await?, ?by_class, "car catalog ready");

    let telegram = Arc::new(TelegramMessenger::new(&config.telegram));
    let rng = shared_rng();
    let router = ConversationRouter::new(
        Arc::new(StateStore::default()),
        store.clone(),
        catalog.clone(),
        telegram.clone(),
        AssignmentAllocator::new(store.clone(), catalog.clone(), rng.clone()),
        RerollPolicy::new(store, catalog, rng),
        config.admin_ids.clone(),
    );

    let app = build_router(AppState {
        router: Arc::new(router),
        telegram,
        webhook_secret: config.telegram.webhook_secret.clone(),
    });

    info!(bind_addr = %config.bind_addr, admins = config.admin_ids.len(), "league-bot-service listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "league-bot-service"}))
}

/// Acknowledges the update right away and handles it on its own task.
async fn telegram_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(secret) = &state.webhook_secret {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(secret.as_str()) {
            return Err(ApiError::unauthorized("invalid webhook secret"));
        }
    }

    let update_id = update.update_id;
    let callback_id = update.callback_query.as_ref().map(|query| query.id.clone());
    let Some(event) = update.into_event() else {
        debug!(update_id, "ignoring unsupported telegram update");
        return Ok(Json(serde_json::json!({"ok": true})));
    };

    tokio::spawn(async move {
        if let Some(callback_id) = callback_id {
            if let Err(error) = state.telegram.answer_callback(&callback_id).await {
                warn!(update_id, error = %error, "failed to answer callback query");
            }
        }
        state.router.handle(event).await;
    });

    Ok(Json(serde_json::json!({"ok": true})))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
