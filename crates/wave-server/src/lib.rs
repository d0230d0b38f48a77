pub mod api;
pub mod attest;
pub mod channels;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod questions;
pub mod registry;
pub mod round;
pub mod state;
pub mod ws;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use crate::attest::{LogRewardSink, RewardSink};
use crate::config::ServerConfig;
use crate::questions::QuestionBank;
use crate::state::AppState;

/// Assemble the router and shared state. Split from `main` so integration
/// tests can run the full app on an ephemeral port.
pub fn build_app(config: ServerConfig) -> (Router, AppState) {
    let questions = QuestionBank::load_or_default(Path::new(&config.questions_path));
    let rewards: Arc<dyn RewardSink> = Arc::new(LogRewardSink);
    build_app_with(config, questions, rewards)
}

pub fn build_app_with(
    config: ServerConfig,
    questions: QuestionBank,
    rewards: Arc<dyn RewardSink>,
) -> (Router, AppState) {
    let state = AppState::new(config, questions, rewards);
    let router = Router::new()
        .route("/health", get(health::health))
        .route("/rooms", post(api::create_room).get(api::list_rooms))
        .route("/rooms/{room_id}", get(api::get_room))
        .route("/rooms/by-code/{code}", get(api::get_room_by_code))
        .route("/rooms/{room_id}/settings", put(api::update_settings))
        .route(
            "/rooms/{room_id}/player/{wallet_id}/status",
            post(api::set_player_status),
        )
        .route("/join-room", post(api::join_room))
        .route("/leave-room", delete(api::leave_room))
        .route("/ws/{room_id}/{wallet_id}", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());
    (router, state)
}

/// Periodically drop finished rooms whose TTL has elapsed.
pub fn spawn_room_reaper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(state.config.rooms.reap_interval_secs);
        let ttl_ms = state.config.rooms.finished_room_ttl_secs * 1000;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = state.registry.reap_finished(ttl_ms).await;
            if reaped > 0 {
                tracing::info!(reaped, "Reaped finished rooms");
            }
        }
    })
}
