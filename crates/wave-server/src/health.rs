use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let (rooms, players) = state.registry.stats().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": rooms,
        "connectedPlayers": players,
        "wsConnections": state.ws_connection_count.load(Ordering::SeqCst),
    }))
}
