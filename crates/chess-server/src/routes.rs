#![allow(unused)]

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use chess_core::protocol::{GameSnapshot, HealthInfo};

use crate::state::AppState;
use crate::ws;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthInfo> {
    Json(HealthInfo {
        status: "ok".to_string(),
        active_match_count: state.games.len(),
        connected_count: state.connections.len(),
        timestamp: ws::now_millis(),
    })
}

// ── Game listing ────────────────────────────────────────────────────────

/// All live games, for external lobby UIs; callers filter as needed.
pub async fn games(State(state): State<Arc<AppState>>) -> Json<Vec<GameSnapshot>> {
    let games: Vec<GameSnapshot> = state
        .games
        .iter()
        .map(|entry| entry.value().game.snapshot())
        .collect();
    Json(games)
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.connection_count.load(Ordering::Relaxed);
    if current >= state.max_connections {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws.on_upgrade(move |socket| ws::handle_socket(state, socket)))
}
