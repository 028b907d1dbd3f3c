#![allow(unused)]

pub mod rating;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use chess_core::game::GameStatus;

use crate::rating::RatingNotifier;
use crate::state::AppState;

/// Build a fully configured Router + shared state. `rating_url` is the base
/// URL of the external rating service; `None` disables reporting.
pub fn build_app(rating_url: Option<String>) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(RatingNotifier::new(rating_url)));

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                reclaim(&state);
            }
        });
    }

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/games", get(routes::games))
        .route("/ws", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Background sweep: drop rooms nobody is connected to. A room with any
/// live subscriber always survives, so an identifier a client is attached
/// to keeps resolving to the same game instance.
fn reclaim(state: &AppState) {
    let now = Instant::now();
    let mut to_remove = Vec::new();

    for entry in state.games.iter() {
        let room_id = entry.key();
        if state.subscriber_count(room_id) > 0 {
            continue;
        }
        let room = entry.value();
        let idle = now.duration_since(room.last_activity);
        let expired = match room.game.status() {
            // Nobody took the second seat and the creator left.
            GameStatus::Waiting => now.duration_since(room.created_at) > Duration::from_secs(600),
            // Both players gone mid-game; keep a window for reconnects.
            GameStatus::Playing => idle > Duration::from_secs(1800),
            GameStatus::Finished => idle > Duration::from_secs(120),
        };
        if expired {
            to_remove.push(room_id.clone());
        }
    }

    for room_id in to_remove {
        // Re-check under the removal so a client that subscribed between
        // the scan and now keeps its game.
        let removed = state
            .games
            .remove_if(&room_id, |rid, _| state.subscriber_count(rid) == 0);
        if removed.is_some() {
            tracing::info!(room = %room_id, "reclaimed idle room");
            state.subscribers.remove_if(&room_id, |_, subs| subs.is_empty());
        }
    }
}
