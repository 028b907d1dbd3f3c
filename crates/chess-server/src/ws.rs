#![allow(unused)]

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tracing::info;

use chess_core::game::{EndReason, Game, GameStatus, Seat};
use chess_core::protocol::{ClientEvent, ServerEvent};

use crate::state::{AppState, RoomEntry};

/// Per-connection context. Identity and room are assigned by join-room /
/// reconnect-to-room, mirroring the fields the browser client's socket
/// carries.
struct ConnCtx {
    conn_id: u64,
    identity: Option<String>,
    display_name: Option<String>,
    room_id: Option<String>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnCtx {
    fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    fn error(&self, message: impl Into<String>) {
        self.send(ServerEvent::Error {
            message: message.into(),
        });
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Top-level WebSocket handler -- spawned per connection.
pub async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket) {
    state.connection_count.fetch_add(1, Ordering::Relaxed);
    let conn_id = state.next_conn_id.fetch_add(1, Ordering::Relaxed);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut ctx = ConnCtx {
        conn_id,
        identity: None,
        display_name: None,
        room_id: None,
        tx,
    };

    info!(conn_id, "client connected");

    // Rate limiting: max 20 messages per second.
    let mut window_start = Instant::now();
    let mut window_count = 0u32;

    loop {
        tokio::select! {
            // Outbound: forward queued events to the WebSocket.
            Some(event) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&event) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            // Inbound: read from the WebSocket.
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let now = Instant::now();
                        if now.duration_since(window_start) > Duration::from_secs(1) {
                            window_start = now;
                            window_count = 0;
                        }
                        window_count += 1;
                        if window_count > 20 {
                            ctx.error("Rate limited");
                            continue;
                        }

                        let event: ClientEvent = match serde_json::from_str(&text) {
                            Ok(e) => e,
                            Err(e) => {
                                ctx.error(format!("Invalid message: {}", e));
                                continue;
                            }
                        };

                        handle_event(&state, &mut ctx, event);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => continue,
                }
            }
        }
    }

    handle_disconnect(&state, &ctx);
    state.connection_count.fetch_sub(1, Ordering::Relaxed);
}

/// Dispatch a single client event. Synchronous by construction: every game
/// mutation happens under the room's map guard, and the guard is dropped
/// before anything is broadcast or spawned.
fn handle_event(state: &Arc<AppState>, ctx: &mut ConnCtx, event: ClientEvent) {
    match event {
        ClientEvent::JoinRoom {
            room_id,
            identity,
            display_name,
            room_name,
            time_control,
            is_private,
            ..
        } => {
            // Lazy create: the entry API makes concurrent first joins of an
            // unseen room construct exactly one game.
            let (role, snapshot) = {
                let mut entry = state.games.entry(room_id.clone()).or_insert_with(|| {
                    info!(room = %room_id, white = %identity, "creating game");
                    RoomEntry::new(Game::new(
                        &room_id,
                        &identity,
                        room_name,
                        time_control,
                        is_private.unwrap_or(false),
                    ))
                });
                let role = entry.game.join(&identity);
                entry.touch();
                (role, entry.game.snapshot())
            };

            ctx.identity = Some(identity.clone());
            ctx.display_name = Some(display_name.clone());
            ctx.room_id = Some(room_id.clone());
            state.connections.insert(identity.clone(), ctx.conn_id);
            state.subscribe(&room_id, ctx.conn_id, ctx.tx.clone());

            info!(room = %room_id, identity = %identity, ?role, "joined room");

            // Snapshot to the joiner first, then the room-wide updates.
            ctx.send(ServerEvent::GameState {
                game_state: snapshot.clone(),
            });
            state.publish_except(
                &room_id,
                ctx.conn_id,
                &ServerEvent::PlayerJoined {
                    identity,
                    display_name,
                    game_state: snapshot.clone(),
                },
            );
            state.publish(
                &room_id,
                &ServerEvent::GameUpdated {
                    game_state: snapshot,
                },
            );
        }

        ClientEvent::MakeMove {
            room_id,
            from,
            to,
            new_board_state,
            move_data,
        } => {
            let Some(identity) = ctx.identity.clone() else {
                ctx.error("Not in a room");
                return;
            };

            // Compatibility shim: older clients report a rules-engine
            // detected conclusion as a pseudo-move with from == "game-end".
            if from == "game-end" {
                let winner = match to.as_str() {
                    "checkmate" => match move_data.get("winner").and_then(|w| w.as_str()) {
                        Some("white") => Some(Seat::White),
                        Some("black") => Some(Seat::Black),
                        _ => {
                            ctx.error("Missing winner for checkmate");
                            return;
                        }
                    },
                    "stalemate" => None,
                    _ => {
                        ctx.error("Unknown end reason");
                        return;
                    }
                };
                let reason = if to == "checkmate" {
                    EndReason::Checkmate
                } else {
                    EndReason::Stalemate
                };
                declare_end(state, ctx, &room_id, winner, reason);
                return;
            }

            let snapshot = {
                let Some(mut entry) = state.games.get_mut(&room_id) else {
                    ctx.error("Game not found");
                    return;
                };

                // Seat-as-access-control only; legality lives client-side.
                if entry.game.seat_of(&identity) != Some(entry.game.turn()) {
                    ctx.error("Not your turn");
                    return;
                }
                if entry.game.status() != GameStatus::Playing {
                    ctx.error("Game is not active");
                    return;
                }

                entry
                    .game
                    .make_move(&from, &to, &new_board_state, move_data.clone(), now_millis());
                entry.touch();
                entry.game.snapshot()
            };

            info!(room = %room_id, identity = %identity, %from, %to, "move made");

            state.publish(
                &room_id,
                &ServerEvent::MoveMade {
                    from,
                    to,
                    move_data,
                    game_state: snapshot,
                },
            );
        }

        ClientEvent::OfferDraw { room_id } => {
            let Some(identity) = ctx.identity.clone() else {
                ctx.error("Not in a room");
                return;
            };
            let result = {
                let Some(mut entry) = state.games.get_mut(&room_id) else {
                    ctx.error("Game not found");
                    return;
                };
                let Some(seat) = entry.game.seat_of(&identity) else {
                    ctx.error("Not a player in this game");
                    return;
                };
                match entry.game.offer_draw(seat) {
                    Ok(()) => {
                        entry.touch();
                        Ok((seat, entry.game.snapshot()))
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok((seat, snapshot)) => {
                    info!(room = %room_id, offered_by = ?seat, "draw offered");
                    state.publish(
                        &room_id,
                        &ServerEvent::DrawOffered {
                            offered_by: seat,
                            game_state: snapshot,
                        },
                    );
                }
                Err(e) => ctx.error(e.to_string()),
            }
        }

        ClientEvent::RespondToDraw { room_id, accept } => {
            let Some(identity) = ctx.identity.clone() else {
                ctx.error("Not in a room");
                return;
            };
            let result = {
                let Some(mut entry) = state.games.get_mut(&room_id) else {
                    ctx.error("Game not found");
                    return;
                };
                let Some(seat) = entry.game.seat_of(&identity) else {
                    ctx.error("Not a player in this game");
                    return;
                };
                match entry.game.respond_to_draw(seat, accept) {
                    Ok(conclusion) => {
                        entry.touch();
                        Ok((seat, conclusion, entry.game.snapshot()))
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok((_, Some(conclusion), snapshot)) => {
                    info!(room = %room_id, "draw accepted, game ended");
                    state.publish(
                        &room_id,
                        &ServerEvent::GameEnded {
                            winner: conclusion.winner,
                            reason: conclusion.reason,
                            game_state: snapshot,
                        },
                    );
                    if let Some(report) = conclusion.rating_report {
                        state.notifier.dispatch(report);
                    }
                }
                Ok((seat, None, snapshot)) => {
                    info!(room = %room_id, declined_by = ?seat, "draw declined");
                    state.publish(
                        &room_id,
                        &ServerEvent::DrawDeclined {
                            declined_by: seat,
                            game_state: snapshot,
                        },
                    );
                }
                Err(e) => ctx.error(e.to_string()),
            }
        }

        ClientEvent::ResignGame { room_id } => {
            let Some(identity) = ctx.identity.clone() else {
                ctx.error("Not in a room");
                return;
            };
            let result = {
                let Some(mut entry) = state.games.get_mut(&room_id) else {
                    ctx.error("Game not found");
                    return;
                };
                let Some(seat) = entry.game.seat_of(&identity) else {
                    ctx.error("Not a player in this game");
                    return;
                };
                match entry.game.resign(seat) {
                    Ok(conclusion) => {
                        entry.touch();
                        Ok((conclusion, entry.game.snapshot()))
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok((conclusion, snapshot)) => {
                    info!(room = %room_id, identity = %identity, "resigned");
                    state.publish(
                        &room_id,
                        &ServerEvent::GameEnded {
                            winner: conclusion.winner,
                            reason: conclusion.reason,
                            game_state: snapshot,
                        },
                    );
                    if let Some(report) = conclusion.rating_report {
                        state.notifier.dispatch(report);
                    }
                }
                Err(e) => ctx.error(e.to_string()),
            }
        }

        ClientEvent::SendMessage { room_id, message } => {
            let Some(identity) = ctx.identity.clone() else {
                ctx.error("Not in a room");
                return;
            };

            // Chat never touches the game; it only rides the broadcast
            // group.
            let ts = now_millis();
            state.publish(
                &room_id,
                &ServerEvent::NewMessage {
                    id: ts,
                    identity,
                    display_name: ctx.display_name.clone().unwrap_or_default(),
                    message,
                    timestamp: ts,
                },
            );
        }

        ClientEvent::ReconnectToRoom { room_id, identity } => {
            let snapshot = {
                let Some(mut entry) = state.games.get_mut(&room_id) else {
                    ctx.error("Game not found");
                    return;
                };
                entry.touch();
                entry.game.snapshot()
            };

            ctx.identity = Some(identity.clone());
            ctx.room_id = Some(room_id.clone());
            state.connections.insert(identity.clone(), ctx.conn_id);
            state.subscribe(&room_id, ctx.conn_id, ctx.tx.clone());

            info!(room = %room_id, identity = %identity, "reconnected");

            ctx.send(ServerEvent::GameState {
                game_state: snapshot.clone(),
            });
            state.publish_except(
                &room_id,
                ctx.conn_id,
                &ServerEvent::PlayerReconnected {
                    identity,
                    game_state: snapshot,
                },
            );
        }
    }
}

// -- Helpers ------------------------------------------------------------------

/// Route a terminal transition: mutate under the room guard, then broadcast
/// and hand any rating report to the notifier outside it.
fn declare_end(
    state: &Arc<AppState>,
    ctx: &ConnCtx,
    room_id: &str,
    winner: Option<Seat>,
    reason: EndReason,
) {
    let concluded = {
        let Some(mut entry) = state.games.get_mut(room_id) else {
            ctx.error("Game not found");
            return;
        };
        let conclusion = entry.game.declare_outcome(winner, reason);
        entry.touch();
        conclusion.map(|c| (c, entry.game.snapshot()))
    };

    // Already finished: the duplicate half of a race between a
    // client-detected end and a concurrent resign. Drop it.
    let Some((conclusion, snapshot)) = concluded else {
        return;
    };

    info!(
        room = %room_id,
        winner = ?conclusion.winner,
        reason = ?conclusion.reason,
        "game ended"
    );

    state.publish(
        room_id,
        &ServerEvent::GameEnded {
            winner: conclusion.winner,
            reason: conclusion.reason,
            game_state: snapshot,
        },
    );

    if let Some(report) = conclusion.rating_report {
        state.notifier.dispatch(report);
    }
}

/// Disconnect never vacates a seat; only the spectator set and the
/// connection maps are cleaned up.
fn handle_disconnect(state: &Arc<AppState>, ctx: &ConnCtx) {
    info!(conn_id = ctx.conn_id, identity = ?ctx.identity, "client disconnected");

    let Some(identity) = &ctx.identity else {
        return;
    };

    // A reconnect may already have taken over this identity; only drop the
    // mapping if it is still ours.
    state
        .connections
        .remove_if(identity, |_, conn_id| *conn_id == ctx.conn_id);

    let Some(room_id) = &ctx.room_id else {
        return;
    };
    state.unsubscribe(room_id, ctx.conn_id);

    let snapshot = {
        let Some(mut entry) = state.games.get_mut(room_id) else {
            return;
        };
        entry.game.remove_spectator(identity);
        entry.game.snapshot()
    };

    state.publish(
        room_id,
        &ServerEvent::PlayerDisconnected {
            identity: identity.clone(),
            game_state: snapshot,
        },
    );
}
