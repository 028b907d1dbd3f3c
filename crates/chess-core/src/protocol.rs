use serde::{Deserialize, Serialize};

use crate::game::{EndReason, GameStatus, MoveRecord, Seat};

/// Messages sent from client to server. Tags and field names match the
/// socket.io wire format the web clients already speak.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        identity: String,
        display_name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        room_name: Option<String>,
        #[serde(default)]
        time_control: Option<String>,
        #[serde(default)]
        is_private: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    MakeMove {
        room_id: String,
        from: String,
        to: String,
        new_board_state: String,
        #[serde(default)]
        move_data: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    OfferDraw { room_id: String },
    #[serde(rename_all = "camelCase")]
    RespondToDraw { room_id: String, accept: bool },
    #[serde(rename_all = "camelCase")]
    ResignGame { room_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage { room_id: String, message: String },
    #[serde(rename_all = "camelCase")]
    ReconnectToRoom { room_id: String, identity: String },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full snapshot, sent only to a joiner or reconnector.
    GameState {
        #[serde(flatten)]
        game_state: GameSnapshot,
    },
    GameUpdated {
        #[serde(flatten)]
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        identity: String,
        display_name: String,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    MoveMade {
        from: String,
        to: String,
        move_data: serde_json::Value,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    DrawOffered {
        offered_by: Seat,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    DrawDeclined {
        declined_by: Seat,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    GameEnded {
        winner: Option<Seat>,
        reason: EndReason,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        identity: String,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    PlayerReconnected {
        identity: String,
        game_state: GameSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        id: i64,
        identity: String,
        display_name: String,
        message: String,
        timestamp: i64,
    },
    Error { message: String },
}

/// Full externally visible state of one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub room_id: String,
    pub white_player: Option<String>,
    pub black_player: Option<String>,
    pub current_turn: Seat,
    pub board_state: String,
    pub status: GameStatus,
    pub moves: Vec<MoveRecord>,
    pub spectator_count: usize,
    pub winner: Option<Seat>,
    pub end_reason: Option<EndReason>,
    pub draw_offered_by: Option<Seat>,
    pub room_name: Option<String>,
    pub time_control: Option<String>,
    pub is_private: bool,
}

/// Body POSTed to the rating service when a match with both seats filled
/// reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingReport {
    pub white_identity: String,
    pub black_identity: String,
    pub winner: Option<Seat>,
    pub reason: EndReason,
}

/// Body of the rating service's 200 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingAck {
    pub ok: bool,
    #[serde(default)]
    pub rating_deltas: serde_json::Value,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub status: String,
    pub active_match_count: usize,
    pub connected_count: usize,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_parses_with_optional_fields_absent() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"join-room","roomId":"r1","identity":"a@x.com","displayName":"Alice"}"#,
        )
        .unwrap();
        match event {
            ClientEvent::JoinRoom {
                room_id,
                identity,
                room_name,
                ..
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(identity, "a@x.com");
                assert_eq!(room_name, None);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn respond_to_draw_uses_kebab_tag() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"respond-to-draw","roomId":"r1","accept":true}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            ClientEvent::RespondToDraw { accept: true, .. }
        ));
    }

    #[test]
    fn game_state_event_flattens_snapshot() {
        let game = crate::game::Game::new("r1", "a@x.com", None, None, false);
        let value = serde_json::to_value(ServerEvent::GameState {
            game_state: game.snapshot(),
        })
        .unwrap();
        assert_eq!(value["type"], "game-state");
        assert_eq!(value["roomId"], "r1");
        assert_eq!(value["whitePlayer"], "a@x.com");
        assert_eq!(value["status"], "waiting");
        assert_eq!(value["currentTurn"], "white");
    }

    #[test]
    fn end_reason_wire_strings() {
        assert_eq!(
            serde_json::to_value(EndReason::DrawByAgreement).unwrap(),
            json!("draw by agreement")
        );
        assert_eq!(
            serde_json::to_value(EndReason::Checkmate).unwrap(),
            json!("checkmate")
        );
    }

    #[test]
    fn move_metadata_flattens_into_record() {
        let mut game = crate::game::Game::new("r1", "a@x.com", None, None, false);
        game.join("b@x.com");
        game.make_move("e2", "e4", "fen", json!({"piece": "pawn"}), 7);
        let value = serde_json::to_value(&game.snapshot().moves[0]).unwrap();
        assert_eq!(value["from"], "e2");
        assert_eq!(value["piece"], "pawn");
        assert_eq!(value["timestamp"], 7);
    }
}
