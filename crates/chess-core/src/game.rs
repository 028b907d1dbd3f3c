use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{GameSnapshot, RatingReport};

/// Standard starting position (FEN). The server never parses board blobs;
/// this is only the initial value handed to clients.
pub const INITIAL_BOARD: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    White,
    Black,
}

impl Seat {
    pub fn opponent(self) -> Seat {
        match self {
            Seat::White => Seat::Black,
            Seat::Black => Seat::White,
        }
    }
}

/// Game lifecycle. Transitions only ever move forward:
/// Waiting -> Playing -> Finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    #[serde(rename = "checkmate")]
    Checkmate,
    #[serde(rename = "stalemate")]
    Stalemate,
    #[serde(rename = "resignation")]
    Resignation,
    #[serde(rename = "draw by agreement")]
    DrawByAgreement,
}

/// Role an identity holds in a game. Derived from the seats at join time,
/// never stored separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Player(Seat),
    Spectator,
}

/// One accepted move. `data` is the mover-supplied metadata blob (piece,
/// capture, notation, ...) carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    pub from: String,
    pub to: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Result of a terminal transition. `rating_report` is present exactly once
/// per game: on the transition that finished it with both seats occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct Conclusion {
    pub winner: Option<Seat>,
    pub reason: EndReason,
    pub rating_report: Option<RatingReport>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("Game is not active")]
    GameNotActive,
    #[error("Cannot offer draw at this time")]
    DrawUnavailable,
    #[error("Cannot respond to draw offer")]
    NoPendingDraw,
}

/// The state machine for one two-player match. Owned by the session
/// registry and mutated only through these methods; turn and seat
/// preconditions for moves are the connection handler's job (the board
/// blob and move legality are trusted from the client).
#[derive(Debug, Clone)]
pub struct Game {
    room_id: String,
    white: Option<String>,
    black: Option<String>,
    status: GameStatus,
    turn: Seat,
    board_state: String,
    moves: Vec<MoveRecord>,
    spectators: HashSet<String>,
    draw_offered_by: Option<Seat>,
    winner: Option<Seat>,
    end_reason: Option<EndReason>,
    rating_reported: bool,
    room_name: Option<String>,
    time_control: Option<String>,
    is_private: bool,
}

impl Game {
    pub fn new(
        room_id: &str,
        white_identity: &str,
        room_name: Option<String>,
        time_control: Option<String>,
        is_private: bool,
    ) -> Game {
        Game {
            room_id: room_id.to_string(),
            white: Some(white_identity.to_string()),
            black: None,
            status: GameStatus::Waiting,
            turn: Seat::White,
            board_state: INITIAL_BOARD.to_string(),
            moves: Vec::new(),
            spectators: HashSet::new(),
            draw_offered_by: None,
            winner: None,
            end_reason: None,
            rating_reported: false,
            room_name,
            time_control,
            is_private,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn turn(&self) -> Seat {
        self.turn
    }

    pub fn draw_offered_by(&self) -> Option<Seat> {
        self.draw_offered_by
    }

    pub fn seat_of(&self, identity: &str) -> Option<Seat> {
        if self.white.as_deref() == Some(identity) {
            Some(Seat::White)
        } else if self.black.as_deref() == Some(identity) {
            Some(Seat::Black)
        } else {
            None
        }
    }

    /// Attach an identity: fill the white seat, recognize an existing seat
    /// holder, fill the black seat (starting the game), or add a spectator.
    /// Infallible, and idempotent for seat holders and spectators alike.
    pub fn join(&mut self, identity: &str) -> Role {
        if self.white.is_none() {
            self.white = Some(identity.to_string());
            return Role::Player(Seat::White);
        }
        if let Some(seat) = self.seat_of(identity) {
            // Rejoining an occupied seat changes nothing.
            return Role::Player(seat);
        }
        if self.black.is_none() && self.status == GameStatus::Waiting {
            self.black = Some(identity.to_string());
            self.status = GameStatus::Playing;
            return Role::Player(Seat::Black);
        }
        self.spectators.insert(identity.to_string());
        Role::Spectator
    }

    pub fn remove_spectator(&mut self, identity: &str) -> bool {
        self.spectators.remove(identity)
    }

    /// Record an accepted move: append to the log, replace the board blob,
    /// flip the turn, clear any standing draw offer. Performs no
    /// validation; turn and status checks belong to the caller.
    pub fn make_move(
        &mut self,
        from: &str,
        to: &str,
        new_board_state: &str,
        move_data: serde_json::Value,
        timestamp: i64,
    ) {
        let mut data = match move_data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        // from/to/timestamp are authoritative here, not in the blob.
        data.remove("from");
        data.remove("to");
        data.remove("timestamp");

        self.moves.push(MoveRecord {
            from: from.to_string(),
            to: to.to_string(),
            timestamp,
            data,
        });
        self.board_state = new_board_state.to_string();
        self.turn = self.turn.opponent();
        self.draw_offered_by = None;
    }

    /// At most one offer stands at a time, and a seat cannot stack a second
    /// offer on its own unanswered one.
    pub fn offer_draw(&mut self, seat: Seat) -> Result<(), GameError> {
        if self.status != GameStatus::Playing {
            return Err(GameError::DrawUnavailable);
        }
        if self.draw_offered_by == Some(seat) {
            return Err(GameError::DrawUnavailable);
        }
        self.draw_offered_by = Some(seat);
        Ok(())
    }

    /// Valid only against an offer standing from the other seat. Accepting
    /// terminates the game as a draw; declining clears the offer.
    pub fn respond_to_draw(
        &mut self,
        seat: Seat,
        accept: bool,
    ) -> Result<Option<Conclusion>, GameError> {
        if self.draw_offered_by != Some(seat.opponent()) {
            return Err(GameError::NoPendingDraw);
        }
        if accept {
            // A standing offer implies the game is still active.
            let conclusion = self
                .declare_outcome(None, EndReason::DrawByAgreement)
                .ok_or(GameError::NoPendingDraw)?;
            Ok(Some(conclusion))
        } else {
            self.draw_offered_by = None;
            Ok(None)
        }
    }

    pub fn resign(&mut self, seat: Seat) -> Result<Conclusion, GameError> {
        if self.status != GameStatus::Playing {
            return Err(GameError::GameNotActive);
        }
        self.declare_outcome(Some(seat.opponent()), EndReason::Resignation)
            .ok_or(GameError::GameNotActive)
    }

    /// Terminal transition. Returns `None` when the game is already
    /// finished, so duplicate termination signals (a client-detected mate
    /// racing a resignation) are harmless no-ops. The rating guard flips
    /// before the report is surfaced: a racing duplicate can never obtain a
    /// second report, even if delivering the first one is slow or fails.
    pub fn declare_outcome(
        &mut self,
        winner: Option<Seat>,
        reason: EndReason,
    ) -> Option<Conclusion> {
        if self.status == GameStatus::Finished {
            return None;
        }
        self.status = GameStatus::Finished;
        self.winner = winner;
        self.end_reason = Some(reason);
        self.draw_offered_by = None;

        let rating_report = match (&self.white, &self.black) {
            (Some(white), Some(black)) if !self.rating_reported => {
                self.rating_reported = true;
                Some(RatingReport {
                    white_identity: white.clone(),
                    black_identity: black.clone(),
                    winner,
                    reason,
                })
            }
            _ => None,
        };

        Some(Conclusion {
            winner,
            reason,
            rating_report,
        })
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            room_id: self.room_id.clone(),
            white_player: self.white.clone(),
            black_player: self.black.clone(),
            current_turn: self.turn,
            board_state: self.board_state.clone(),
            status: self.status,
            moves: self.moves.clone(),
            spectator_count: self.spectators.len(),
            winner: self.winner,
            end_reason: self.end_reason,
            draw_offered_by: self.draw_offered_by,
            room_name: self.room_name.clone(),
            time_control: self.time_control.clone(),
            is_private: self.is_private,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn playing_game() -> Game {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        game.join("bob@example.com");
        game
    }

    #[test]
    fn creator_takes_white_and_waits() {
        let game = Game::new("r1", "alice@example.com", None, None, false);
        assert_eq!(game.status(), GameStatus::Waiting);
        assert_eq!(game.seat_of("alice@example.com"), Some(Seat::White));
        assert_eq!(game.seat_of("bob@example.com"), None);
    }

    #[test]
    fn second_identity_takes_black_and_starts() {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        let role = game.join("bob@example.com");
        assert_eq!(role, Role::Player(Seat::Black));
        assert_eq!(game.status(), GameStatus::Playing);
        assert_eq!(game.turn(), Seat::White);
    }

    #[test]
    fn creator_rejoin_keeps_seat_and_never_spectates() {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        let role = game.join("alice@example.com");
        assert_eq!(role, Role::Player(Seat::White));
        assert_eq!(game.status(), GameStatus::Waiting);
        assert_eq!(game.snapshot().spectator_count, 0);
    }

    #[test]
    fn third_identity_spectates_idempotently() {
        let mut game = playing_game();
        assert_eq!(game.join("carol@example.com"), Role::Spectator);
        assert_eq!(game.join("carol@example.com"), Role::Spectator);
        assert_eq!(game.snapshot().spectator_count, 1);
    }

    #[test]
    fn seated_player_rejoin_after_start_is_not_a_spectator() {
        let mut game = playing_game();
        assert_eq!(game.join("bob@example.com"), Role::Player(Seat::Black));
        assert_eq!(game.snapshot().spectator_count, 0);
    }

    #[test]
    fn move_flips_turn_and_records() {
        let mut game = playing_game();
        game.make_move("e2", "e4", "fen-after-e4", json!({"piece": "pawn"}), 1);
        assert_eq!(game.turn(), Seat::Black);
        let snap = game.snapshot();
        assert_eq!(snap.moves.len(), 1);
        assert_eq!(snap.moves[0].from, "e2");
        assert_eq!(snap.moves[0].data["piece"], "pawn");
        assert_eq!(snap.board_state, "fen-after-e4");
    }

    #[test]
    fn move_strips_reserved_metadata_keys() {
        let mut game = playing_game();
        game.make_move(
            "e2",
            "e4",
            "fen",
            json!({"from": "bogus", "timestamp": 0, "capture": true}),
            42,
        );
        let record = &game.snapshot().moves[0];
        assert_eq!(record.from, "e2");
        assert_eq!(record.timestamp, 42);
        assert!(!record.data.contains_key("from"));
        assert_eq!(record.data["capture"], true);
    }

    #[test]
    fn move_clears_standing_draw_offer() {
        let mut game = playing_game();
        game.offer_draw(Seat::White).unwrap();
        game.make_move("e2", "e4", "fen", json!({}), 1);
        assert_eq!(game.draw_offered_by(), None);
    }

    #[test]
    fn draw_offer_requires_active_game() {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        assert_eq!(
            game.offer_draw(Seat::White),
            Err(GameError::DrawUnavailable)
        );
    }

    #[test]
    fn duplicate_draw_offer_rejected() {
        let mut game = playing_game();
        game.offer_draw(Seat::White).unwrap();
        assert_eq!(
            game.offer_draw(Seat::White),
            Err(GameError::DrawUnavailable)
        );
        // The other seat may still counter-offer; one offer stands at a time.
        game.offer_draw(Seat::Black).unwrap();
        assert_eq!(game.draw_offered_by(), Some(Seat::Black));
    }

    #[test]
    fn respond_requires_opponent_offer() {
        let mut game = playing_game();
        assert_eq!(
            game.respond_to_draw(Seat::Black, true),
            Err(GameError::NoPendingDraw)
        );
        game.offer_draw(Seat::White).unwrap();
        // The offerer cannot answer its own offer.
        assert_eq!(
            game.respond_to_draw(Seat::White, true),
            Err(GameError::NoPendingDraw)
        );
    }

    #[test]
    fn accepted_draw_finishes_without_winner() {
        let mut game = playing_game();
        game.offer_draw(Seat::White).unwrap();
        let conclusion = game.respond_to_draw(Seat::Black, true).unwrap().unwrap();
        assert_eq!(conclusion.winner, None);
        assert_eq!(conclusion.reason, EndReason::DrawByAgreement);
        assert_eq!(game.status(), GameStatus::Finished);
        assert_eq!(game.draw_offered_by(), None);
    }

    #[test]
    fn declined_draw_clears_offer_only() {
        let mut game = playing_game();
        game.offer_draw(Seat::White).unwrap();
        let result = game.respond_to_draw(Seat::Black, false).unwrap();
        assert!(result.is_none());
        assert_eq!(game.draw_offered_by(), None);
        assert_eq!(game.status(), GameStatus::Playing);
    }

    #[test]
    fn resignation_awards_opponent() {
        let mut game = playing_game();
        let conclusion = game.resign(Seat::Black).unwrap();
        assert_eq!(conclusion.winner, Some(Seat::White));
        assert_eq!(conclusion.reason, EndReason::Resignation);
        assert_eq!(game.status(), GameStatus::Finished);
    }

    #[test]
    fn resign_after_finish_rejected_without_state_change() {
        let mut game = playing_game();
        game.resign(Seat::Black).unwrap();
        assert_eq!(game.resign(Seat::White), Err(GameError::GameNotActive));
        let snap = game.snapshot();
        assert_eq!(snap.winner, Some(Seat::White));
        assert_eq!(snap.end_reason, Some(EndReason::Resignation));
    }

    #[test]
    fn duplicate_termination_is_a_noop() {
        let mut game = playing_game();
        assert!(
            game.declare_outcome(Some(Seat::White), EndReason::Checkmate)
                .is_some()
        );
        assert!(
            game.declare_outcome(Some(Seat::Black), EndReason::Resignation)
                .is_none()
        );
        let snap = game.snapshot();
        assert_eq!(snap.winner, Some(Seat::White));
        assert_eq!(snap.end_reason, Some(EndReason::Checkmate));
    }

    #[test]
    fn rating_report_surfaces_exactly_once() {
        let mut game = playing_game();
        let first = game
            .declare_outcome(Some(Seat::White), EndReason::Checkmate)
            .unwrap();
        assert!(first.rating_report.is_some());
        assert!(
            game.declare_outcome(None, EndReason::Stalemate)
                .is_none()
        );
    }

    #[test]
    fn no_rating_report_with_an_empty_seat() {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        let conclusion = game
            .declare_outcome(Some(Seat::White), EndReason::Checkmate)
            .unwrap();
        assert!(conclusion.rating_report.is_none());
    }

    #[test]
    fn finished_game_never_reopens_the_black_seat() {
        let mut game = Game::new("r1", "alice@example.com", None, None, false);
        game.declare_outcome(None, EndReason::Stalemate);
        // Black was never seated; a new identity must not restart the game.
        assert_eq!(game.join("bob@example.com"), Role::Spectator);
        assert_eq!(game.status(), GameStatus::Finished);
    }

    #[test]
    fn replayed_move_log_reproduces_turn_sequence() {
        let mut game = playing_game();
        let mut live_turns = Vec::new();
        for (i, (from, to)) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3"), ("b8", "c6")]
            .iter()
            .enumerate()
        {
            game.make_move(from, to, "fen", json!({}), i as i64);
            live_turns.push(game.turn());
        }

        let log = game.snapshot().moves;
        let mut replay = playing_game();
        let mut replayed_turns = Vec::new();
        for record in &log {
            replay.make_move(
                &record.from,
                &record.to,
                "fen",
                serde_json::Value::Object(record.data.clone()),
                record.timestamp,
            );
            replayed_turns.push(replay.turn());
        }
        assert_eq!(live_turns, replayed_turns);
    }
}
