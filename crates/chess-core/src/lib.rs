pub mod game;
pub mod protocol;

pub use game::{Conclusion, EndReason, Game, GameError, GameStatus, Role, Seat};
pub use protocol::{ClientEvent, GameSnapshot, ServerEvent};
