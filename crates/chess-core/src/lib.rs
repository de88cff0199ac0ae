//! Chess rules boundary for the analysis service.
//!
//! Everything here is a pure function over `shakmaty` positions: FEN handling,
//! legal UCI move application and PGN main-line extraction.

pub mod error;
pub mod pgn;
pub mod position;

pub use error::ChessError;
pub use pgn::{mainline_moves, GameRecord};
pub use position::{apply_uci_move, parse_fen, play_uci, to_fen, STARTING_FEN};
