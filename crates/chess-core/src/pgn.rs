//! PGN main-line extraction.
//!
//! Only the main line is kept: variations are skipped by the reader, so a
//! record with `(...)` side lines yields the same moves as one without.

use std::ops::ControlFlow;

use pgn_reader::{RawTag, Reader, SanPlus, Skip, Visitor};
use shakmaty::{CastlingMode, Chess, Position};

use crate::error::ChessError;
use crate::position::{parse_fen, to_fen, STARTING_FEN};

/// Main line of a game record, as UCI move tokens from `start_fen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub start_fen: String,
    pub moves: Vec<String>,
}

/// Visitor that collects main-line moves of the first game.
#[derive(Default)]
struct MainlineCollector {
    start_fen: Option<String>,
    moves: Vec<String>,
    error: Option<ChessError>,
}

impl Visitor for MainlineCollector {
    type Tags = Option<String>;
    type Movetext = Chess;
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<(), Option<String>> {
        ControlFlow::Continue(None)
    }

    fn tag(&mut self, tags: &mut Option<String>, name: &[u8], value: RawTag<'_>) -> ControlFlow<()> {
        if name == b"FEN" {
            *tags = Some(value.decode_utf8_lossy().into_owned());
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Option<String>) -> ControlFlow<(), Chess> {
        let fen = tags.unwrap_or_else(|| STARTING_FEN.to_string());
        match parse_fen(&fen) {
            Ok(pos) => {
                self.start_fen = Some(to_fen(&pos));
                ControlFlow::Continue(pos)
            }
            Err(e) => {
                self.error = Some(e);
                ControlFlow::Break(())
            }
        }
    }

    fn begin_variation(&mut self, _movetext: &mut Chess) -> ControlFlow<(), Skip> {
        ControlFlow::Continue(Skip(true)) // stay in the main line
    }

    fn san(&mut self, pos: &mut Chess, san_plus: SanPlus) -> ControlFlow<()> {
        let san = san_plus.san.to_string();
        let played = san_plus
            .san
            .to_move(&*pos)
            .ok()
            .and_then(|mv| {
                let uci = mv.to_uci(CastlingMode::Standard).to_string();
                pos.clone().play(mv).ok().map(|next| (uci, next))
            });

        match played {
            Some((uci, next)) => {
                self.moves.push(uci);
                *pos = next;
                ControlFlow::Continue(())
            }
            None => {
                self.error = Some(ChessError::IllegalMove {
                    mv: san,
                    fen: to_fen(pos),
                });
                ControlFlow::Break(())
            }
        }
    }

    fn end_game(&mut self, _pos: Chess) {}
}

/// Extract the main line of the first game in a PGN string.
pub fn mainline_moves(pgn: &str) -> Result<GameRecord, ChessError> {
    let mut collector = MainlineCollector::default();
    let mut reader = Reader::new(pgn.as_bytes());

    let found = reader
        .read_game(&mut collector)
        .map_err(|e| ChessError::Pgn(e.to_string()))?;

    if let Some(err) = collector.error {
        return Err(err);
    }
    if found.is_none() {
        return Err(ChessError::Pgn("no game found".into()));
    }

    Ok(GameRecord {
        start_fen: collector
            .start_fen
            .unwrap_or_else(|| STARTING_FEN.to_string()),
        moves: collector.moves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainline_simple() {
        let pgn = "[Event \"Casual\"]\n[Result \"*\"]\n\n1. e4 e5 2. Nf3 Nc6 *\n";
        let record = mainline_moves(pgn).unwrap();
        assert_eq!(record.start_fen, STARTING_FEN);
        assert_eq!(record.moves, vec!["e2e4", "e7e5", "g1f3", "b8c6"]);
    }

    #[test]
    fn test_variations_ignored() {
        let pgn = "1. e4 (1. d4 d5) e5 2. Nf3 (2. f4 exf4) Nc6 *\n";
        let record = mainline_moves(pgn).unwrap();
        assert_eq!(record.moves, vec!["e2e4", "e7e5", "g1f3", "b8c6"]);
    }

    #[test]
    fn test_castling_is_standard_uci() {
        let pgn = "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5 4. O-O *\n";
        let record = mainline_moves(pgn).unwrap();
        assert_eq!(record.moves.last().map(String::as_str), Some("e1g1"));
    }

    #[test]
    fn test_fen_tag_sets_start() {
        let pgn = "[SetUp \"1\"]\n[FEN \"4k3/8/8/8/8/8/4P3/4K3 w - - 0 1\"]\n\n1. e4 *\n";
        let record = mainline_moves(pgn).unwrap();
        assert_eq!(record.start_fen, "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
        assert_eq!(record.moves, vec!["e2e4"]);
    }

    #[test]
    fn test_illegal_san_is_error() {
        let pgn = "1. e4 e5 2. Ke3 *\n";
        assert!(matches!(
            mainline_moves(pgn),
            Err(ChessError::IllegalMove { .. })
        ));
    }
}
