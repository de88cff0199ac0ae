//! FEN parsing and UCI move application.

use shakmaty::{fen::Fen, uci::UciMove, CastlingMode, Chess, EnPassantMode, Position};

use crate::error::ChessError;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a FEN string into a playable position.
pub fn parse_fen(fen: &str) -> Result<Chess, ChessError> {
    let invalid = |reason: String| ChessError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };

    let parsed: Fen = fen.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| invalid(format!("{e}")))
}

/// Serialize a position back to FEN, keeping move counters.
pub fn to_fen(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Play a UCI move (e.g. `e2e4`, `e7e8q`) on a position.
///
/// Fails without touching `pos` if the token does not parse or the move is
/// not legal here.
pub fn play_uci(pos: &Chess, uci: &str) -> Result<Chess, ChessError> {
    let parsed: UciMove = uci
        .trim()
        .parse()
        .map_err(|_| ChessError::InvalidMove(uci.to_string()))?;

    let illegal = || ChessError::IllegalMove {
        mv: uci.to_string(),
        fen: to_fen(pos),
    };

    let mv = parsed.to_move(pos).map_err(|_| illegal())?;
    pos.clone().play(mv).map_err(|_| illegal())
}

/// FEN-in, FEN-out variant of [`play_uci`].
pub fn apply_uci_move(fen: &str, uci: &str) -> Result<String, ChessError> {
    let pos = parse_fen(fen)?;
    let next = play_uci(&pos, uci)?;
    Ok(to_fen(&next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_legal_move() {
        let fen = apply_uci_move(STARTING_FEN, "e2e4").unwrap();
        assert_eq!(
            fen,
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn test_illegal_move_rejected() {
        let err = apply_uci_move(STARTING_FEN, "g1g3").unwrap_err();
        assert!(matches!(err, ChessError::IllegalMove { .. }));
    }

    #[test]
    fn test_garbage_move_rejected() {
        let err = apply_uci_move(STARTING_FEN, "hello").unwrap_err();
        assert_eq!(err, ChessError::InvalidMove("hello".to_string()));
    }

    #[test]
    fn test_invalid_fen() {
        assert!(matches!(
            parse_fen("not a fen"),
            Err(ChessError::InvalidFen { .. })
        ));
    }

    #[test]
    fn test_promotion() {
        let fen = apply_uci_move("8/4P3/8/8/8/8/k7/4K3 w - - 0 1", "e7e8q").unwrap();
        assert!(fen.starts_with("4Q3/"));
    }
}
