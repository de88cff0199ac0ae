//! UCI line codec: outbound commands and inbound engine messages.

use std::fmt;

use crate::analysis::{MoveLine, Wdl};

/// Keywords that end a `pv` move list inside an `info` line.
const INFO_KEYWORDS: &[&str] = &[
    "depth", "seldepth", "time", "nodes", "score", "multipv", "wdl", "nps", "hashfull",
    "tbhits", "currmove", "currmovenumber", "bmc", "string",
];

/// A command sent to the engine's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Uci,
    SetOption { name: &'a str, value: String },
    Position(&'a str),
    GoDepth(u32),
    Stop,
    NewGame,
    IsReady,
    Quit,
}

impl Command<'_> {
    /// Number of principal variations to report.
    pub fn multipv(lines: usize) -> Command<'static> {
        Command::SetOption {
            name: "MultiPV",
            value: lines.to_string(),
        }
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Uci => f.write_str("uci"),
            Command::SetOption { name, value } => write!(f, "setoption name {name} value {value}"),
            Command::Position(fen) => write!(f, "position fen {fen}"),
            Command::GoDepth(depth) => write!(f, "go depth {depth}"),
            Command::Stop => f.write_str("stop"),
            Command::NewGame => f.write_str("ucinewgame"),
            Command::IsReady => f.write_str("isready"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

/// Progress report for one multipv slot.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoReport {
    pub depth: u32,
    /// 1-based multipv slot
    pub multipv: usize,
    pub line: MoveLine,
}

/// A classified line read from the engine's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    UciOk,
    ReadyOk,
    Info(InfoReport),
    BestMove { best: String, ponder: Option<String> },
    /// Anything else, including `info` lines that do not carry a usable PV
    Other,
}

/// Classify one line of engine output. Never fails: unusable lines are `Other`.
pub fn parse_line(line: &str) -> EngineMessage {
    let line = line.trim();
    match line {
        "uciok" => return EngineMessage::UciOk,
        "readyok" => return EngineMessage::ReadyOk,
        _ => {}
    }

    if line.starts_with("info depth") {
        return parse_info(line).map_or(EngineMessage::Other, EngineMessage::Info);
    }

    if line.starts_with("bestmove") {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(best) = parts.get(1) {
            let ponder = match (parts.get(2), parts.get(3)) {
                (Some(&"ponder"), Some(mv)) => Some(mv.to_string()),
                _ => None,
            };
            return EngineMessage::BestMove {
                best: best.to_string(),
                ponder,
            };
        }
    }

    EngineMessage::Other
}

/// Parse an `info depth ... multipv N ... pv ...` line.
///
/// Returns `None` if the multipv or pv marker is missing, the PV is empty or a
/// numeric field is malformed.
pub fn parse_info(line: &str) -> Option<InfoReport> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"info") {
        return None;
    }

    let depth = value_after(&parts, "depth")?;
    let multipv: usize = value_after(&parts, "multipv")?;
    if multipv == 0 {
        return None;
    }

    let pv_idx = parts.iter().position(|p| *p == "pv")? + 1;
    let pv_moves: Vec<String> = parts[pv_idx..]
        .iter()
        .take_while(|p| !INFO_KEYWORDS.contains(*p))
        .map(|p| p.to_string())
        .collect();

    let (score, mate) = parse_score(&parts)?;
    let wdl = parse_wdl(&parts)?;

    let line = MoveLine::new(pv_moves, score, mate, wdl)?;
    Some(InfoReport {
        depth,
        multipv,
        line,
    })
}

/// Value following the first occurrence of `key`.
fn value_after<T: std::str::FromStr>(parts: &[&str], key: &str) -> Option<T> {
    let idx = parts.iter().position(|p| *p == key)?;
    parts.get(idx + 1)?.parse().ok()
}

/// `score cp N` / `score mate N`. Outer `None` means a malformed score field;
/// a line without any score is `Some((None, None))`.
fn parse_score(parts: &[&str]) -> Option<(Option<i32>, Option<i32>)> {
    let Some(idx) = parts.iter().position(|p| *p == "score") else {
        return Some((None, None));
    };
    let value: i32 = parts.get(idx + 2)?.parse().ok()?;
    match *parts.get(idx + 1)? {
        "cp" => Some((Some(value), None)),
        "mate" => Some((None, Some(value))),
        _ => None,
    }
}

/// `wdl W D L`, same convention as [`parse_score`].
fn parse_wdl(parts: &[&str]) -> Option<Option<Wdl>> {
    let Some(idx) = parts.iter().position(|p| *p == "wdl") else {
        return Some(None);
    };
    let num = |offset: usize| -> Option<u32> { parts.get(idx + offset)?.parse().ok() };
    Some(Some(Wdl {
        win: num(1)?,
        draw: num(2)?,
        loss: num(3)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_text() {
        assert_eq!(Command::Uci.to_string(), "uci");
        assert_eq!(Command::multipv(3).to_string(), "setoption name MultiPV value 3");
        assert_eq!(
            Command::Position("8/8/8/8/8/8/8/K6k w - - 0 1").to_string(),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
        assert_eq!(Command::GoDepth(18).to_string(), "go depth 18");
        assert_eq!(Command::NewGame.to_string(), "ucinewgame");
        assert_eq!(Command::IsReady.to_string(), "isready");
        assert_eq!(Command::Stop.to_string(), "stop");
        assert_eq!(Command::Quit.to_string(), "quit");
    }

    #[test]
    fn test_parse_full_info_line() {
        let line = "info depth 18 seldepth 22 multipv 2 score cp 35 wdl 520 300 180 nodes 1200000 pv e2e4 e7e5 g1f3";
        let EngineMessage::Info(report) = parse_line(line) else {
            panic!("expected info report");
        };
        assert_eq!(report.depth, 18);
        assert_eq!(report.multipv, 2);
        assert_eq!(report.line.first_move, "e2e4");
        assert_eq!(report.line.pv_moves, vec!["e2e4", "e7e5", "g1f3"]);
        assert_eq!(report.line.score, Some(35));
        assert_eq!(report.line.mate, None);
        assert_eq!(
            report.line.wdl,
            Some(Wdl {
                win: 520,
                draw: 300,
                loss: 180
            })
        );
    }

    #[test]
    fn test_pv_stops_at_keyword() {
        let line = "info depth 20 multipv 1 pv e2e4 e7e5 nodes 100 time 5";
        let report = parse_info(line).unwrap();
        assert_eq!(report.line.pv_moves, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn test_parse_mate_score() {
        let line = "info depth 12 multipv 1 score mate -3 nodes 5000 pv h7h8 g8h8";
        let report = parse_info(line).unwrap();
        assert_eq!(report.line.score, None);
        assert_eq!(report.line.mate, Some(-3));
        assert_eq!(report.line.winprob, Some(0.0));
    }

    #[test]
    fn test_missing_score_is_indeterminate() {
        let report = parse_info("info depth 1 multipv 1 pv e2e4").unwrap();
        assert_eq!(report.line.winprob, None);
    }

    #[test]
    fn test_lines_without_markers_are_discarded() {
        assert_eq!(parse_line("info depth 5 currmove e2e4 currmovenumber 1"), EngineMessage::Other);
        assert_eq!(parse_line("info depth 5 score cp 10 pv e2e4"), EngineMessage::Other);
        assert_eq!(parse_line("info depth 5 multipv 1 score cp 10"), EngineMessage::Other);
        assert_eq!(parse_line("info string NNUE evaluation enabled"), EngineMessage::Other);
        assert_eq!(parse_line("info depth 5 multipv 1 pv"), EngineMessage::Other);
    }

    #[test]
    fn test_malformed_fields_are_discarded() {
        assert_eq!(parse_line("info depth 5 multipv x pv e2e4"), EngineMessage::Other);
        assert_eq!(parse_line("info depth 5 multipv 1 score cp abc pv e2e4"), EngineMessage::Other);
        assert_eq!(parse_line("info depth 5 multipv 1 wdl 1 2 pv e2e4"), EngineMessage::Other);
    }

    #[test]
    fn test_bestmove() {
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5"),
            EngineMessage::BestMove {
                best: "e2e4".into(),
                ponder: Some("e7e5".into())
            }
        );
        assert_eq!(
            parse_line("bestmove e2e4"),
            EngineMessage::BestMove {
                best: "e2e4".into(),
                ponder: None
            }
        );
        assert_eq!(parse_line("bestmove"), EngineMessage::Other);
    }

    #[test]
    fn test_acknowledgements() {
        assert_eq!(parse_line("uciok"), EngineMessage::UciOk);
        assert_eq!(parse_line("readyok\r"), EngineMessage::ReadyOk);
        assert_eq!(parse_line("id name Stockfish"), EngineMessage::Other);
    }
}
