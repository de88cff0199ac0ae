//! Analysis result types and win-probability mapping

use serde::{Deserialize, Serialize};

/// Logistic slope for centipawn → win probability.
const WIN_PROB_SLOPE: f64 = 0.00368;

/// Win/draw/loss triple as reported by the engine, per mille.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wdl {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
}

impl Wdl {
    /// Expected score in percent, draws counting half.
    pub fn win_probability(&self) -> f64 {
        (self.win as f64 + self.draw as f64 / 2.0) / 10.0
    }
}

/// One principal variation reported for a multipv slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLine {
    #[serde(rename = "move")]
    pub first_move: String,
    pub pv_moves: Vec<String>,
    /// Centipawns from the side to move
    pub score: Option<i32>,
    /// Plies to mate, positive when the side to move mates
    pub mate: Option<i32>,
    pub wdl: Option<Wdl>,
    /// 0..=100, `None` when the engine gave neither score nor mate
    pub winprob: Option<f64>,
}

impl MoveLine {
    /// Build a line from its parsed parts, deriving `winprob`.
    pub fn new(pv_moves: Vec<String>, score: Option<i32>, mate: Option<i32>, wdl: Option<Wdl>) -> Option<Self> {
        let first_move = pv_moves.first()?.clone();
        let winprob = wdl
            .map(|w| w.win_probability())
            .or_else(|| win_probability(score, mate));

        Some(Self {
            first_move,
            pv_moves,
            score,
            mate,
            wdl,
            winprob,
        })
    }
}

/// Lines of one analysis, slot `i` holding multipv `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "bestmoves")]
    pub lines: Vec<Option<MoveLine>>,
    pub ponder: Option<String>,
}

impl AnalysisResult {
    /// `slots` empty lines, filled in as the engine reports them.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            lines: vec![None; slots],
            ponder: None,
        }
    }

    /// True when no line was reported at all.
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(Option::is_none)
    }

    /// The first reported line.
    pub fn best_line(&self) -> Option<&MoveLine> {
        self.lines.iter().flatten().next()
    }

    pub fn best_move(&self) -> Option<&str> {
        self.best_line().map(|l| l.first_move.as_str())
    }
}

/// Map an engine evaluation to a 0..=100 win probability.
///
/// A mate score wins outright when positive and loses otherwise. Centipawns go
/// through a logistic curve. Neither present is indeterminate (`None`).
pub fn win_probability(score: Option<i32>, mate: Option<i32>) -> Option<f64> {
    if let Some(mate) = mate {
        return Some(if mate > 0 { 100.0 } else { 0.0 });
    }

    let cp = score? as f64;
    let p = 50.0 + 50.0 * (2.0 / (1.0 + (-WIN_PROB_SLOPE * cp).exp()) - 1.0);
    Some(p.clamp(0.0, 100.0))
}
