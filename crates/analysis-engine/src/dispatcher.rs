//! Request orchestration: cache → pool → engine → cache.
//!
//! Also drives whole-game analysis on one dedicated engine, so the engine's
//! hash table carries over from one position to the next.

use std::sync::Arc;

use chess_core::{mainline_moves, parse_fen, play_uci, to_fen, GameRecord, STARTING_FEN};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::analysis::{AnalysisResult, MoveLine};
use crate::cache::{AnalysisCache, CacheStats};
use crate::config::Variant;
use crate::engine::EngineProcess;
use crate::error::DispatchError;
use crate::pool::PoolStats;
use crate::registry::EngineRegistry;

/// Lines requested per engine when comparing variants.
const CROSS_EXAMINE_LINES: usize = 3;

/// Engine ids for dedicated game engines, kept apart from pool ids.
const DEDICATED_ENGINE_ID: u64 = 0;

/// One analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub fen: String,
    pub depth: u32,
    /// Principal variations wanted; more than 256 are capped to 256
    pub lines: usize,
    pub variant: Variant,
}

impl AnalysisRequest {
    pub fn new(fen: impl Into<String>, depth: u32, lines: usize, variant: Variant) -> Self {
        Self {
            fen: fen.into(),
            depth,
            lines,
            variant,
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        validate(self.depth, self.lines)
    }
}

fn validate(depth: u32, lines: usize) -> Result<(), DispatchError> {
    if depth == 0 {
        return Err(DispatchError::InvalidRequest("depth must be at least 1"));
    }
    if lines == 0 {
        return Err(DispatchError::InvalidRequest("lines must be at least 1"));
    }
    Ok(())
}

/// Moves of a game to analyze: UCI tokens from the standard start, or a PGN
/// record whose main line is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameInput {
    Moves(Vec<String>),
    Pgn(String),
}

impl GameInput {
    fn into_record(self) -> Result<GameRecord, DispatchError> {
        match self {
            GameInput::Moves(moves) => Ok(GameRecord {
                start_fen: STARTING_FEN.to_string(),
                moves,
            }),
            GameInput::Pgn(pgn) => Ok(mainline_moves(&pgn)?),
        }
    }
}

/// Analysis of one position of a game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionAnalysis {
    /// 0 for the start position, otherwise the 1-based index of the move played
    pub move_number: usize,
    pub fen: String,
    pub move_played: Option<String>,
    pub analysis: AnalysisResult,
}

/// One variant's view in [`Dispatcher::cross_examine`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantVerdict {
    pub variant: Variant,
    pub top_moves: AnalysisResult,
    /// This variant's evaluation of the other variant's best move
    pub eval_other_move: Option<MoveLine>,
    /// This variant's evaluation after the other's best move and expected reply
    pub eval_other_ponder: Option<MoveLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossExamination {
    pub primary: VariantVerdict,
    pub alternate: VariantVerdict,
}

pub struct Dispatcher {
    registry: Arc<EngineRegistry>,
    cache: Arc<AnalysisCache>,
}

impl Dispatcher {
    pub fn new(registry: Arc<EngineRegistry>, cache: Arc<AnalysisCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Analyze one position.
    ///
    /// A cache hit returns immediately. On a miss an engine is leased, the
    /// search runs and the result is cached. If no engine can be started the
    /// result is empty.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, DispatchError> {
        request.validate()?;
        let AnalysisRequest {
            fen,
            depth,
            lines,
            variant,
        } = request;

        if let Some(hit) = self.cache.get(fen, *depth, *lines).await {
            return Ok(hit);
        }

        info!(fen = %fen, depth, lines, variant = %variant, "Computing engine analysis");

        let settings = self.registry.settings();
        let pool = self.registry.pool(*variant).await;
        let Some(mut lease) = pool.lease(settings.lease_timeout).await else {
            if pool.is_shutting_down() {
                return Err(DispatchError::ShuttingDown(*variant));
            }
            error!(variant = %variant, "Failed to get engine from pool");
            return Ok(AnalysisResult::default());
        };

        let outcome = lease
            .engine()
            .analyze(fen, *depth, *lines, settings.analysis_timeout)
            .await;
        pool.release(lease).await;

        match outcome {
            Ok(result) => {
                if !result.is_empty() {
                    self.cache.put(fen, *depth, *lines, &result).await;
                }
                Ok(result)
            }
            Err(e) => {
                error!(fen = %fen, error = %e, "Error during engine analysis");
                Ok(AnalysisResult::default())
            }
        }
    }

    /// Analyze every position of a game on one dedicated engine.
    ///
    /// Illegal or unparseable moves are skipped and the sequence continues
    /// from the unchanged position. The dedicated engine is terminated when
    /// this returns, or killed if the future is dropped.
    pub async fn analyze_sequence(
        &self,
        game: GameInput,
        depth: u32,
        lines: usize,
        variant: Variant,
    ) -> Result<Vec<PositionAnalysis>, DispatchError> {
        validate(depth, lines)?;
        let record = game.into_record()?;
        let mut pos = parse_fen(&record.start_fen)?;

        info!(depth, lines, variant = %variant, moves = record.moves.len(), "Starting game analysis");

        let mut game_engine = DedicatedEngine::start(&self.registry, variant).await;
        let mut results = Vec::with_capacity(record.moves.len() + 1);

        let fen = to_fen(&pos);
        let analysis = self.analyze_dedicated(&mut game_engine, &fen, depth, lines).await;
        results.push(PositionAnalysis {
            move_number: 0,
            fen,
            move_played: None,
            analysis,
        });

        for (idx, uci) in record.moves.iter().enumerate() {
            let move_number = idx + 1;
            pos = match play_uci(&pos, uci) {
                Ok(next) => next,
                Err(e) => {
                    warn!(move_number, mv = %uci, error = %e, "Skipping illegal move");
                    continue;
                }
            };

            let fen = to_fen(&pos);
            let analysis = self.analyze_dedicated(&mut game_engine, &fen, depth, lines).await;
            results.push(PositionAnalysis {
                move_number,
                fen,
                move_played: Some(uci.clone()),
                analysis,
            });
            info!(move_number, total = record.moves.len(), mv = %uci, "Analyzed move");
        }

        game_engine.finish().await;
        info!(positions = results.len(), "Game analysis complete");
        Ok(results)
    }

    async fn analyze_dedicated(
        &self,
        game_engine: &mut DedicatedEngine<'_>,
        fen: &str,
        depth: u32,
        lines: usize,
    ) -> AnalysisResult {
        if let Some(hit) = self.cache.get(fen, depth, lines).await {
            return hit;
        }

        let Some(result) = game_engine.analyze(fen, depth, lines).await else {
            return AnalysisResult::default();
        };
        if !result.is_empty() {
            self.cache.put(fen, depth, lines, &result).await;
        }
        result
    }

    /// Apply `uci` to `fen` and analyze the result with a single line.
    ///
    /// `None` if the move is illegal or no analysis is available.
    pub async fn evaluate_move(
        &self,
        fen: &str,
        uci: &str,
        depth: u32,
        variant: Variant,
    ) -> Result<Option<MoveLine>, DispatchError> {
        let next = match parse_fen(fen).and_then(|pos| play_uci(&pos, uci)) {
            Ok(next) => next,
            Err(e) => {
                warn!(fen = %fen, mv = %uci, error = %e, "Cannot evaluate move");
                return Ok(None);
            }
        };

        let request = AnalysisRequest::new(to_fen(&next), depth, 1, variant);
        let result = self.analyze(&request).await?;
        Ok(result.best_line().cloned())
    }

    /// Analyze with both variants, then let each judge the other's choice.
    pub async fn cross_examine(&self, fen: &str, depth: u32) -> Result<CrossExamination, DispatchError> {
        let primary_req = AnalysisRequest::new(fen, depth, CROSS_EXAMINE_LINES, Variant::Primary);
        let alternate_req = AnalysisRequest::new(fen, depth, CROSS_EXAMINE_LINES, Variant::Alternate);
        let (primary, alternate) = tokio::join!(self.analyze(&primary_req), self.analyze(&alternate_req));
        let (primary, alternate) = (primary?, alternate?);

        let primary_verdict = self
            .judge(fen, depth, Variant::Primary, primary, &alternate)
            .await?;
        let alternate_verdict = self
            .judge(fen, depth, Variant::Alternate, alternate, &primary_verdict.top_moves)
            .await?;

        Ok(CrossExamination {
            primary: primary_verdict,
            alternate: alternate_verdict,
        })
    }

    async fn judge(
        &self,
        fen: &str,
        depth: u32,
        judge: Variant,
        own: AnalysisResult,
        other: &AnalysisResult,
    ) -> Result<VariantVerdict, DispatchError> {
        let mut eval_other_move = None;
        let mut eval_other_ponder = None;

        if let Some(best) = other.best_move() {
            eval_other_move = self.evaluate_move(fen, best, depth, judge).await?;

            if let Some(ponder) = other.ponder.as_deref() {
                if let Ok(after_best) = parse_fen(fen).and_then(|pos| play_uci(&pos, best)) {
                    eval_other_ponder = self
                        .evaluate_move(&to_fen(&after_best), ponder, depth, judge)
                        .await?;
                }
            }
        }

        Ok(VariantVerdict {
            variant: judge,
            top_moves: own,
            eval_other_move,
            eval_other_ponder,
        })
    }

    pub async fn pool_statistics(&self, variant: Variant) -> PoolStats {
        self.registry.stats(variant).await
    }

    pub async fn pool_statistics_all(&self) -> Vec<PoolStats> {
        self.registry.stats_all().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

/// Engine held for the length of one game, outside the pool.
///
/// A process that fails mid-game is dropped and one replacement is tried on
/// the next cache miss; if that cannot start, the rest of the game is served
/// from cache only.
struct DedicatedEngine<'a> {
    registry: &'a EngineRegistry,
    variant: Variant,
    engine: Option<EngineProcess>,
    exhausted: bool,
}

impl<'a> DedicatedEngine<'a> {
    async fn start(registry: &'a EngineRegistry, variant: Variant) -> Self {
        let mut dedicated = Self {
            registry,
            variant,
            engine: None,
            exhausted: false,
        };
        dedicated.respawn().await;
        dedicated
    }

    async fn respawn(&mut self) {
        info!(variant = %self.variant, "Creating dedicated engine for game analysis");
        let spec = self.registry.spec(self.variant);
        match EngineProcess::spawn(DEDICATED_ENGINE_ID, spec, self.registry.settings()).await {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => {
                error!(variant = %self.variant, error = %e, "Failed to create dedicated engine");
                self.exhausted = true;
            }
        }
    }

    async fn analyze(&mut self, fen: &str, depth: u32, lines: usize) -> Option<AnalysisResult> {
        if self.engine.is_none() && !self.exhausted {
            self.respawn().await;
        }

        let limit = self.registry.settings().analysis_timeout;
        let engine = self.engine.as_mut()?;
        match engine.analyze(fen, depth, lines, limit).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!(fen = %fen, error = %e, "Error analyzing position");
                self.engine = None;
                None
            }
        }
    }

    async fn finish(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.terminate(self.registry.settings().quit_grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero() {
        assert!(validate(1, 1).is_ok());
        assert!(matches!(validate(0, 1), Err(DispatchError::InvalidRequest(_))));
        assert!(matches!(validate(1, 0), Err(DispatchError::InvalidRequest(_))));
    }

    #[test]
    fn test_game_input_accepts_moves_or_pgn() {
        let moves: GameInput = serde_json::from_str(r#"["e2e4", "e7e5"]"#).unwrap();
        assert_eq!(moves, GameInput::Moves(vec!["e2e4".into(), "e7e5".into()]));

        let pgn: GameInput = serde_json::from_str(r#""1. e4 e5 *""#).unwrap();
        assert_eq!(pgn, GameInput::Pgn("1. e4 e5 *".into()));
    }

    #[test]
    fn test_moves_start_from_initial_position() {
        let record = GameInput::Moves(vec!["d2d4".into()]).into_record().unwrap();
        assert_eq!(record.start_fen, STARTING_FEN);
        assert_eq!(record.moves, vec!["d2d4"]);
    }

    #[test]
    fn test_request_variant_serializes_lowercase() {
        let request = AnalysisRequest::new(STARTING_FEN, 12, 2, Variant::Alternate);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["variant"], "alternate");
    }
}
