//! UCI engine process wrapper (async I/O)

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::analysis::AnalysisResult;
use crate::config::{EngineSettings, EngineSpec};
use crate::error::EngineError;
use crate::protocol::{self, Command as Uci, EngineMessage};

/// No chess position has more than 218 legal moves.
const MAX_LINE_SLOTS: usize = 256;

/// Lines actually requested from the engine for `lines` asked for.
pub fn line_slots(lines: usize) -> usize {
    lines.min(MAX_LINE_SLOTS)
}

/// How long to wait for `bestmove` after a timed-out search is stopped.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Pool-visible state of an engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Leased,
    Dead,
}

/// One engine subprocess with its pipes.
pub struct EngineProcess {
    id: u64,
    state: SlotState,
    process: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl EngineProcess {
    /// Spawn an engine and run the UCI handshake and option setup.
    ///
    /// A process that fails any step is killed and an error returned; it is
    /// never retried in place.
    pub async fn spawn(id: u64, spec: &EngineSpec, settings: &EngineSettings) -> Result<Self, EngineError> {
        debug!(engine_id = id, path = %spec.path, "Spawning engine");

        let mut process = Command::new(&spec.path)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {e}", spec.path)))?;

        let (Some(stdin), Some(stdout)) = (process.stdin.take(), process.stdout.take()) else {
            let _ = process.start_kill();
            return Err(EngineError::Spawn(format!("{}: pipes not captured", spec.path)));
        };

        let mut engine = Self {
            id,
            state: SlotState::Idle,
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let deadline = Instant::now() + settings.handshake_timeout;

        engine.send(&Uci::Uci).await?;
        engine.wait_for(EngineMessage::UciOk, "uciok", deadline).await?;

        engine.set_option("Threads", settings.threads).await?;
        engine.set_option("Hash", settings.hash_mb).await?;
        engine.set_option("UCI_ShowWDL", "true").await?;

        engine.send(&Uci::IsReady).await?;
        engine.wait_for(EngineMessage::ReadyOk, "readyok", deadline).await?;

        Ok(engine)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Whether the OS process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    /// Send a command line to the engine.
    async fn send(&mut self, cmd: &Uci<'_>) -> Result<(), EngineError> {
        let text = cmd.to_string();
        debug!(engine_id = self.id, cmd = %text, "engine <");
        self.stdin.write_all(format!("{text}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn set_option(&mut self, name: &str, value: impl ToString) -> Result<(), EngineError> {
        self.send(&Uci::SetOption {
            name,
            value: value.to_string(),
        })
        .await
    }

    /// Read one line, giving up at `deadline`.
    async fn read_line(&mut self, deadline: Instant) -> Result<String, EngineError> {
        match timeout_at(deadline, self.stdout.next_line()).await {
            Err(_) => Err(EngineError::Timeout("engine output")),
            Ok(Ok(Some(line))) => {
                debug!(engine_id = self.id, line = line.trim(), "engine >");
                Ok(line)
            }
            Ok(Ok(None)) => Err(EngineError::Exited),
            Ok(Err(e)) => Err(EngineError::Io(e)),
        }
    }

    /// Skip lines until `expected` arrives.
    async fn wait_for(
        &mut self,
        expected: EngineMessage,
        what: &'static str,
        deadline: Instant,
    ) -> Result<(), EngineError> {
        loop {
            match self.read_line(deadline).await {
                Ok(line) if protocol::parse_line(&line) == expected => return Ok(()),
                Ok(_) => {}
                Err(EngineError::Timeout(_)) => return Err(EngineError::Timeout(what)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one search: `position`, `MultiPV`, `go depth`, then collect
    /// progress lines until `bestmove`.
    ///
    /// If `limit` elapses first the search is stopped and whatever lines were
    /// parsed so far are returned; that is not an error.
    pub async fn analyze(
        &mut self,
        fen: &str,
        depth: u32,
        lines: usize,
        limit: Duration,
    ) -> Result<AnalysisResult, EngineError> {
        let outcome = self.run_search(fen, depth, lines, limit).await;
        if outcome.is_err() {
            self.state = SlotState::Dead;
        }
        outcome
    }

    async fn run_search(
        &mut self,
        fen: &str,
        depth: u32,
        lines: usize,
        limit: Duration,
    ) -> Result<AnalysisResult, EngineError> {
        let slots = line_slots(lines);
        self.send(&Uci::multipv(slots)).await?;
        self.send(&Uci::Position(fen)).await?;
        self.send(&Uci::GoDepth(depth)).await?;

        let mut result = AnalysisResult::with_slots(slots);
        let deadline = Instant::now() + limit;

        loop {
            match self.read_line(deadline).await {
                Ok(line) => {
                    if self.record(&line, &mut result) {
                        return Ok(result);
                    }
                }
                Err(EngineError::Timeout(_)) => {
                    warn!(engine_id = self.id, fen, depth, "Engine analysis timeout, stopping search");
                    self.send(&Uci::Stop).await?;
                    self.drain_search(&mut result).await?;
                    return Ok(result);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read out the rest of a stopped search so the next command starts clean.
    async fn drain_search(&mut self, result: &mut AnalysisResult) -> Result<(), EngineError> {
        let deadline = Instant::now() + STOP_GRACE;
        loop {
            match self.read_line(deadline).await {
                Ok(line) => {
                    if self.record(&line, result) {
                        return Ok(());
                    }
                }
                Err(EngineError::Timeout(_)) => {
                    warn!(engine_id = self.id, "No bestmove after stop");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fold one output line into `result`. Returns true on `bestmove`.
    fn record(&self, line: &str, result: &mut AnalysisResult) -> bool {
        match protocol::parse_line(line) {
            EngineMessage::Info(report) => {
                if let Some(slot) = result.lines.get_mut(report.multipv - 1) {
                    *slot = Some(report.line);
                }
                false
            }
            EngineMessage::BestMove { ponder, .. } => {
                result.ponder = ponder;
                true
            }
            _ => false,
        }
    }

    /// `ucinewgame` + `isready`, waiting up to `limit` for `readyok`.
    ///
    /// Failure marks the process dead.
    pub async fn reset(&mut self, limit: Duration) -> Result<(), EngineError> {
        let outcome = async {
            self.send(&Uci::NewGame).await?;
            self.send(&Uci::IsReady).await?;
            self.wait_for(EngineMessage::ReadyOk, "readyok", Instant::now() + limit)
                .await
        }
        .await;

        if outcome.is_err() {
            self.state = SlotState::Dead;
        }
        outcome
    }

    /// `quit`, wait up to `grace`, then kill.
    pub async fn terminate(mut self, grace: Duration) {
        self.state = SlotState::Dead;
        if !self.is_alive() {
            return;
        }

        let _ = self.send(&Uci::Quit).await;
        if timeout(grace, self.process.wait()).await.is_err() {
            warn!(engine_id = self.id, "Engine ignored quit, killing");
            let _ = self.process.kill().await;
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}
