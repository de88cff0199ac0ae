//! Operational entry point for the analysis core.
//!
//! Usage:
//!   analysis-engine analyze <fen> [--depth N] [--lines N] [--variant primary|alternate]
//!   analysis-engine game <pgn-file|moves...> [--depth N] [--lines N] [--variant V]
//!   analysis-engine compare <fen> [--depth N]
//!   analysis-engine stats
//!   analysis-engine clear-cache

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use tracing::{info, warn};

use analysis_engine::{
    AnalysisCache, AnalysisRequest, AppConfig, Dispatcher, EngineRegistry, GameInput, KvStore,
    MemoryStore, RedisStore, Variant,
};

const DEFAULT_DEPTH: u32 = 20;
const DEFAULT_LINES: usize = 1;

/// Parsed command line: subcommand, positional arguments and flags.
struct Cli {
    command: String,
    positional: Vec<String>,
    depth: u32,
    lines: usize,
    variant: Variant,
}

fn parse_args() -> anyhow::Result<Cli> {
    let mut args = std::env::args().skip(1);
    let command = args.next().ok_or_else(|| anyhow!("missing command"))?;

    let mut cli = Cli {
        command,
        positional: Vec::new(),
        depth: DEFAULT_DEPTH,
        lines: DEFAULT_LINES,
        variant: Variant::Primary,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--depth" => cli.depth = flag_value(&mut args, "--depth")?,
            "--lines" => cli.lines = flag_value(&mut args, "--lines")?,
            "--variant" => {
                let value = args.next().ok_or_else(|| anyhow!("--variant needs a value"))?;
                cli.variant = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            _ => cli.positional.push(arg),
        }
    }

    Ok(cli)
}

fn flag_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = args.next().ok_or_else(|| anyhow!("{flag} needs a value"))?;
    value.parse().with_context(|| format!("invalid value for {flag}: {value}"))
}

/// Positional arguments of `game`: a PGN file, or UCI moves from the start.
fn game_input(positional: &[String]) -> anyhow::Result<GameInput> {
    if let [single] = positional {
        if Path::new(single).is_file() {
            let pgn = std::fs::read_to_string(single).with_context(|| format!("reading {single}"))?;
            return Ok(GameInput::Pgn(pgn));
        }
    }
    Ok(GameInput::Moves(positional.to_vec()))
}

/// Connect the cache to Redis, or fall back to an in-process store.
async fn open_cache(config: &AppConfig) -> AnalysisCache {
    let store: Arc<dyn KvStore> = match RedisStore::connect(&config.redis_url, config.redis_timeout).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, using in-memory cache");
            Arc::new(MemoryStore::new())
        }
    };
    AnalysisCache::new(store)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(dispatcher: &Dispatcher, cli: Cli) -> anyhow::Result<()> {
    match cli.command.as_str() {
        "analyze" => {
            let [fen] = cli.positional.as_slice() else {
                bail!("usage: analyze <fen> [--depth N] [--lines N] [--variant V]");
            };
            let request = AnalysisRequest::new(fen.as_str(), cli.depth, cli.lines, cli.variant);
            print_json(&dispatcher.analyze(&request).await?)
        }
        "game" => {
            let game = game_input(&cli.positional)?;
            let positions = dispatcher
                .analyze_sequence(game, cli.depth, cli.lines, cli.variant)
                .await?;
            print_json(&positions)
        }
        "compare" => {
            let [fen] = cli.positional.as_slice() else {
                bail!("usage: compare <fen> [--depth N]");
            };
            print_json(&dispatcher.cross_examine(fen, cli.depth).await?)
        }
        "stats" => {
            let pools = dispatcher.pool_statistics_all().await;
            print_json(&serde_json::json!({
                "pools": pools,
                "cache": dispatcher.cache_stats(),
            }))
        }
        "clear-cache" => {
            dispatcher.clear_cache().await;
            print_json(&dispatcher.cache_stats())
        }
        other => bail!("unknown command '{other}'"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let cli = parse_args()?;
    let config = AppConfig::from_env();
    info!(
        primary = %config.primary.path,
        alternate = %config.alternate.path,
        pool_size = config.engine.pool_size,
        threads = config.engine.threads,
        "Config loaded"
    );

    let cache = open_cache(&config).await;

    // Only commands that analyze need the primary pool up front
    let registry = match cli.command.as_str() {
        "analyze" | "game" | "compare" => EngineRegistry::start(&config).await,
        _ => EngineRegistry::from_config(&config),
    };
    let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(cache));

    let outcome = tokio::select! {
        outcome = run(&dispatcher, cli) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    dispatcher.shutdown().await;
    outcome
}
