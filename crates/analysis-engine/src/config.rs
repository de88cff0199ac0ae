//! Service configuration from environment variables

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration pooled independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Full-strength NNUE engine; its pool is created at startup.
    Primary,
    /// Human-like engine; its pool is created on first use.
    Alternate,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Primary, Variant::Alternate];
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Primary => f.write_str("primary"),
            Variant::Alternate => f.write_str("alternate"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "nnue" => Ok(Variant::Primary),
            "alternate" | "human" => Ok(Variant::Alternate),
            other => Err(format!("unknown engine variant '{other}'")),
        }
    }
}

/// How to launch one engine binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub path: String,
    pub args: Vec<String>,
}

impl EngineSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Pool sizing, engine options and every timeout on the engine path.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Processes per variant pool
    pub pool_size: usize,
    /// `Threads` option for each engine
    pub threads: usize,
    /// `Hash` option for each engine, in MB
    pub hash_mb: usize,
    /// How long a caller waits for an idle slot before a temporary engine is started
    pub lease_timeout: Duration,
    /// Wall-clock limit for one `go depth` search
    pub analysis_timeout: Duration,
    /// Wait for `readyok` after `ucinewgame` when a slot is returned
    pub reset_timeout: Duration,
    /// Wait for `uciok` and `readyok` while starting an engine
    pub handshake_timeout: Duration,
    /// Wait after `quit` before the process is killed
    pub quit_grace: Duration,
}

impl EngineSettings {
    /// Threads are split evenly between the engines of one pool.
    pub fn threads_for(cpu_count: usize, pool_size: usize) -> usize {
        (cpu_count / pool_size.max(1)).max(1)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let pool_size = 8;
        Self {
            pool_size,
            threads: Self::threads_for(num_cpus::get(), pool_size),
            hash_mb: 64,
            lease_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            quit_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Primary (NNUE) engine binary
    pub primary: EngineSpec,

    /// Alternate (human-like) engine binary
    pub alternate: EngineSpec,

    pub engine: EngineSettings,

    /// Redis connection URL for the analysis cache
    pub redis_url: String,

    /// Bound on connecting and on every Redis round trip
    pub redis_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let pool_size = env_parse("ENGINE_POOL_SIZE", 8usize).max(1);
        let cpu_count = env_parse("CPU_COUNT", num_cpus::get());
        let secs = |key: &str, default: u64| Duration::from_secs(env_parse(key, default));

        let engine = EngineSettings {
            pool_size,
            threads: EngineSettings::threads_for(cpu_count, pool_size),
            hash_mb: env_parse("ENGINE_HASH_MB", 64),
            lease_timeout: secs("LEASE_TIMEOUT_SECS", 30),
            analysis_timeout: secs("ANALYSIS_TIMEOUT_SECS", 10),
            reset_timeout: secs("RESET_TIMEOUT_SECS", 5),
            handshake_timeout: secs("HANDSHAKE_TIMEOUT_SECS", 10),
            quit_grace: secs("QUIT_GRACE_SECS", 5),
        };

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| {
            let host = env::var("REDIS_HOST").unwrap_or_else(|_| "redis_cache".to_string());
            let port: u16 = env_parse("REDIS_PORT", 6379);
            format!("redis://{host}:{port}/0")
        });

        Self {
            primary: engine_spec("ENGINE_PRIMARY", "shashchess"),
            alternate: engine_spec("ENGINE_ALTERNATE", "alexander"),
            engine,
            redis_url,
            redis_timeout: secs("REDIS_TIMEOUT_SECS", 5),
        }
    }

    pub fn spec(&self, variant: Variant) -> &EngineSpec {
        match variant {
            Variant::Primary => &self.primary,
            Variant::Alternate => &self.alternate,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn engine_spec(prefix: &str, default_name: &str) -> EngineSpec {
    let path = env::var(format!("{prefix}_PATH")).unwrap_or_else(|_| {
        if cfg!(windows) {
            format!(".\\executables\\{default_name}.exe")
        } else {
            format!("./executables/{default_name}")
        }
    });
    let args = env::var(format!("{prefix}_ARGS"))
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    EngineSpec { path, args }
}
