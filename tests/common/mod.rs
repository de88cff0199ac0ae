#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use analysis_engine::{
    AnalysisCache, Dispatcher, EngineRegistry, EngineSettings, EngineSpec, MemoryStore,
};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Launch spec for the scripted fake engine in the given mode.
pub fn fake_engine(mode: &str) -> EngineSpec {
    let script = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_engine.sh");
    EngineSpec::new("sh").with_args([script, mode])
}

/// Launch spec for a binary that does not exist.
pub fn missing_engine() -> EngineSpec {
    EngineSpec::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/no-such-engine"))
}

/// Short timeouts so tests that wait on them finish quickly.
pub fn settings(pool_size: usize) -> EngineSettings {
    EngineSettings {
        pool_size,
        threads: 1,
        hash_mb: 16,
        lease_timeout: Duration::from_millis(200),
        analysis_timeout: Duration::from_secs(5),
        reset_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_secs(5),
        quit_grace: Duration::from_millis(500),
    }
}

/// Dispatcher over fake engines in `mode` for both variants, with an
/// in-memory cache.
pub fn dispatcher(mode: &str, engine: EngineSettings) -> (Dispatcher, Arc<MemoryStore>) {
    let registry = EngineRegistry::new(fake_engine(mode), fake_engine(mode), engine);
    let store = Arc::new(MemoryStore::new());
    let cache = AnalysisCache::new(store.clone());
    (Dispatcher::new(Arc::new(registry), Arc::new(cache)), store)
}
