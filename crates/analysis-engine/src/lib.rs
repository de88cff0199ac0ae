//! Engine analysis core.
//!
//! Pools of UCI engine subprocesses per variant, a line codec for the UCI
//! protocol, a depth-aware result cache and the dispatcher that ties them
//! together for single positions and whole games.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod store;

pub use analysis::{AnalysisResult, MoveLine, Wdl};
pub use cache::{AnalysisCache, CacheStats};
pub use config::{AppConfig, EngineSettings, EngineSpec, Variant};
pub use dispatcher::{AnalysisRequest, CrossExamination, Dispatcher, GameInput, PositionAnalysis};
pub use error::{DispatchError, EngineError, StoreError};
pub use pool::{EnginePool, PoolStats};
pub use registry::EngineRegistry;
pub use store::{KvStore, MemoryStore, RedisStore};
