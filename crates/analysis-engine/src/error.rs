//! Error types for the analysis engine layers

use thiserror::Error;

/// Failures of a single engine subprocess.
///
/// These never reach dispatcher callers: the pool replaces or discards the
/// process and the request degrades to an empty result.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine: {0}")]
    Spawn(String),

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine process exited")]
    Exited,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Failures of the cache backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt cache payload: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors visible to dispatcher callers.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("Invalid game: {0}")]
    InvalidGame(#[from] chess_core::ChessError),

    #[error("Engine pool for {0} is shutting down")]
    ShuttingDown(crate::config::Variant),
}
