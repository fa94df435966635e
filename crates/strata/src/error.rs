//! # Engine Error Types

use strata_core::CoreError;
use strata_persist::SyncError;
use thiserror::Error;

/// Errors raised by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Entity-component store error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// State synchronization error. Fatal for the running world.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
