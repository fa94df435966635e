//! # Persistence Error Types

use crate::mapper::PersistedId;
use strata_core::ComponentTypeId;
use thiserror::Error;

/// Errors raised by a persistence backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The persisted-ID sequence cannot satisfy a reservation.
    #[error("persisted id sequence exhausted")]
    SequenceExhausted,

    /// An entity row was inserted twice.
    #[error("entity {0} already exists")]
    DuplicateEntity(PersistedId),

    /// A statement referenced an entity row that does not exist.
    #[error("entity {0} does not exist")]
    MissingEntity(PersistedId),

    /// A component add hit an existing row.
    #[error("component {component} already exists on entity {entity}")]
    DuplicateComponent {
        /// Component type of the row.
        component: ComponentTypeId,
        /// Owning entity.
        entity: PersistedId,
    },

    /// A component modify or remove found no row.
    #[error("component {component} does not exist on entity {entity}")]
    MissingComponent {
        /// Component type of the row.
        component: ComponentTypeId,
        /// Owning entity.
        entity: PersistedId,
    },

    /// The backend refused to commit.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by the state synchronizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The backend failed; synchronization is halted.
    #[error("synchronization failed in cycle {cycle}: {source}")]
    Provider {
        /// Cycle whose transaction failed (0 while recording).
        cycle: u64,
        /// Backend error.
        #[source]
        source: ProviderError,
    },

    /// An earlier cycle failed; nothing more is accepted.
    #[error("synchronizer halted after a failed cycle")]
    Halted,

    /// The writer is gone.
    #[error("synchronizer writer disconnected")]
    Disconnected,

    /// The writer task panicked or was cancelled.
    #[error("synchronizer writer aborted: {0}")]
    WriterAborted(String),

    /// A configuration file could not be parsed.
    #[error("invalid sync configuration: {0}")]
    Config(String),
}

/// Result type for synchronizer operations.
pub type SyncResult<T> = Result<T, SyncError>;
