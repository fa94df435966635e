//! # Core Error Types
//!
//! Absent components and repeated removals are not errors; lookups return
//! `None` and removals return `false`.

use crate::ecs::ComponentTypeId;
use thiserror::Error;

/// Errors raised by the entity-component core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The block issuer handed out every block number.
    #[error("entity block space exhausted")]
    BlocksExhausted,

    /// An assigner ran out of sequence numbers in its block.
    #[error("entity sequence exhausted in block {block}")]
    SequenceExhausted {
        /// The exhausted block.
        block: u32,
    },

    /// A template assigner was requested over a dynamic block.
    #[error("block {0} is not a reserved block")]
    NotReserved(u32),

    /// Two collections were registered for the same component type.
    #[error("component type {id} ({name}) registered twice")]
    DuplicateComponent {
        /// The duplicated type id.
        id: ComponentTypeId,
        /// Name of the component type.
        name: &'static str,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
