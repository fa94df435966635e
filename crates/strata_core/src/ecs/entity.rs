//! # Entity Identity
//!
//! Entities are nominal: a 64-bit ID and nothing else. The ID is split into
//! a block (upper 32 bits) and a sequence within that block (lower 32 bits).
//!
//! ```text
//!   block  0                      template (engine-reserved)
//!   block  1 .. 2^31              volatile, issued by BlockIssuer
//!   block  2^31 .. 2^32           persisted, one contiguous 63-bit sequence
//! ```
//!
//! - Blocks below [`RESERVED_BLOCKS`] belong to the engine (templates).
//! - Blocks from [`FIRST_VOLATILE_BLOCK`] up to [`FIRST_PERSISTED_BLOCK`]
//!   are issued at runtime by a [`BlockIssuer`], one block per logical
//!   subsystem. Each subsystem owns an [`EntityAssigner`] over its block,
//!   so ID creation needs no synchronization on the hot path.
//! - Blocks from [`FIRST_PERSISTED_BLOCK`] upward hold durable identities,
//!   see [`EntityId::from_persisted_sequence`].

use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of low block numbers reserved for engine-internal entities.
pub const RESERVED_BLOCKS: u32 = 1;

/// First block a [`BlockIssuer`] hands out.
pub const FIRST_VOLATILE_BLOCK: u32 = RESERVED_BLOCKS;

/// First block of the persisted range. Volatile blocks stay below it.
pub const FIRST_PERSISTED_BLOCK: u32 = 1 << 31;

const PERSISTED_BASE: u64 = (FIRST_PERSISTED_BLOCK as u64) << 32;

/// Which of the disjoint ID ranges an entity belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Engine-reserved template entity.
    Template,
    /// Session entity with no durable row of its own.
    Volatile,
    /// Durable identity from the persisted sequence.
    Persisted,
}

/// Unique identifier for an entity.
///
/// - Upper 32 bits: block
/// - Lower 32 bits: sequence within the block
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID. Never issued by an assigner.
    pub const NULL: Self = Self(0);

    /// Creates an entity ID from block and sequence.
    #[inline]
    #[must_use]
    pub const fn new(block: u32, sequence: u32) -> Self {
        Self(((block as u64) << 32) | (sequence as u64))
    }

    /// Rebuilds an ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the block portion of the ID.
    #[inline]
    #[must_use]
    pub const fn block(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the sequence portion of the ID.
    #[inline]
    #[must_use]
    pub const fn sequence(self) -> u32 {
        self.0 as u32
    }

    /// Checks if this entity ID is null.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Builds the persisted ID for a durable sequence number.
    ///
    /// Sequence `n` maps to the `n`-th ID of the persisted range. Returns
    /// `None` for 0 and for sequences past the end of the range.
    #[inline]
    #[must_use]
    pub const fn from_persisted_sequence(sequence: u64) -> Option<Self> {
        if sequence == 0 {
            return None;
        }
        match PERSISTED_BASE.checked_add(sequence) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Durable sequence number of a persisted ID.
    #[inline]
    #[must_use]
    pub const fn persisted_sequence(self) -> Option<u64> {
        if self.is_persisted() {
            Some(self.0 - PERSISTED_BASE)
        } else {
            None
        }
    }

    /// Range this ID belongs to.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> EntityKind {
        let block = self.block();
        if block < RESERVED_BLOCKS {
            EntityKind::Template
        } else if block < FIRST_PERSISTED_BLOCK {
            EntityKind::Volatile
        } else {
            EntityKind::Persisted
        }
    }

    /// Checks if this ID lives in an engine-reserved block.
    #[inline]
    #[must_use]
    pub const fn is_template(self) -> bool {
        self.block() < RESERVED_BLOCKS
    }

    /// Checks if this ID lives in a runtime-issued block.
    #[inline]
    #[must_use]
    pub const fn is_volatile(self) -> bool {
        self.block() >= FIRST_VOLATILE_BLOCK && self.block() < FIRST_PERSISTED_BLOCK
    }

    /// Checks if this ID lives in the persisted range.
    #[inline]
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        self.block() >= FIRST_PERSISTED_BLOCK
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block(), self.sequence())
    }
}

/// Hands out volatile block numbers.
///
/// Safe for concurrent callers; every call returns a fresh block below
/// [`FIRST_PERSISTED_BLOCK`]. Lives for the process only, block numbers are
/// not persisted.
#[derive(Debug)]
pub struct BlockIssuer {
    next: AtomicU64,
}

impl BlockIssuer {
    /// Creates an issuer starting at the first volatile block.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(FIRST_VOLATILE_BLOCK)
    }

    /// Creates an issuer starting at `block`.
    #[must_use]
    pub fn starting_at(block: u32) -> Self {
        Self {
            next: AtomicU64::new(u64::from(block)),
        }
    }

    /// Issues the next block number.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BlocksExhausted`] once the volatile range is
    /// used up.
    pub fn issue(&self) -> CoreResult<u32> {
        let block = self.next.fetch_add(1, Ordering::Relaxed);
        match u32::try_from(block) {
            Ok(block) if block < FIRST_PERSISTED_BLOCK => Ok(block),
            _ => Err(CoreError::BlocksExhausted),
        }
    }

    /// Issues a block and wraps it in an assigner.
    ///
    /// # Errors
    ///
    /// Same as [`BlockIssuer::issue`].
    pub fn assigner(&self) -> CoreResult<EntityAssigner> {
        self.issue().map(EntityAssigner::new)
    }
}

impl Default for BlockIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential ID source over a single block.
///
/// Not shared: each subsystem owns its own assigner.
#[derive(Debug)]
pub struct EntityAssigner {
    block: u32,
    next: u32,
}

impl EntityAssigner {
    /// Creates an assigner over `block`. Sequences start at 1.
    #[must_use]
    pub const fn new(block: u32) -> Self {
        Self { block, next: 1 }
    }

    /// Creates an assigner for template entities.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotReserved`] if `block` is outside the
    /// reserved range.
    pub fn template(block: u32) -> CoreResult<Self> {
        if block >= RESERVED_BLOCKS {
            return Err(CoreError::NotReserved(block));
        }
        Ok(Self::new(block))
    }

    /// Returns the block this assigner draws from.
    #[inline]
    #[must_use]
    pub const fn block(&self) -> u32 {
        self.block
    }

    /// Returns the next ID in the block.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SequenceExhausted`] after the last sequence.
    pub fn next_id(&mut self) -> CoreResult<EntityId> {
        if self.next == 0 {
            return Err(CoreError::SequenceExhausted { block: self.block });
        }
        let id = EntityId::new(self.block, self.next);
        // Wraps to 0 after u32::MAX, which marks the block as spent.
        self.next = self.next.wrapping_add(1);
        Ok(id)
    }
}
