//! # Entity Mapper
//!
//! Lazily maps volatile (in-memory) entity IDs to persisted IDs. A mapping
//! is created the first time one of the entity's changes must be written,
//! and dropped when the entity is removed or unloaded.
//!
//! Persisted IDs come from the provider's durable sequence in ranges, so the
//! flush touches the sequence once per `id_reservation` new entities.
//!
//! Not thread-safe by itself: the synchronizer only uses it from inside the
//! strong-locked flush.

use crate::error::{ProviderError, ProviderResult};
use crate::provider::PersistenceProvider;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use strata_core::{ComponentTypeId, EntityId};

/// Durable identity of an entity.
///
/// Always an [`EntityId`] in the persisted block range, so it can never
/// collide with a template or volatile ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PersistedId(EntityId);

impl PersistedId {
    /// Wraps the `sequence`-th persisted ID. `None` outside the range.
    #[inline]
    #[must_use]
    pub const fn from_sequence(sequence: u64) -> Option<Self> {
        match EntityId::from_persisted_sequence(sequence) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Position in the durable sequence.
    #[inline]
    #[must_use]
    pub fn sequence(self) -> u64 {
        self.0.persisted_sequence().unwrap_or_default()
    }

    /// The entity ID in the persisted range.
    #[inline]
    #[must_use]
    pub const fn entity(self) -> EntityId {
        self.0
    }
}

impl TryFrom<EntityId> for PersistedId {
    type Error = EntityId;

    fn try_from(id: EntityId) -> Result<Self, Self::Error> {
        if id.is_persisted() {
            Ok(Self(id))
        } else {
            Err(id)
        }
    }
}

impl From<PersistedId> for EntityId {
    fn from(id: PersistedId) -> Self {
        id.0
    }
}

impl std::fmt::Display for PersistedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.sequence())
    }
}

/// Volatile-to-persisted ID cache.
pub struct EntityMapper {
    provider: Arc<dyn PersistenceProvider>,
    reservation: u32,
    reserved: Range<u64>,
    ids: HashMap<EntityId, PersistedId>,
    /// Components dropped from memory whose durable rows remain.
    offloaded: HashMap<EntityId, Vec<ComponentTypeId>>,
}

impl EntityMapper {
    /// Creates an empty mapper drawing `reservation` IDs per sequence query.
    #[must_use]
    pub fn new(provider: Arc<dyn PersistenceProvider>, reservation: u32) -> Self {
        Self {
            provider,
            reservation: reservation.max(1),
            reserved: 0..0,
            ids: HashMap::new(),
            offloaded: HashMap::new(),
        }
    }

    /// Returns the entity's persisted ID, creating the mapping if needed.
    ///
    /// `created` is `true` when the mapping is new, in which case the caller
    /// must insert the entity row before any component row.
    ///
    /// # Errors
    ///
    /// Propagates a failed sequence query.
    pub fn get_persisted_id(&mut self, volatile: EntityId) -> ProviderResult<(PersistedId, bool)> {
        if let Some(&id) = self.ids.get(&volatile) {
            return Ok((id, false));
        }

        let id = self.next_id()?;
        self.ids.insert(volatile, id);
        Ok((id, true))
    }

    /// Returns the entity's persisted ID without creating one.
    #[inline]
    #[must_use]
    pub fn lookup(&self, volatile: EntityId) -> Option<PersistedId> {
        self.ids.get(&volatile).copied()
    }

    /// Drops the mapping. Durable state is untouched.
    pub fn unload_id(&mut self, volatile: EntityId) -> Option<PersistedId> {
        self.offloaded.remove(&volatile);
        self.ids.remove(&volatile)
    }

    /// Remembers that `component` left memory while its row stayed.
    pub fn note_offloaded(&mut self, volatile: EntityId, component: ComponentTypeId) {
        if !self.ids.contains_key(&volatile) {
            return;
        }
        let components = self.offloaded.entry(volatile).or_default();
        if !components.contains(&component) {
            components.push(component);
        }
    }

    /// Forgets an offloaded component, returning `true` if its row exists.
    pub fn take_offloaded(&mut self, volatile: EntityId, component: ComponentTypeId) -> bool {
        let Some(components) = self.offloaded.get_mut(&volatile) else {
            return false;
        };
        let Some(pos) = components.iter().position(|&c| c == component) else {
            return false;
        };
        components.swap_remove(pos);
        if components.is_empty() {
            self.offloaded.remove(&volatile);
        }
        true
    }

    /// Number of live mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn next_id(&mut self) -> ProviderResult<PersistedId> {
        if self.reserved.is_empty() {
            self.reserved = self.provider.reserve_ids(self.reservation)?;
            if self.reserved.is_empty() {
                return Err(ProviderError::SequenceExhausted);
            }
            tracing::trace!(
                start = self.reserved.start,
                end = self.reserved.end,
                "reserved persisted ids"
            );
        }
        let sequence = self.reserved.start;
        self.reserved.start += 1;
        PersistedId::from_sequence(sequence).ok_or(ProviderError::SequenceExhausted)
    }
}

impl std::fmt::Debug for EntityMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMapper")
            .field("mapped", &self.ids.len())
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}
