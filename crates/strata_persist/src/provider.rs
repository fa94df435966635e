//! # Persistence Provider
//!
//! The seam to the database. A provider hands out persisted-ID ranges and
//! opens transactions; the synchronizer replays one back buffer per
//! transaction.
//!
//! ```text
//!   BEGIN
//!     INSERT entity ...          (new mappings)
//!     INSERT/UPDATE/DELETE row   (per component type, ascending type id)
//!     DELETE entity ...          (removed entities)
//!   COMMIT
//! ```

use crate::error::ProviderResult;
use crate::mapper::PersistedId;
use std::ops::Range;
use strata_core::ComponentTypeId;

/// A durable backend.
///
/// Called from the tick thread (`reserve_ids`, inside the strong-locked
/// flush) and from the writer (`begin`), so implementations must be
/// thread-safe.
pub trait PersistenceProvider: Send + Sync {
    /// Reserves `count` consecutive numbers from the durable sequence.
    ///
    /// Numbers start at 1; the mapper places them in the persisted block
    /// range.
    ///
    /// # Errors
    ///
    /// Fails if the sequence cannot be advanced.
    fn reserve_ids(&self, count: u32) -> ProviderResult<Range<u64>>;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Fails if the backend is unavailable.
    fn begin(&self) -> ProviderResult<Box<dyn Transaction + '_>>;
}

/// One database transaction.
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction {
    /// Inserts an entity row.
    ///
    /// # Errors
    ///
    /// Fails if the entity already exists.
    fn insert_entity(&mut self, entity: PersistedId) -> ProviderResult<()>;

    /// Deletes an entity row together with any component rows it still owns.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist.
    fn delete_entity(&mut self, entity: PersistedId) -> ProviderResult<()>;

    /// Inserts a component row.
    ///
    /// # Errors
    ///
    /// Fails if the entity is missing or the row already exists.
    fn add_component(&mut self, component: ComponentTypeId, entity: PersistedId, value: &[u8]) -> ProviderResult<()>;

    /// Replaces a component row.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist.
    fn modify_component(&mut self, component: ComponentTypeId, entity: PersistedId, value: &[u8]) -> ProviderResult<()>;

    /// Deletes a component row.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist.
    fn remove_component(&mut self, component: ComponentTypeId, entity: PersistedId) -> ProviderResult<()>;

    /// Makes every statement durable.
    ///
    /// # Errors
    ///
    /// Fails if the backend refuses the commit; nothing is applied then.
    fn commit(self: Box<Self>) -> ProviderResult<()>;

    /// Discards every statement.
    fn rollback(self: Box<Self>);
}
