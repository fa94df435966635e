//! # Update Buffer
//!
//! One side of the double buffer: everything a single transaction writes.
//! Buffers are cleared and reused, keeping their allocations.

use crate::error::ProviderResult;
use crate::mapper::PersistedId;
use crate::provider::Transaction;
use std::collections::BTreeMap;
use strata_core::{ComponentTypeId, UpdateKind};

/// One component row change, keyed by persisted ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowUpdate {
    /// Owning entity.
    pub entity: PersistedId,
    /// What happened to the row.
    pub kind: UpdateKind,
    /// Byte image of the value.
    pub value: Vec<u8>,
}

/// Pending statements of one synchronization cycle.
#[derive(Debug, Default)]
pub struct UpdateBuffer {
    cycle: u64,
    inserted: Vec<PersistedId>,
    rows: BTreeMap<ComponentTypeId, Vec<RowUpdate>>,
    deleted: Vec<PersistedId>,
}

impl UpdateBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cycle this buffer was committed as (0 while it is the front buffer).
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn set_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Queues an entity insert.
    pub fn insert_entity(&mut self, entity: PersistedId) {
        self.inserted.push(entity);
    }

    /// Queues an entity delete.
    pub fn delete_entity(&mut self, entity: PersistedId) {
        self.deleted.push(entity);
    }

    /// Appends a component row change.
    pub fn record(&mut self, component: ComponentTypeId, row: RowUpdate) {
        self.rows.entry(component).or_default().push(row);
    }

    /// Number of queued component rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    /// Number of queued entity inserts.
    #[must_use]
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    /// Number of queued entity deletes.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Returns `true` if the buffer would write nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.rows.values().all(Vec::is_empty)
    }

    /// Empties the buffer for reuse.
    pub fn clear(&mut self) {
        self.cycle = 0;
        self.inserted.clear();
        self.deleted.clear();
        for rows in self.rows.values_mut() {
            rows.clear();
        }
    }

    /// Replays the buffer into `tx`: entity inserts, then component rows by
    /// ascending type id, then entity deletes.
    ///
    /// # Errors
    ///
    /// Stops at the first failed statement.
    pub fn apply(&self, tx: &mut dyn Transaction) -> ProviderResult<()> {
        for &entity in &self.inserted {
            tx.insert_entity(entity)?;
        }

        for (&component, rows) in &self.rows {
            for row in rows {
                match row.kind {
                    UpdateKind::Add => tx.add_component(component, row.entity, &row.value)?,
                    UpdateKind::Modify => tx.modify_component(component, row.entity, &row.value)?,
                    UpdateKind::Remove => tx.remove_component(component, row.entity)?,
                }
            }
        }

        for &entity in &self.deleted {
            tx.delete_entity(entity)?;
        }
        Ok(())
    }
}
