//! # In-Memory Provider
//!
//! A [`PersistenceProvider`] backed by two tables in process memory, with
//! the integrity checks of a relational schema:
//!
//! - component rows reference an existing entity row
//! - adds need an absent row; modifies and removes need a present one
//! - deleting an entity cascades to its remaining component rows
//!
//! Statements apply immediately under the table lock and are undone on
//! rollback. Committed statements are kept in a journal for inspection.

use crate::error::{ProviderError, ProviderResult};
use crate::mapper::PersistedId;
use crate::provider::{PersistenceProvider, Transaction};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strata_core::{Component, ComponentTypeId};

/// A committed statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    /// Entity row inserted.
    InsertEntity(PersistedId),
    /// Entity row deleted.
    DeleteEntity(PersistedId),
    /// Component row inserted.
    AddComponent {
        /// Component type.
        component: ComponentTypeId,
        /// Owning entity.
        entity: PersistedId,
        /// Stored bytes.
        value: Vec<u8>,
    },
    /// Component row replaced.
    ModifyComponent {
        /// Component type.
        component: ComponentTypeId,
        /// Owning entity.
        entity: PersistedId,
        /// Stored bytes.
        value: Vec<u8>,
    },
    /// Component row deleted.
    RemoveComponent {
        /// Component type.
        component: ComponentTypeId,
        /// Owning entity.
        entity: PersistedId,
    },
}

type RowKey = (PersistedId, ComponentTypeId);

#[derive(Default)]
struct Tables {
    entities: BTreeSet<PersistedId>,
    rows: BTreeMap<RowKey, Vec<u8>>,
    journal: Vec<Statement>,
    commits: u64,
}

/// Inverse of one applied statement.
enum Undo {
    EntityInserted(PersistedId),
    EntityDeleted(PersistedId, Vec<(RowKey, Vec<u8>)>),
    RowInserted(RowKey),
    RowReplaced(RowKey, Vec<u8>),
    RowDeleted(RowKey, Vec<u8>),
}

/// In-process database.
pub struct MemoryProvider {
    tables: Mutex<Tables>,
    next_id: Mutex<u64>,
    reservations: AtomicUsize,
    fail_commits: AtomicBool,
}

impl MemoryProvider {
    /// Creates an empty database. The ID sequence starts at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: Mutex::new(1),
            reservations: AtomicUsize::new(0),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Makes every following commit fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Returns `true` if the entity row exists.
    #[must_use]
    pub fn entity_exists(&self, entity: PersistedId) -> bool {
        self.tables.lock().entities.contains(&entity)
    }

    /// Stored bytes of a component row.
    #[must_use]
    pub fn component_bytes(&self, component: ComponentTypeId, entity: PersistedId) -> Option<Vec<u8>> {
        self.tables.lock().rows.get(&(entity, component)).cloned()
    }

    /// Decoded value of a component row.
    #[must_use]
    pub fn component<T: Component>(&self, entity: PersistedId) -> Option<T> {
        let tables = self.tables.lock();
        let bytes = tables.rows.get(&(entity, T::ID))?;
        if bytes.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Number of entity rows.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.tables.lock().entities.len()
    }

    /// Number of component rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.lock().rows.len()
    }

    /// Every committed statement, in commit order.
    #[must_use]
    pub fn journal(&self) -> Vec<Statement> {
        self.tables.lock().journal.clone()
    }

    /// Number of committed transactions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.tables.lock().commits
    }

    /// Number of sequence queries served.
    #[must_use]
    pub fn reservations(&self) -> usize {
        self.reservations.load(Ordering::Relaxed)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("MemoryProvider")
            .field("entities", &tables.entities.len())
            .field("rows", &tables.rows.len())
            .field("commits", &tables.commits)
            .finish_non_exhaustive()
    }
}

impl PersistenceProvider for MemoryProvider {
    fn reserve_ids(&self, count: u32) -> ProviderResult<Range<u64>> {
        let mut next = self.next_id.lock();
        let start = *next;
        let end = start
            .checked_add(u64::from(count))
            .ok_or(ProviderError::SequenceExhausted)?;
        *next = end;
        self.reservations.fetch_add(1, Ordering::Relaxed);
        Ok(start..end)
    }

    fn begin(&self) -> ProviderResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.lock(),
            undo: Vec::new(),
            statements: Vec::new(),
            fail: self.fail_commits.load(Ordering::SeqCst),
            finished: false,
        }))
    }
}

/// Transaction holding the table lock until it finishes.
struct MemoryTransaction<'a> {
    tables: MutexGuard<'a, Tables>,
    undo: Vec<Undo>,
    statements: Vec<Statement>,
    fail: bool,
    finished: bool,
}

impl MemoryTransaction<'_> {
    fn require_entity(&self, entity: PersistedId) -> ProviderResult<()> {
        if self.tables.entities.contains(&entity) {
            Ok(())
        } else {
            Err(ProviderError::MissingEntity(entity))
        }
    }

    fn undo_all(&mut self) {
        while let Some(undo) = self.undo.pop() {
            let tables = &mut *self.tables;
            match undo {
                Undo::EntityInserted(entity) => {
                    tables.entities.remove(&entity);
                }
                Undo::EntityDeleted(entity, rows) => {
                    tables.entities.insert(entity);
                    tables.rows.extend(rows);
                }
                Undo::RowInserted(key) => {
                    tables.rows.remove(&key);
                }
                Undo::RowReplaced(key, old) | Undo::RowDeleted(key, old) => {
                    tables.rows.insert(key, old);
                }
            }
        }
        self.statements.clear();
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn insert_entity(&mut self, entity: PersistedId) -> ProviderResult<()> {
        if !self.tables.entities.insert(entity) {
            return Err(ProviderError::DuplicateEntity(entity));
        }
        self.undo.push(Undo::EntityInserted(entity));
        self.statements.push(Statement::InsertEntity(entity));
        Ok(())
    }

    fn delete_entity(&mut self, entity: PersistedId) -> ProviderResult<()> {
        if !self.tables.entities.remove(&entity) {
            return Err(ProviderError::MissingEntity(entity));
        }
        let keys: Vec<RowKey> = self
            .tables
            .rows
            .range((entity, ComponentTypeId(0))..=(entity, ComponentTypeId(u16::MAX)))
            .map(|(key, _)| *key)
            .collect();
        let cascaded = keys
            .into_iter()
            .filter_map(|key| self.tables.rows.remove(&key).map(|value| (key, value)))
            .collect();
        self.undo.push(Undo::EntityDeleted(entity, cascaded));
        self.statements.push(Statement::DeleteEntity(entity));
        Ok(())
    }

    fn add_component(&mut self, component: ComponentTypeId, entity: PersistedId, value: &[u8]) -> ProviderResult<()> {
        self.require_entity(entity)?;
        let key = (entity, component);
        if self.tables.rows.contains_key(&key) {
            return Err(ProviderError::DuplicateComponent { component, entity });
        }
        self.tables.rows.insert(key, value.to_vec());
        self.undo.push(Undo::RowInserted(key));
        self.statements.push(Statement::AddComponent {
            component,
            entity,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn modify_component(&mut self, component: ComponentTypeId, entity: PersistedId, value: &[u8]) -> ProviderResult<()> {
        let key = (entity, component);
        let Some(slot) = self.tables.rows.get_mut(&key) else {
            return Err(ProviderError::MissingComponent { component, entity });
        };
        let old = std::mem::replace(slot, value.to_vec());
        self.undo.push(Undo::RowReplaced(key, old));
        self.statements.push(Statement::ModifyComponent {
            component,
            entity,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn remove_component(&mut self, component: ComponentTypeId, entity: PersistedId) -> ProviderResult<()> {
        let key = (entity, component);
        let Some(old) = self.tables.rows.remove(&key) else {
            return Err(ProviderError::MissingComponent { component, entity });
        };
        self.undo.push(Undo::RowDeleted(key, old));
        self.statements.push(Statement::RemoveComponent { component, entity });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> ProviderResult<()> {
        if self.fail {
            self.undo_all();
            self.finished = true;
            return Err(ProviderError::CommitFailed("injected failure".into()));
        }
        let statements = std::mem::take(&mut self.statements);
        self.tables.journal.extend(statements);
        self.tables.commits += 1;
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) {
        self.undo_all();
        self.finished = true;
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Material;

    const M: ComponentTypeId = ComponentTypeId(1);

    fn pid(sequence: u64) -> PersistedId {
        PersistedId::from_sequence(sequence).unwrap()
    }

    #[test]
    fn test_commit_applies_and_journals() {
        let db = MemoryProvider::new();
        let mut tx = db.begin().unwrap();
        tx.insert_entity(pid(1)).unwrap();
        tx.add_component(M, pid(1), bytemuck::bytes_of(&Material::new(7)))
            .unwrap();
        tx.commit().unwrap();

        assert!(db.entity_exists(pid(1)));
        assert_eq!(db.component::<Material>(pid(1)), Some(Material::new(7)));
        assert_eq!(db.commits(), 1);
        assert_eq!(db.journal().len(), 2);
    }

    #[test]
    fn test_integrity_checks() {
        let db = MemoryProvider::new();
        let mut tx = db.begin().unwrap();

        assert_eq!(
            tx.add_component(M, pid(9), &[0, 0]),
            Err(ProviderError::MissingEntity(pid(9)))
        );
        tx.insert_entity(pid(9)).unwrap();
        assert_eq!(
            tx.insert_entity(pid(9)),
            Err(ProviderError::DuplicateEntity(pid(9)))
        );
        assert_eq!(
            tx.modify_component(M, pid(9), &[0, 0]),
            Err(ProviderError::MissingComponent {
                component: M,
                entity: pid(9)
            })
        );
        tx.add_component(M, pid(9), &[0, 0]).unwrap();
        assert!(tx.add_component(M, pid(9), &[0, 0]).is_err());
    }

    #[test]
    fn test_rollback_and_drop_undo_everything() {
        let db = MemoryProvider::new();
        {
            let mut tx = db.begin().unwrap();
            tx.insert_entity(pid(1)).unwrap();
            tx.add_component(M, pid(1), &[1, 0]).unwrap();
            tx.commit().unwrap();
        }

        let mut tx = db.begin().unwrap();
        tx.modify_component(M, pid(1), &[2, 0]).unwrap();
        tx.delete_entity(pid(1)).unwrap();
        tx.rollback();
        assert_eq!(db.component_bytes(M, pid(1)), Some(vec![1, 0]));

        {
            let mut tx = db.begin().unwrap();
            tx.remove_component(M, pid(1)).unwrap();
        }
        assert_eq!(db.row_count(), 1);
        assert_eq!(db.journal().len(), 2);
    }

    #[test]
    fn test_delete_cascades_rows() {
        let db = MemoryProvider::new();
        let mut tx = db.begin().unwrap();
        tx.insert_entity(pid(1)).unwrap();
        tx.add_component(M, pid(1), &[1, 0]).unwrap();
        tx.add_component(ComponentTypeId(3), pid(1), &[0; 8]).unwrap();
        tx.delete_entity(pid(1)).unwrap();
        tx.commit().unwrap();

        assert_eq!(db.entity_count(), 0);
        assert_eq!(db.row_count(), 0);
    }

    #[test]
    fn test_injected_commit_failure() {
        let db = MemoryProvider::new();
        db.fail_commits(true);

        let mut tx = db.begin().unwrap();
        tx.insert_entity(pid(1)).unwrap();
        assert!(matches!(tx.commit(), Err(ProviderError::CommitFailed(_))));
        assert!(!db.entity_exists(pid(1)));
        assert_eq!(db.commits(), 0);
    }

    #[test]
    fn test_sequence_reservation() {
        let db = MemoryProvider::new();
        assert_eq!(db.reserve_ids(4).unwrap(), 1..5);
        assert_eq!(db.reserve_ids(2).unwrap(), 5..7);
        assert_eq!(db.reservations(), 2);
    }
}
