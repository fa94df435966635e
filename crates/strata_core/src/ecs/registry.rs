//! # Component Registry
//!
//! Owns the list of live collections and drives the per-tick flush.
//!
//! ```text
//!   Idle ──> weak-locked mutation window (many systems)
//!        ──> FlushRequested (strong pending, new weak blocks)
//!        ──> Draining (existing weak holders finish)
//!        ──> Flushing (collections commit in registration order,
//!                      entity notifier dispatches)
//!        ──> Idle
//! ```

use super::collection::ComponentCollection;
use super::component::{Component, ComponentTypeId};
use super::entity::EntityId;
use super::notifier::EntityNotifier;
use super::sink::StateSink;
use crate::error::{CoreError, CoreResult};
use crate::sync::{ConcurrencyGuard, StrongLock, WeakLock};
use std::ops::AddAssign;
use std::sync::Arc;

/// Commit half of a collection, driven once per tick.
pub trait PendingUpdater: Send + Sync {
    /// Component type this collection stores.
    fn component_id(&self) -> ComponentTypeId;

    /// Component type name, for logs.
    fn component_name(&self) -> &'static str;

    /// Commits pending changes under the strong lock.
    fn flush_pending(&self, lock: &StrongLock<'_>, sink: &mut dyn StateSink) -> FlushReport;

    /// Returns `true` if the next flush has work to do.
    fn has_pending(&self) -> bool;
}

/// Removal half of a collection, driven on demand.
pub trait EntityRemover: Send + Sync {
    /// Deletes the entity's component. Returns `true` if one was present.
    fn remove_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool;

    /// Drops the entity's component from memory. Returns `true` if one was
    /// present.
    fn unload_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool;
}

/// Outcome of a flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Add events fired.
    pub added: usize,
    /// Modify events fired.
    pub modified: usize,
    /// Remove events fired.
    pub removed: usize,
    /// Component unloads committed.
    pub unloaded: usize,
    /// Entity-level removals dispatched.
    pub entities_removed: usize,
    /// Entity-level unloads dispatched.
    pub entities_unloaded: usize,
}

impl FlushReport {
    /// Returns `true` if the flush committed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Total component events.
    #[must_use]
    pub fn component_changes(&self) -> usize {
        self.added + self.modified + self.removed + self.unloaded
    }
}

impl AddAssign for FlushReport {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.modified += other.modified;
        self.removed += other.removed;
        self.unloaded += other.unloaded;
        self.entities_removed += other.entities_removed;
        self.entities_unloaded += other.entities_unloaded;
    }
}

/// Aggregates every collection and the entity notifier.
///
/// Registration happens at startup through `&mut self`; once shared the
/// registry is read-only.
pub struct ComponentRegistry {
    guard: Arc<ConcurrencyGuard>,
    notifier: Arc<EntityNotifier>,
    updaters: Vec<Arc<dyn PendingUpdater>>,
    removers: Vec<Arc<dyn EntityRemover>>,
}

impl ComponentRegistry {
    /// Creates an empty registry over `guard`.
    ///
    /// `notifier` must be bound to the same guard.
    #[must_use]
    pub fn new(guard: Arc<ConcurrencyGuard>, notifier: Arc<EntityNotifier>) -> Self {
        debug_assert!(
            Arc::ptr_eq(notifier.guard(), &guard),
            "entity notifier uses a different guard than the registry"
        );
        Self {
            guard,
            notifier,
            updaters: Vec::new(),
            removers: Vec::new(),
        }
    }

    /// Returns the shared guard.
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &Arc<ConcurrencyGuard> {
        &self.guard
    }

    /// Returns the entity notifier.
    #[inline]
    #[must_use]
    pub fn notifier(&self) -> &Arc<EntityNotifier> {
        &self.notifier
    }

    /// Adds a collection to the flush. Flushes run in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateComponent`] if the type is already
    /// registered.
    pub fn register_collection(&mut self, updater: Arc<dyn PendingUpdater>) -> CoreResult<()> {
        let id = updater.component_id();
        if self.updaters.iter().any(|u| u.component_id() == id) {
            return Err(CoreError::DuplicateComponent {
                id,
                name: updater.component_name(),
            });
        }
        self.updaters.push(updater);
        Ok(())
    }

    /// Adds a collection to entity removal fan-out.
    pub fn register_remover(&mut self, remover: Arc<dyn EntityRemover>) {
        self.removers.push(remover);
    }

    /// Registers a typed collection in both roles.
    ///
    /// # Errors
    ///
    /// Same as [`register_collection`](Self::register_collection).
    pub fn register<T: Component>(&mut self, collection: &Arc<ComponentCollection<T>>) -> CoreResult<()> {
        debug_assert!(
            Arc::ptr_eq(collection.guard(), &self.guard),
            "{} uses a different guard than the registry",
            T::NAME
        );
        self.register_collection(Arc::clone(collection) as Arc<dyn PendingUpdater>)?;
        self.register_remover(Arc::clone(collection) as Arc<dyn EntityRemover>);
        Ok(())
    }

    /// Number of registered collections.
    #[must_use]
    pub fn collection_count(&self) -> usize {
        self.updaters.len()
    }

    /// Acquires the strong lock and commits everything pending.
    pub fn flush_all_pending(&self, sink: &mut dyn StateSink) -> FlushReport {
        let strong = self.guard.strong();
        self.flush_locked(&strong, sink)
    }

    /// Commits everything pending under a strong lock the caller holds.
    ///
    /// Collections flush first, then the entity notifier dispatches, so
    /// component removals reach the sink before their entity's removal.
    pub fn flush_locked(&self, lock: &StrongLock<'_>, sink: &mut dyn StateSink) -> FlushReport {
        debug_assert!(lock.belongs_to(&self.guard), "registry flushed under a foreign strong lock");

        let mut report = FlushReport::default();
        for updater in &self.updaters {
            let part = updater.flush_pending(lock, sink);
            if part.component_changes() > 0 {
                tracing::trace!(
                    component = updater.component_name(),
                    added = part.added,
                    modified = part.modified,
                    removed = part.removed,
                    unloaded = part.unloaded,
                    "component flush"
                );
            }
            report += part;
        }

        report += self.notifier.dispatch(lock, sink);

        if !report.is_empty() {
            tracing::debug!(
                epoch = lock.epoch(),
                changes = report.component_changes(),
                entities_removed = report.entities_removed,
                entities_unloaded = report.entities_unloaded,
                "flushed pending updates"
            );
        }
        report
    }

    /// Deletes the entity from every collection and queues its removal
    /// event for the next flush.
    ///
    /// Returns the number of components removed.
    pub fn remove_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> usize {
        let removed = self
            .removers
            .iter()
            .filter(|remover| remover.remove_entity(lock, entity))
            .count();
        self.notifier.enqueue_remove(entity);
        removed
    }

    /// Drops the entity from every collection, keeping its durable identity,
    /// and queues its unload event for the next flush.
    ///
    /// Returns the number of components unloaded.
    pub fn unload_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> usize {
        let unloaded = self
            .removers
            .iter()
            .filter(|remover| remover.unload_entity(lock, entity))
            .count();
        self.notifier.enqueue_unload(entity);
        unloaded
    }

    /// Returns `true` if the next flush has work to do.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.notifier.has_pending() || self.updaters.iter().any(|u| u.has_pending())
    }
}
