//! # Component Collection
//!
//! Sparse-set storage for one component type.
//!
//! ```text
//!   entity ──index──> [ slot ] ──values──> T
//!                     [ slot ] <──owners── entity
//!   free: slots waiting for reuse (never shrinks `values`)
//! ```
//!
//! Writes land in the dense array immediately, so `get` always sees the
//! latest value. What is deferred is the *notification*: each write is
//! folded into a per-entity pending change that the strong-locked flush
//! turns into exactly one event (last write wins).

use super::component::Component;
use super::entity::EntityId;
use super::observer::{ComponentObserver, DispatchMarker, SubscriptionId};
use super::registry::{EntityRemover, FlushReport, PendingUpdater};
use super::sink::{StateSink, StateUpdate, UpdateKind};
use super::ComponentTypeId;
use crate::sync::{ConcurrencyGuard, StrongLock, WeakLock};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Net change of one entity since the last flush.
#[derive(Clone, Copy, Debug)]
enum Pending<T> {
    Added,
    Modified,
    Removed(T),
    Unloaded {
        last: T,
        unsaved: Option<UpdateKind>,
    },
}

/// A pending change resolved at flush time.
enum Committed<T> {
    Add(T),
    Modify(T),
    Remove(T),
    Unload {
        last: T,
        unsaved: Option<UpdateKind>,
    },
}

/// Per-tick change log, first-touch ordered.
struct PendingLog<T> {
    order: Vec<EntityId>,
    changes: HashMap<EntityId, Pending<T>>,
}

impl<T: Copy> PendingLog<T> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            changes: HashMap::new(),
        }
    }

    fn put(&mut self, entity: EntityId, change: Pending<T>) {
        if self.changes.insert(entity, change).is_none() {
            self.order.push(entity);
        }
    }

    fn note_set(&mut self, entity: EntityId, created: bool) {
        let next = match self.changes.get(&entity).copied() {
            None if created => Pending::Added,
            None | Some(Pending::Modified | Pending::Removed(_)) => Pending::Modified,
            Some(Pending::Added) => Pending::Added,
            Some(Pending::Unloaded { unsaved, .. }) => {
                if unsaved == Some(UpdateKind::Add) {
                    Pending::Added
                } else {
                    Pending::Modified
                }
            }
        };
        self.put(entity, next);
    }

    fn note_remove(&mut self, entity: EntityId, last: T) {
        match self.changes.get(&entity) {
            // Never observed, never persisted: nothing happened.
            Some(Pending::Added) => {
                self.changes.remove(&entity);
            }
            _ => self.put(entity, Pending::Removed(last)),
        }
    }

    fn note_unload(&mut self, entity: EntityId, last: T) {
        let unsaved = match self.changes.get(&entity) {
            Some(Pending::Added) => Some(UpdateKind::Add),
            Some(Pending::Modified) => Some(UpdateKind::Modify),
            _ => None,
        };
        self.put(entity, Pending::Unloaded { last, unsaved });
    }

    fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Dense values plus the bidirectional entity/slot maps.
struct Slots<T> {
    values: Vec<T>,
    owners: Vec<Option<EntityId>>,
    index: HashMap<EntityId, usize>,
    free: VecDeque<usize>,
    pending: PendingLog<T>,
}

impl<T: Component> Slots<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            owners: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: VecDeque::new(),
            pending: PendingLog::new(),
        }
    }

    fn get(&self, entity: EntityId) -> Option<T> {
        self.index.get(&entity).map(|&slot| self.values[slot])
    }

    /// Writes the value, returning `true` if a slot had to be allocated.
    fn write(&mut self, entity: EntityId, value: T) -> bool {
        if let Some(&slot) = self.index.get(&entity) {
            self.values[slot] = value;
            return false;
        }

        let slot = if let Some(slot) = self.free.pop_front() {
            self.values[slot] = value;
            self.owners[slot] = Some(entity);
            slot
        } else {
            self.values.push(value);
            self.owners.push(Some(entity));
            self.values.len() - 1
        };
        self.index.insert(entity, slot);
        true
    }

    /// Frees the entity's slot, returning the value it held.
    fn take(&mut self, entity: EntityId) -> Option<T> {
        let slot = self.index.remove(&entity)?;
        self.owners[slot] = None;
        let value = std::mem::replace(&mut self.values[slot], <T as bytemuck::Zeroable>::zeroed());
        self.free.push_back(slot);
        Some(value)
    }

    fn set(&mut self, entity: EntityId, value: T) {
        let created = self.write(entity, value);
        self.pending.note_set(entity, created);
    }

    fn drain_pending(&mut self) -> Vec<(EntityId, Committed<T>)> {
        let order = std::mem::take(&mut self.pending.order);
        let mut committed = Vec::with_capacity(self.pending.changes.len());

        for entity in order {
            let Some(change) = self.pending.changes.remove(&entity) else {
                continue;
            };
            let resolved = match change {
                Pending::Added => self.get(entity).map(Committed::Add),
                Pending::Modified => self.get(entity).map(Committed::Modify),
                Pending::Removed(last) => Some(Committed::Remove(last)),
                Pending::Unloaded { last, unsaved } => Some(Committed::Unload { last, unsaved }),
            };
            debug_assert!(resolved.is_some(), "pending write for {entity} without a slot");
            if let Some(resolved) = resolved {
                committed.push((entity, resolved));
            }
        }

        committed
    }
}

/// Sparse store of one component type.
///
/// # Locking contract
///
/// - `set`, `remove`, `unload` take a [`WeakLock`] on the collection's guard.
/// - `flush` takes the [`StrongLock`] and is called by the registry.
/// - `get`, `exists` and iteration need no lock.
///
/// # Example
///
/// ```rust,ignore
/// let guard = Arc::new(ConcurrencyGuard::new());
/// let materials = ComponentCollection::<Material>::new(Arc::clone(&guard));
///
/// let weak = guard.weak();
/// materials.set(&weak, entity, Material::new(7));
/// assert_eq!(materials.get(entity), Some(Material::new(7)));
/// ```
pub struct ComponentCollection<T: Component> {
    guard: Arc<ConcurrencyGuard>,
    slots: RwLock<Slots<T>>,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ComponentObserver<T>>)>>,
    next_subscription: AtomicU64,
    /// Thread currently running observer callbacks.
    dispatcher: DispatchMarker,
}

impl<T: Component> ComponentCollection<T> {
    /// Creates an empty collection bound to `guard`.
    #[must_use]
    pub fn new(guard: Arc<ConcurrencyGuard>) -> Self {
        Self::with_capacity(guard, 0)
    }

    /// Creates an empty collection with room for `capacity` slots.
    #[must_use]
    pub fn with_capacity(guard: Arc<ConcurrencyGuard>, capacity: usize) -> Self {
        Self {
            guard,
            slots: RwLock::new(Slots::with_capacity(capacity)),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            dispatcher: DispatchMarker::default(),
        }
    }

    /// Returns the guard this collection synchronizes on.
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &Arc<ConcurrencyGuard> {
        &self.guard
    }

    /// Writes a value, allocating a slot on first write.
    ///
    /// The flush reports an Add for a new slot and a Modify otherwise;
    /// several writes before a flush collapse into one event.
    pub fn set(&self, lock: &WeakLock<'_>, entity: EntityId, value: T) {
        self.check_weak(lock);
        self.slots.write().set(entity, value);
    }

    /// Applies a batch of writes through the same path as [`set`](Self::set).
    ///
    /// Used by world-segment loaders.
    pub fn set_batch<I>(&self, lock: &WeakLock<'_>, batch: I)
    where
        I: IntoIterator<Item = (EntityId, T)>,
    {
        self.check_weak(lock);
        let mut slots = self.slots.write();
        for (entity, value) in batch {
            slots.set(entity, value);
        }
    }

    /// Returns the entity's value, or `None` if it has none.
    #[inline]
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<T> {
        self.slots.read().get(entity)
    }

    /// Checks whether the entity has this component.
    #[inline]
    #[must_use]
    pub fn exists(&self, entity: EntityId) -> bool {
        self.slots.read().index.contains_key(&entity)
    }

    /// Deletes the entity's component. No-op if absent.
    ///
    /// Returns `true` if a slot was freed.
    pub fn remove(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool {
        self.check_weak(lock);
        let mut slots = self.slots.write();
        let Some(last) = slots.take(entity) else {
            return false;
        };
        slots.pending.note_remove(entity, last);
        true
    }

    /// Drops the entity's component from memory without deleting it
    /// durably. No-op if absent.
    ///
    /// Returns `true` if a slot was freed.
    pub fn unload(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool {
        self.check_weak(lock);
        let mut slots = self.slots.write();
        let Some(last) = slots.take(entity) else {
            return false;
        };
        slots.pending.note_unload(entity, last);
        true
    }

    /// Number of entities holding this component.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().index.len()
    }

    /// Returns `true` if no entity holds this component.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot currently holding the entity's value.
    #[must_use]
    pub fn slot_of(&self, entity: EntityId) -> Option<usize> {
        self.slots.read().index.get(&entity).copied()
    }

    /// Visits every live value in slot order, skipping freed slots.
    ///
    /// Holds a read lock for the duration; `f` must not write to this
    /// collection.
    pub fn for_each(&self, mut f: impl FnMut(EntityId, &T)) {
        let slots = self.slots.read();
        for (owner, value) in slots.owners.iter().zip(&slots.values) {
            if let Some(entity) = owner {
                f(*entity, value);
            }
        }
    }

    /// Returns `true` if changes are waiting for the next flush.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.slots.read().pending.is_empty()
    }

    /// Registers an observer.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when called from inside an observer callback.
    pub fn subscribe(&self, observer: Arc<dyn ComponentObserver<T>>) -> SubscriptionId {
        self.check_not_dispatching();
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when called from inside an observer callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.check_not_dispatching();
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Commits pending changes: one event per touched entity, and one
    /// state update per durable change.
    pub fn flush(&self, lock: &StrongLock<'_>, sink: &mut dyn StateSink) -> FlushReport {
        debug_assert!(
            lock.belongs_to(&self.guard),
            "{} flushed under a foreign strong lock",
            T::NAME
        );

        let committed = self.slots.write().drain_pending();
        let mut report = FlushReport::default();
        if committed.is_empty() {
            return report;
        }

        let observers: Vec<Arc<dyn ComponentObserver<T>>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let _dispatch = self.dispatcher.enter();

        for (entity, change) in committed {
            match change {
                Committed::Add(value) => {
                    report.added += 1;
                    record(sink, entity, UpdateKind::Add, &value);
                    observers.iter().for_each(|o| o.on_add(entity, &value));
                }
                Committed::Modify(value) => {
                    report.modified += 1;
                    record(sink, entity, UpdateKind::Modify, &value);
                    observers.iter().for_each(|o| o.on_modify(entity, &value));
                }
                Committed::Remove(last) => {
                    report.removed += 1;
                    record(sink, entity, UpdateKind::Remove, &last);
                    observers.iter().for_each(|o| o.on_remove(entity, &last));
                }
                Committed::Unload { last, unsaved } => {
                    report.unloaded += 1;
                    if let Some(kind) = unsaved {
                        record(sink, entity, kind, &last);
                    }
                    if T::PERSISTENT {
                        sink.component_unloaded(T::ID, entity);
                    }
                    // Observers never saw an entity added and unloaded in one tick.
                    if unsaved != Some(UpdateKind::Add) {
                        observers.iter().for_each(|o| o.on_unload(entity, &last));
                    }
                }
            }
        }

        report
    }

    #[inline]
    fn check_weak(&self, lock: &WeakLock<'_>) {
        debug_assert!(
            lock.belongs_to(&self.guard),
            "{} mutated under a foreign weak lock",
            T::NAME
        );
    }

    fn check_not_dispatching(&self) {
        if cfg!(debug_assertions) {
            assert!(
                !self.dispatcher.is_current(),
                "{} observers changed from inside a dispatch callback",
                T::NAME
            );
        }
    }
}

fn record<T: Component>(sink: &mut dyn StateSink, entity: EntityId, kind: UpdateKind, value: &T) {
    if T::PERSISTENT {
        sink.record(StateUpdate {
            component: T::ID,
            entity,
            kind,
            value: bytemuck::bytes_of(value).to_vec(),
        });
    }
}

impl<T: Component> PendingUpdater for ComponentCollection<T> {
    fn component_id(&self) -> ComponentTypeId {
        T::ID
    }

    fn component_name(&self) -> &'static str {
        T::NAME
    }

    fn flush_pending(&self, lock: &StrongLock<'_>, sink: &mut dyn StateSink) -> FlushReport {
        self.flush(lock, sink)
    }

    fn has_pending(&self) -> bool {
        ComponentCollection::has_pending(self)
    }
}

impl<T: Component> EntityRemover for ComponentCollection<T> {
    fn remove_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool {
        self.remove(lock, entity)
    }

    fn unload_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> bool {
        self.unload(lock, entity)
    }
}
