//! # Entity Notifier
//!
//! Buffers entity removals and unloads during a tick and dispatches them
//! once, from inside the strong-locked flush. Duplicates within a tick
//! collapse into one event.

use super::entity::EntityId;
use super::observer::{DispatchMarker, EntityObserver, SubscriptionId};
use super::registry::FlushReport;
use super::sink::StateSink;
use crate::sync::{ConcurrencyGuard, StrongLock};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// First-seen ordered set of entity IDs.
#[derive(Default)]
struct Queue {
    order: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

impl Queue {
    fn push(&mut self, entity: EntityId) {
        if self.seen.insert(entity) {
            self.order.push(entity);
        }
    }

    fn take(&mut self) -> Vec<EntityId> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
struct Queues {
    removed: Queue,
    unloaded: Queue,
}

/// Per-tick entity lifecycle buffer, dispatched under `guard`'s strong lock.
pub struct EntityNotifier {
    guard: Arc<ConcurrencyGuard>,
    queues: Mutex<Queues>,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn EntityObserver>)>>,
    next_subscription: AtomicU64,
    dispatcher: DispatchMarker,
}

impl EntityNotifier {
    /// Creates an empty notifier over `guard`.
    #[must_use]
    pub fn new(guard: Arc<ConcurrencyGuard>) -> Self {
        Self {
            guard,
            queues: Mutex::new(Queues::default()),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            dispatcher: DispatchMarker::default(),
        }
    }

    /// Returns the guard whose strong lock dispatch requires.
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &Arc<ConcurrencyGuard> {
        &self.guard
    }

    /// Queues a removal event.
    pub fn enqueue_remove(&self, entity: EntityId) {
        self.queues.lock().removed.push(entity);
    }

    /// Queues an unload event.
    pub fn enqueue_unload(&self, entity: EntityId) {
        self.queues.lock().unloaded.push(entity);
    }

    /// Returns `true` if events are queued.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let queues = self.queues.lock();
        !queues.removed.is_empty() || !queues.unloaded.is_empty()
    }

    /// Registers an observer.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when called from inside a dispatch callback.
    pub fn subscribe(&self, observer: Arc<dyn EntityObserver>) -> SubscriptionId {
        self.check_not_dispatching();
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when called from inside a dispatch callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.check_not_dispatching();
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Fires all queued removals, then all queued unloads, then clears both.
    ///
    /// The strong lock argument restricts this to the commit path.
    pub fn dispatch(&self, lock: &StrongLock<'_>, sink: &mut dyn StateSink) -> FlushReport {
        debug_assert!(
            lock.belongs_to(&self.guard),
            "entity notifier dispatched under a foreign strong lock"
        );

        let (removed, unloaded) = {
            let mut queues = self.queues.lock();
            (queues.removed.take(), queues.unloaded.take())
        };

        let report = FlushReport {
            entities_removed: removed.len(),
            entities_unloaded: unloaded.len(),
            ..FlushReport::default()
        };
        if report.is_empty() {
            return report;
        }

        {
            let _dispatch = self.dispatcher.enter();
            let observers = self.observers.read();
            for &entity in &removed {
                sink.entity_removed(entity);
                for (_, observer) in observers.iter() {
                    observer.on_remove(entity);
                }
            }
            for &entity in &unloaded {
                sink.entity_unloaded(entity);
                for (_, observer) in observers.iter() {
                    observer.on_unload(entity);
                }
            }
        }

        report
    }

    fn check_not_dispatching(&self) {
        debug_assert!(
            !self.dispatcher.is_current(),
            "entity observers changed from inside a dispatch callback"
        );
    }
}
