//! # Lifecycle Observers
//!
//! Typed subscriber lists replace a global event bus. Every callback runs
//! synchronously inside the strong-locked flush, so handlers must be fast
//! and must not block. They may read collections, but must not subscribe,
//! unsubscribe or take a weak lock.

use super::component::Component;
use super::entity::EntityId;
use parking_lot::Mutex;
use std::thread::ThreadId;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Receives committed changes of one component type.
///
/// All methods default to no-ops so observers implement only what they need.
pub trait ComponentObserver<T: Component>: Send + Sync {
    /// The entity gained the component this tick.
    fn on_add(&self, _entity: EntityId, _value: &T) {}

    /// The entity's component changed this tick. Carries the final value.
    fn on_modify(&self, _entity: EntityId, _value: &T) {}

    /// The component was deleted. Carries the last value.
    fn on_remove(&self, _entity: EntityId, _value: &T) {}

    /// The component was dropped from memory but still exists durably.
    fn on_unload(&self, _entity: EntityId, _value: &T) {}
}

/// Receives entity-level removals and unloads.
pub trait EntityObserver: Send + Sync {
    /// The entity was removed from every collection.
    fn on_remove(&self, _entity: EntityId) {}

    /// The entity was dropped from memory.
    fn on_unload(&self, _entity: EntityId) {}
}

/// Records which thread is running observer callbacks.
#[derive(Default)]
pub(crate) struct DispatchMarker {
    thread: Mutex<Option<ThreadId>>,
}

impl DispatchMarker {
    /// Marks the current thread as dispatching until the scope drops.
    pub(crate) fn enter(&self) -> DispatchScope<'_> {
        *self.thread.lock() = Some(std::thread::current().id());
        DispatchScope { marker: self }
    }

    /// Returns `true` if the current thread is inside a dispatch.
    pub(crate) fn is_current(&self) -> bool {
        *self.thread.lock() == Some(std::thread::current().id())
    }
}

/// Clears the marker on drop, also when a callback unwinds.
pub(crate) struct DispatchScope<'a> {
    marker: &'a DispatchMarker,
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        *self.marker.thread.lock() = None;
    }
}
