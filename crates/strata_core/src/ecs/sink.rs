//! # State Sink
//!
//! The seam through which committed changes leave the core. The flush hands
//! every persistent change to a sink; the persistence layer implements it.

use super::component::ComponentTypeId;
use super::entity::EntityId;

/// Kind of a durable change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// A new component row.
    Add,
    /// Replacement of an existing row.
    Modify,
    /// Deletion of a row.
    Remove,
}

/// One committed component change, keyed by the volatile entity ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateUpdate {
    /// The component type.
    pub component: ComponentTypeId,
    /// The in-memory entity.
    pub entity: EntityId,
    /// What happened.
    pub kind: UpdateKind,
    /// Byte image of the value (last value for removals).
    pub value: Vec<u8>,
}

/// Destination for flush results.
///
/// Called only from within the strong-locked flush.
pub trait StateSink {
    /// Records one component change.
    fn record(&mut self, update: StateUpdate);

    /// The entity was removed after all its component removals were recorded.
    fn entity_removed(&mut self, _entity: EntityId) {}

    /// The entity was dropped from memory.
    fn entity_unloaded(&mut self, _entity: EntityId) {}

    /// The component was dropped from memory; its durable row stays.
    fn component_unloaded(&mut self, _component: ComponentTypeId, _entity: EntityId) {}
}

/// Sink that discards everything. For worlds without persistence.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardSink;

impl StateSink for DiscardSink {
    fn record(&mut self, _update: StateUpdate) {}
}

/// Sink that keeps everything in memory, in call order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectSink {
    /// Recorded component changes.
    pub updates: Vec<StateUpdate>,
    /// Entities reported removed.
    pub removed: Vec<EntityId>,
    /// Entities reported unloaded.
    pub unloaded: Vec<EntityId>,
    /// Components reported unloaded.
    pub offloaded: Vec<(ComponentTypeId, EntityId)>,
}

impl StateSink for CollectSink {
    fn record(&mut self, update: StateUpdate) {
        self.updates.push(update);
    }

    fn entity_removed(&mut self, entity: EntityId) {
        self.removed.push(entity);
    }

    fn entity_unloaded(&mut self, entity: EntityId) {
        self.unloaded.push(entity);
    }

    fn component_unloaded(&mut self, component: ComponentTypeId, entity: EntityId) {
        self.offloaded.push((component, entity));
    }
}
