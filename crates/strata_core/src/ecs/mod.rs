//! # Entity Component Store
//!
//! Sparse, per-type component storage with tick-synchronized commits.
//!
//! ## Design Philosophy
//!
//! - Entities are bare 64-bit IDs, issued per block without synchronization
//! - Each component type lives in its own sparse set, locked independently
//! - Writes are visible immediately; events and durable changes are
//!   committed once per tick under the strong lock
//! - Observers are typed per component, never a global bus

mod collection;
mod component;
mod entity;
mod notifier;
mod observer;
mod registry;
mod sink;

pub use collection::ComponentCollection;
pub use component::{Component, ComponentTypeId, Health, Material, Position, Velocity};
pub use entity::{
    BlockIssuer, EntityAssigner, EntityId, EntityKind, FIRST_PERSISTED_BLOCK, FIRST_VOLATILE_BLOCK,
    RESERVED_BLOCKS,
};
pub use notifier::EntityNotifier;
pub use observer::{ComponentObserver, EntityObserver, SubscriptionId};
pub use registry::{ComponentRegistry, EntityRemover, FlushReport, PendingUpdater};
pub use sink::{CollectSink, DiscardSink, StateSink, StateUpdate, UpdateKind};
