//! # Strata Core
//!
//! Columnar, sparse entity-component store shared between the tick thread
//! and any number of producer systems.
//!
//! ## Architecture Rules
//!
//! 1. **Systems never block each other** - weak locks are shared, and each
//!    collection guards its own bookkeeping
//! 2. **One commit point per tick** - the strong lock drains every weak
//!    holder, then the registry flushes all collections and the notifier
//! 3. **Persistence stays outside** - flush results leave through a
//!    [`StateSink`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::{ComponentCollection, ComponentRegistry, ConcurrencyGuard, Material};
//!
//! let guard = Arc::new(ConcurrencyGuard::new());
//! let notifier = Arc::new(EntityNotifier::new(Arc::clone(&guard)));
//! let mut registry = ComponentRegistry::new(Arc::clone(&guard), notifier);
//! let materials = Arc::new(ComponentCollection::<Material>::new(Arc::clone(&guard)));
//! registry.register(&materials)?;
//!
//! // Any system thread
//! let weak = guard.weak();
//! materials.set(&weak, entity, Material::new(7));
//! drop(weak);
//!
//! // Tick thread
//! registry.flush_all_pending(&mut sink);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;
pub mod sync;

pub use ecs::{
    BlockIssuer, CollectSink, Component, ComponentCollection, ComponentObserver, ComponentRegistry,
    ComponentTypeId, DiscardSink, EntityAssigner, EntityId, EntityKind, EntityNotifier,
    EntityObserver, EntityRemover, FlushReport, Health, Material, PendingUpdater, Position,
    StateSink, StateUpdate, SubscriptionId, UpdateKind, Velocity, FIRST_PERSISTED_BLOCK,
    FIRST_VOLATILE_BLOCK, RESERVED_BLOCKS,
};
pub use error::{CoreError, CoreResult};
pub use sync::{ConcurrencyGuard, StrongLock, WeakLock};
