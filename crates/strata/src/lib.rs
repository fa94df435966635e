//! # Strata
//!
//! Tick-synchronized entity-component engine with a durable mirror.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata::{CancelToken, Engine, Material};
//!
//! let mut builder = Engine::builder(provider).config(config);
//! let materials = builder.register::<Material>()?;
//! let engine = Arc::new(builder.build(runtime.handle())?);
//!
//! // Any system thread
//! let mut assigner = engine.blocks().assigner()?;
//! let weak = engine.weak();
//! materials.set(&weak, assigner.next_id()?, Material::new(7));
//! drop(weak);
//!
//! // Tick thread
//! engine.run(&cancel, |_| {})?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod tick;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, TickReport};
pub use error::{EngineError, EngineResult};
pub use tick::{TickLoop, TickStats};

pub use strata_core::{
    Component, ComponentCollection, ComponentObserver, ComponentTypeId, EntityAssigner, EntityId,
    EntityKind, EntityObserver, FlushReport, Health, Material, Position, Velocity, WeakLock,
};
pub use strata_persist::{MemoryProvider, PersistedId, PersistenceProvider, SyncConfig, SyncError, SyncStats};
