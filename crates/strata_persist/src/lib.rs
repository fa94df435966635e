//! # Strata Persist
//!
//! Mirrors committed component state into a database without stalling the
//! tick.
//!
//! ## Architecture Rules
//!
//! 1. **Identity is lazy** - an entity gets a persisted ID the first time one
//!    of its changes must be written
//! 2. **One transaction per tick** - the flush fills the front buffer, the
//!    swap hands it to the writer whole
//! 3. **Failure is fatal** - a failed transaction halts synchronization
//!
//! ## Example
//!
//! ```rust,ignore
//! let sync = StateSynchronizer::new(provider, &SyncConfig::default(), runtime.handle());
//!
//! // Tick thread, once per tick
//! let strong = guard.strong();
//! let mut recorder = sync.recorder(&strong);
//! registry.flush_locked(&strong, &mut recorder);
//! recorder.finish()?;
//! sync.commit_and_swap(&strong)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod mapper;
pub mod memory;
pub mod provider;
pub mod synchronizer;

pub use buffer::{RowUpdate, UpdateBuffer};
pub use config::SyncConfig;
pub use error::{ProviderError, ProviderResult, SyncError, SyncResult};
pub use mapper::{EntityMapper, PersistedId};
pub use memory::{MemoryProvider, Statement};
pub use provider::{PersistenceProvider, Transaction};
pub use synchronizer::{abort_on_fatal, FatalHook, StateSynchronizer, SyncRecorder, SyncStats};
