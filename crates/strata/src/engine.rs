//! # Engine
//!
//! Owns the concurrency guard, the component registry and the state
//! synchronizer, and runs the per-tick commit:
//!
//! ```text
//!   strong lock ──> registry flush ──> recorder (front buffer) ──> swap ──> release
//!                   (collections,                                   │
//!                    then notifier)                                 ▼
//!                                                            writer thread
//! ```
//!
//! Producer systems share the engine (usually behind an `Arc`), take weak
//! locks through [`Engine::weak`] and write to the collections returned by
//! [`EngineBuilder::register`].

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::tick::TickLoop;
use std::sync::Arc;
use strata_core::{
    BlockIssuer, Component, ComponentCollection, ComponentRegistry, ConcurrencyGuard, EntityId,
    EntityNotifier, FlushReport, WeakLock,
};
use strata_persist::{
    FatalHook, PersistedId, PersistenceProvider, StateSynchronizer, SyncError, SyncStats,
};
use tokio::runtime::Handle;

/// Outcome of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// What the flush committed.
    pub flush: FlushReport,
    /// Synchronization cycle sent to the writer, if anything was written.
    pub cycle: Option<u64>,
}

/// Startup-time engine assembly.
pub struct EngineBuilder {
    provider: Arc<dyn PersistenceProvider>,
    config: EngineConfig,
    guard: Arc<ConcurrencyGuard>,
    registry: ComponentRegistry,
    fatal_hook: Option<FatalHook>,
}

impl EngineBuilder {
    /// Starts a builder persisting through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn PersistenceProvider>) -> Self {
        let guard = Arc::new(ConcurrencyGuard::new());
        let notifier = Arc::new(EntityNotifier::new(Arc::clone(&guard)));
        let registry = ComponentRegistry::new(Arc::clone(&guard), notifier);
        Self {
            provider,
            config: EngineConfig::default(),
            guard,
            registry,
            fatal_hook: None,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default fatal hook, which aborts the process.
    #[must_use]
    pub fn fatal_hook(mut self, hook: FatalHook) -> Self {
        self.fatal_hook = Some(hook);
        self
    }

    /// Creates and registers the collection for `T`.
    ///
    /// Collections flush in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Core`] if `T` is already registered.
    pub fn register<T: Component>(&mut self) -> EngineResult<Arc<ComponentCollection<T>>> {
        let collection = Arc::new(ComponentCollection::new(Arc::clone(&self.guard)));
        self.registry.register(&collection)?;
        tracing::debug!(component = T::NAME, id = %T::ID, persistent = T::PERSISTENT, "registered component");
        Ok(collection)
    }

    /// Validates the configuration and starts the synchronizer writer on
    /// `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for an invalid configuration.
    pub fn build(self, runtime: &Handle) -> EngineResult<Engine> {
        self.config.validate()?;

        let sync = match self.fatal_hook {
            Some(hook) => StateSynchronizer::with_fatal_hook(self.provider, &self.config.sync, runtime, hook),
            None => StateSynchronizer::new(self.provider, &self.config.sync, runtime),
        };

        tracing::info!(
            tick_rate = self.config.tick_rate,
            components = self.registry.collection_count(),
            "engine started"
        );

        Ok(Engine {
            config: self.config,
            guard: self.guard,
            registry: self.registry,
            blocks: BlockIssuer::new(),
            sync,
        })
    }
}

/// The running world.
pub struct Engine {
    config: EngineConfig,
    guard: Arc<ConcurrencyGuard>,
    registry: ComponentRegistry,
    blocks: BlockIssuer,
    sync: StateSynchronizer,
}

impl Engine {
    /// Starts a builder. Same as [`EngineBuilder::new`].
    #[must_use]
    pub fn builder(provider: Arc<dyn PersistenceProvider>) -> EngineBuilder {
        EngineBuilder::new(provider)
    }

    /// Commits everything pending: one strong section covering the registry
    /// flush and the buffer swap.
    ///
    /// Blocks until every weak holder has released. Must not be called
    /// while the calling thread holds a weak lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sync`] once synchronization has failed.
    pub fn tick(&self) -> EngineResult<TickReport> {
        let strong = self.guard.strong();

        let mut recorder = self.sync.recorder(&strong);
        let flush = self.registry.flush_locked(&strong, &mut recorder);
        recorder.finish()?;

        let cycle = self.sync.commit_and_swap(&strong)?;
        Ok(TickReport { flush, cycle })
    }

    /// Runs fixed-timestep ticks until `cancel` fires.
    ///
    /// `on_tick` sees every report. Returns the number of ticks run.
    ///
    /// # Errors
    ///
    /// Stops at the first failed tick.
    pub fn run<F>(&self, cancel: &CancelToken, mut on_tick: F) -> EngineResult<u64>
    where
        F: FnMut(&TickReport),
    {
        let mut ticks = TickLoop::new(self.config.tick_rate);
        tracing::info!(tick_rate = self.config.tick_rate, "tick loop started");

        'outer: while !cancel.is_cancelled() {
            while ticks.should_tick() {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                let start = ticks.begin_tick();
                let report = self.tick()?;
                on_tick(&report);

                if ticks.end_tick(start) && self.config.late_tick_warning {
                    tracing::warn!(
                        tick = ticks.tick_count(),
                        budget_ms = ticks.tick_duration().as_secs_f64() * 1000.0,
                        "tick overran its budget"
                    );
                }
            }
            ticks.wait_for_next_tick();
        }

        let stats = ticks.stats();
        tracing::info!(
            ticks = ticks.tick_count(),
            avg_tick_us = stats.avg_tick_us,
            max_tick_us = stats.max_tick_us,
            late_ticks = stats.late_ticks,
            "tick loop stopped"
        );
        Ok(ticks.tick_count())
    }

    /// Acquires a weak lock for mutating collections.
    #[inline]
    #[must_use]
    pub fn weak(&self) -> WeakLock<'_> {
        self.guard.weak()
    }

    /// Returns the shared guard.
    #[must_use]
    pub fn guard(&self) -> &Arc<ConcurrencyGuard> {
        &self.guard
    }

    /// Deletes the entity from every collection. Its removal event fires
    /// and its durable rows are deleted on the next tick.
    ///
    /// Returns the number of components removed.
    pub fn remove_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> usize {
        self.registry.remove_entity(lock, entity)
    }

    /// Drops the entity from memory, keeping its durable rows.
    ///
    /// Returns the number of components unloaded.
    pub fn unload_entity(&self, lock: &WeakLock<'_>, entity: EntityId) -> usize {
        self.registry.unload_entity(lock, entity)
    }

    /// Block issuer for subsystem entity assigners.
    #[must_use]
    pub fn blocks(&self) -> &BlockIssuer {
        &self.blocks
    }

    /// Entity lifecycle notifier, for subscribing observers.
    #[must_use]
    pub fn notifier(&self) -> &Arc<EntityNotifier> {
        self.registry.notifier()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` if the next tick has work to do.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.registry.has_pending()
    }

    /// Synchronizer counters.
    #[must_use]
    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Persisted ID currently mapped to `entity`.
    #[must_use]
    pub fn persisted_id(&self, entity: EntityId) -> Option<PersistedId> {
        self.sync.persisted_id(entity)
    }

    /// Commits what is still pending, then waits for every committed cycle
    /// to be written.
    ///
    /// # Errors
    ///
    /// Returns the fatal synchronization error if any cycle failed.
    pub async fn shutdown(self) -> EngineResult<SyncStats> {
        match self.tick() {
            Ok(_) | Err(EngineError::Sync(SyncError::Halted)) => {}
            Err(err) => return Err(err),
        }

        let stats = self.sync.shutdown().await?;
        tracing::info!(
            cycles = stats.cycles_persisted,
            entities = stats.entities_inserted,
            "engine stopped"
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("components", &self.registry.collection_count())
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}
