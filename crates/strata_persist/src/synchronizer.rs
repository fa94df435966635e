//! # State Synchronizer
//!
//! **Double-Buffered Durable Mirror**
//!
//! The flush records every durable change into the *front* buffer. Once per
//! tick, still under the strong lock, the front buffer is swapped for an
//! empty one and the full buffer is handed to a writer that replays it as a
//! single transaction.
//!
//! ## Architecture
//!
//! ```text
//!   flush ──record──> [ front ] ──swap (strong lock)──> channel ──> [ writer ] ──> provider
//!                         ▲                                             │
//!                         └──────────── cleared buffers ◄───────────────┘
//! ```
//!
//! The tick never waits on the database. Buffers reach the writer in cycle
//! order, and each one is persisted in its own transaction.
//!
//! ## Failure
//!
//! A failed transaction would leave the database behind the in-memory
//! world, so it is never retried. The synchronizer trips: later commits
//! return [`SyncError::Halted`], queued buffers are dropped, and the
//! [`FatalHook`] runs once. The default hook aborts the process.

use crate::buffer::{RowUpdate, UpdateBuffer};
use crate::config::SyncConfig;
use crate::error::{ProviderResult, SyncError, SyncResult};
use crate::mapper::{EntityMapper, PersistedId};
use crate::provider::PersistenceProvider;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{ComponentTypeId, EntityId, StateSink, StateUpdate, StrongLock, UpdateKind};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Called once when synchronization fails.
pub type FatalHook = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// The default [`FatalHook`]: logs the error and aborts the process.
#[must_use]
pub fn abort_on_fatal() -> FatalHook {
    Arc::new(|err: &SyncError| {
        tracing::error!(error = %err, "state synchronization failed, aborting");
        std::process::abort();
    })
}

/// Synchronizer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Buffers handed to the writer.
    pub cycles_committed: u64,
    /// Buffers durably written.
    pub cycles_persisted: u64,
    /// Component rows written.
    pub rows_written: u64,
    /// Entity rows inserted.
    pub entities_inserted: u64,
    /// Entity rows deleted.
    pub entities_deleted: u64,
    /// Swaps served by a recycled buffer.
    pub buffers_reused: u64,
}

/// State only touched from inside the strong-locked flush.
struct Front {
    buffer: UpdateBuffer,
    mapper: EntityMapper,
    next_cycle: u64,
}

/// State shared with the writer.
struct Shared {
    halted: AtomicBool,
    fatal: Mutex<Option<SyncError>>,
    stats: Mutex<SyncStats>,
    hook: FatalHook,
}

impl Shared {
    fn trip(&self, err: SyncError) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(error = %err, "state synchronization halted");
        *self.fatal.lock() = Some(err.clone());
        (self.hook)(&err);
    }
}

/// Double-buffered update log with a background writer.
pub struct StateSynchronizer {
    front: Mutex<Front>,
    shared: Arc<Shared>,
    outbox: Option<Sender<UpdateBuffer>>,
    spares: Receiver<UpdateBuffer>,
    writer: Option<JoinHandle<()>>,
}

impl StateSynchronizer {
    /// Starts a synchronizer whose writer runs on `runtime`'s blocking pool.
    ///
    /// A failed transaction aborts the process.
    #[must_use]
    pub fn new(provider: Arc<dyn PersistenceProvider>, config: &SyncConfig, runtime: &Handle) -> Self {
        Self::with_fatal_hook(provider, config, runtime, abort_on_fatal())
    }

    /// Same as [`new`](Self::new) with a custom failure hook.
    #[must_use]
    pub fn with_fatal_hook(
        provider: Arc<dyn PersistenceProvider>,
        config: &SyncConfig,
        runtime: &Handle,
        hook: FatalHook,
    ) -> Self {
        let (outbox, inbox) = crossbeam_channel::unbounded();
        let (spare_tx, spares) = crossbeam_channel::bounded(config.spare_buffers);
        let shared = Arc::new(Shared {
            halted: AtomicBool::new(false),
            fatal: Mutex::new(None),
            stats: Mutex::new(SyncStats::default()),
            hook,
        });

        let writer_provider = Arc::clone(&provider);
        let writer_shared = Arc::clone(&shared);
        let writer = runtime.spawn_blocking(move || {
            Self::writer_loop(&*writer_provider, &inbox, &spare_tx, &writer_shared);
        });

        tracing::info!(
            id_reservation = config.id_reservation,
            spare_buffers = config.spare_buffers,
            "state synchronizer started"
        );

        Self {
            front: Mutex::new(Front {
                buffer: UpdateBuffer::new(),
                mapper: EntityMapper::new(provider, config.id_reservation),
                next_cycle: 1,
            }),
            shared,
            outbox: Some(outbox),
            spares,
            writer: Some(writer),
        }
    }

    /// Opens the front buffer for recording.
    ///
    /// The recorder holds the front buffer until [`SyncRecorder::finish`];
    /// the caller must finish it before committing. Once halted, the
    /// recorder discards everything it is given.
    pub fn recorder(&self, _lock: &StrongLock<'_>) -> SyncRecorder<'_> {
        SyncRecorder {
            shared: &self.shared,
            front: self.front.lock(),
            error: None,
        }
    }

    /// Swaps the front buffer out and hands it to the writer.
    ///
    /// Returns the cycle number, or `None` if there was nothing to write.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Halted`] after a failed cycle
    /// - [`SyncError::Disconnected`] after shutdown
    pub fn commit_and_swap(&self, _lock: &StrongLock<'_>) -> SyncResult<Option<u64>> {
        let mut front = self.front.lock();
        if self.is_halted() {
            front.buffer.clear();
            return Err(SyncError::Halted);
        }
        if front.buffer.is_empty() {
            return Ok(None);
        }
        let outbox = self.outbox.as_ref().ok_or(SyncError::Disconnected)?;

        let (replacement, reused) = match self.spares.try_recv() {
            Ok(buffer) => (buffer, true),
            Err(_) => (UpdateBuffer::new(), false),
        };
        let mut back = std::mem::replace(&mut front.buffer, replacement);
        let cycle = front.next_cycle;
        front.next_cycle += 1;
        back.set_cycle(cycle);

        let rows = back.row_count();
        outbox.send(back).map_err(|_| SyncError::Disconnected)?;

        {
            let mut stats = self.shared.stats.lock();
            stats.cycles_committed += 1;
            if reused {
                stats.buffers_reused += 1;
            }
        }
        tracing::debug!(cycle, rows, reused, "committed state buffer");
        Ok(Some(cycle))
    }

    /// Returns `true` once a cycle has failed.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.lock().clone()
    }

    /// Persisted ID currently mapped to `entity`.
    ///
    /// Must not be called while a recorder is open on this thread.
    #[must_use]
    pub fn persisted_id(&self, entity: EntityId) -> Option<PersistedId> {
        self.front.lock().mapper.lookup(entity)
    }

    /// Number of live entity mappings.
    ///
    /// Must not be called while a recorder is open on this thread.
    #[must_use]
    pub fn mapped_entities(&self) -> usize {
        self.front.lock().mapper.len()
    }

    /// Stops accepting buffers and waits for the writer to drain the queue.
    ///
    /// Uncommitted changes in the front buffer are not written.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if any cycle failed, or
    /// [`SyncError::WriterAborted`] if the writer task died.
    pub async fn shutdown(mut self) -> SyncResult<SyncStats> {
        drop(self.outbox.take());
        if let Some(writer) = self.writer.take() {
            writer
                .await
                .map_err(|e| SyncError::WriterAborted(e.to_string()))?;
        }

        let fatal = self.shared.fatal.lock().take();
        if let Some(err) = fatal {
            return Err(err);
        }

        let stats = self.stats();
        tracing::info!(
            cycles = stats.cycles_persisted,
            rows = stats.rows_written,
            "state synchronizer drained"
        );
        Ok(stats)
    }

    /// Writer main loop. Runs until the outbox closes.
    fn writer_loop(
        provider: &dyn PersistenceProvider,
        inbox: &Receiver<UpdateBuffer>,
        spares: &Sender<UpdateBuffer>,
        shared: &Shared,
    ) {
        for mut buffer in inbox {
            if shared.halted.load(Ordering::SeqCst) {
                continue;
            }

            let cycle = buffer.cycle();
            if let Err(source) = Self::persist(provider, &buffer) {
                shared.trip(SyncError::Provider { cycle, source });
                continue;
            }

            {
                let mut stats = shared.stats.lock();
                stats.cycles_persisted += 1;
                stats.rows_written += buffer.row_count() as u64;
                stats.entities_inserted += buffer.inserted_count() as u64;
                stats.entities_deleted += buffer.deleted_count() as u64;
            }
            tracing::debug!(
                cycle,
                rows = buffer.row_count(),
                inserted = buffer.inserted_count(),
                deleted = buffer.deleted_count(),
                "persisted state buffer"
            );

            buffer.clear();
            // Pool full: let the buffer go.
            let _ = spares.try_send(buffer);
        }

        tracing::info!("state writer stopped");
    }

    /// Writes one buffer in one transaction.
    fn persist(provider: &dyn PersistenceProvider, buffer: &UpdateBuffer) -> ProviderResult<()> {
        let mut tx = provider.begin()?;
        if let Err(err) = buffer.apply(&mut *tx) {
            tx.rollback();
            return Err(err);
        }
        tx.commit()
    }
}

impl std::fmt::Debug for StateSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronizer")
            .field("halted", &self.is_halted())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// [`StateSink`] feeding the front buffer.
///
/// Translates volatile entity IDs through the mapper: a new mapping queues
/// the entity insert and turns the change into an Add; removals of
/// never-persisted entities are dropped.
pub struct SyncRecorder<'a> {
    shared: &'a Shared,
    front: MutexGuard<'a, Front>,
    error: Option<SyncError>,
}

impl SyncRecorder<'_> {
    /// Closes the recorder.
    ///
    /// # Errors
    ///
    /// Returns the first recording error. Such an error is fatal: the
    /// synchronizer is halted before this returns.
    pub fn finish(self) -> SyncResult<()> {
        match self.error {
            Some(err) => {
                self.shared.trip(err.clone());
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    fn record_change(&mut self, update: StateUpdate) -> ProviderResult<()> {
        let front = &mut *self.front;
        let entity = update.entity;

        let (persisted, kind) = match update.kind {
            UpdateKind::Remove => {
                let Some(persisted) = front.mapper.lookup(entity) else {
                    tracing::trace!(%entity, component = %update.component, "remove of unmapped entity skipped");
                    return Ok(());
                };
                (persisted, UpdateKind::Remove)
            }
            kind => {
                let (persisted, created) = front.mapper.get_persisted_id(entity)?;
                if created {
                    front.buffer.insert_entity(persisted);
                    (persisted, UpdateKind::Add)
                } else if kind == UpdateKind::Add && front.mapper.take_offloaded(entity, update.component) {
                    // The row outlived the in-memory component.
                    (persisted, UpdateKind::Modify)
                } else {
                    (persisted, kind)
                }
            }
        };

        front.buffer.record(
            update.component,
            RowUpdate {
                entity: persisted,
                kind,
                value: update.value,
            },
        );
        Ok(())
    }
}

impl StateSink for SyncRecorder<'_> {
    fn record(&mut self, update: StateUpdate) {
        if self.error.is_some() || self.is_halted() {
            return;
        }
        if let Err(source) = self.record_change(update) {
            self.error = Some(SyncError::Provider { cycle: 0, source });
        }
    }

    fn entity_removed(&mut self, entity: EntityId) {
        if self.is_halted() {
            return;
        }
        let front = &mut *self.front;
        if let Some(persisted) = front.mapper.unload_id(entity) {
            front.buffer.delete_entity(persisted);
        }
    }

    fn entity_unloaded(&mut self, entity: EntityId) {
        self.front.mapper.unload_id(entity);
    }

    fn component_unloaded(&mut self, component: ComponentTypeId, entity: EntityId) {
        if self.is_halted() {
            return;
        }
        self.front.mapper.note_offloaded(entity, component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProvider, Statement};
    use strata_core::{Component, ConcurrencyGuard, Health, Material};

    fn pid(sequence: u64) -> PersistedId {
        PersistedId::from_sequence(sequence).unwrap()
    }

    struct Rig {
        runtime: tokio::runtime::Runtime,
        provider: Arc<MemoryProvider>,
        guard: ConcurrencyGuard,
        fatal: Arc<Mutex<Vec<SyncError>>>,
    }

    fn rig() -> Rig {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        Rig {
            runtime,
            provider: Arc::new(MemoryProvider::new()),
            guard: ConcurrencyGuard::new(),
            fatal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    impl Rig {
        fn synchronizer(&self) -> StateSynchronizer {
            let fatal = Arc::clone(&self.fatal);
            StateSynchronizer::with_fatal_hook(
                Arc::clone(&self.provider) as Arc<dyn PersistenceProvider>,
                &SyncConfig::default(),
                self.runtime.handle(),
                Arc::new(move |err: &SyncError| fatal.lock().push(err.clone())),
            )
        }

        fn cycle(&self, sync: &StateSynchronizer, record: impl FnOnce(&mut SyncRecorder<'_>)) -> Option<u64> {
            let strong = self.guard.strong();
            let mut recorder = sync.recorder(&strong);
            record(&mut recorder);
            recorder.finish().unwrap();
            sync.commit_and_swap(&strong).unwrap()
        }
    }

    fn update<T: Component>(entity: EntityId, kind: UpdateKind, value: &T) -> StateUpdate {
        StateUpdate {
            component: T::ID,
            entity,
            kind,
            value: bytemuck::bytes_of(value).to_vec(),
        }
    }

    const E1: EntityId = EntityId::new(300, 1);

    #[test]
    fn test_first_change_inserts_entity() {
        let rig = rig();
        let sync = rig.synchronizer();

        let cycle = rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Add, &Material::new(7))));
        assert_eq!(cycle, Some(1));

        let stats = rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(stats.cycles_persisted, 1);
        assert_eq!(
            rig.provider.journal(),
            vec![
                Statement::InsertEntity(pid(1)),
                Statement::AddComponent {
                    component: Material::ID,
                    entity: pid(1),
                    value: bytemuck::bytes_of(&Material::new(7)).to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_empty_commit_sends_nothing() {
        let rig = rig();
        let sync = rig.synchronizer();

        assert_eq!(rig.cycle(&sync, |_| {}), None);
        // Removal of an entity that was never persisted writes nothing.
        assert_eq!(
            rig.cycle(&sync, |r| {
                r.record(update(E1, UpdateKind::Remove, &Material::new(1)));
                r.entity_removed(E1);
            }),
            None
        );

        let stats = rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(stats.cycles_committed, 0);
        assert_eq!(rig.provider.commits(), 0);
    }

    #[test]
    fn test_modify_of_unmapped_entity_becomes_add() {
        let rig = rig();
        let sync = rig.synchronizer();

        rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Modify, &Health::full(3))));

        rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(rig.provider.component::<Health>(pid(1)), Some(Health::full(3)));
    }

    #[test]
    fn test_remove_deletes_entity_and_mapping() {
        let rig = rig();
        let sync = rig.synchronizer();

        rig.cycle(&sync, |r| {
            r.record(update(E1, UpdateKind::Add, &Material::new(7)));
            r.record(update(E1, UpdateKind::Add, &Health::full(3)));
        });
        assert_eq!(sync.persisted_id(E1), Some(pid(1)));

        rig.cycle(&sync, |r| {
            r.record(update(E1, UpdateKind::Remove, &Material::new(7)));
            r.record(update(E1, UpdateKind::Remove, &Health::full(3)));
            r.entity_removed(E1);
        });
        assert_eq!(sync.persisted_id(E1), None);

        let stats = rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(stats.entities_inserted, 1);
        assert_eq!(stats.entities_deleted, 1);
        assert_eq!(rig.provider.entity_count(), 0);
        assert_eq!(
            rig.provider.journal().last(),
            Some(&Statement::DeleteEntity(pid(1)))
        );
    }

    #[test]
    fn test_unload_keeps_rows() {
        let rig = rig();
        let sync = rig.synchronizer();

        rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Add, &Material::new(7))));
        rig.cycle(&sync, |r| {
            r.component_unloaded(Material::ID, E1);
            r.entity_unloaded(E1);
        });
        assert_eq!(sync.mapped_entities(), 0);

        rig.runtime.block_on(sync.shutdown()).unwrap();
        assert!(rig.provider.entity_exists(pid(1)));
        assert_eq!(rig.provider.row_count(), 1);
    }

    #[test]
    fn test_reloaded_component_modifies_surviving_row() {
        let rig = rig();
        let sync = rig.synchronizer();

        rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Add, &Material::new(7))));
        rig.cycle(&sync, |r| {
            r.component_unloaded(Material::ID, E1);
            r.record(update(E1, UpdateKind::Add, &Material::new(8)));
        });

        rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(rig.provider.component::<Material>(pid(1)), Some(Material::new(8)));
    }

    #[test]
    fn test_failed_cycle_halts() {
        let rig = rig();
        let sync = rig.synchronizer();
        rig.provider.fail_commits(true);

        rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Add, &Material::new(7))));
        let fatal = Arc::clone(&rig.fatal);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !sync.is_halted() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(sync.is_halted());
        {
            let strong = rig.guard.strong();
            assert_eq!(sync.commit_and_swap(&strong), Err(SyncError::Halted));
        }
        assert_eq!(fatal.lock().len(), 1);

        let result = rig.runtime.block_on(sync.shutdown());
        assert!(matches!(result, Err(SyncError::Provider { cycle: 1, .. })));
        assert_eq!(rig.provider.entity_count(), 0);
    }

    #[test]
    fn test_halted_synchronizer_stops_recording() {
        let rig = rig();
        let sync = rig.synchronizer();
        rig.provider.fail_commits(true);

        rig.cycle(&sync, |r| r.record(update(E1, UpdateKind::Add, &Material::new(7))));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !sync.is_halted() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(sync.is_halted());
        let mapped = sync.mapped_entities();
        let reservations = rig.provider.reservations();

        for seq in 2..=200 {
            let strong = rig.guard.strong();
            let mut recorder = sync.recorder(&strong);
            let entity = EntityId::new(300, seq);
            recorder.record(update(entity, UpdateKind::Add, &Material::new(1)));
            recorder.component_unloaded(Material::ID, E1);
            recorder.entity_removed(E1);
            recorder.finish().unwrap();
            assert_eq!(sync.commit_and_swap(&strong), Err(SyncError::Halted));
        }

        assert!(sync.front.lock().buffer.is_empty());
        assert_eq!(sync.mapped_entities(), mapped);
        assert_eq!(rig.provider.reservations(), reservations);
        assert_eq!(rig.fatal.lock().len(), 1);
        assert!(rig.runtime.block_on(sync.shutdown()).is_err());
    }

    #[test]
    fn test_buffers_are_recycled() {
        let rig = rig();
        let sync = rig.synchronizer();

        for seq in 1..=20 {
            rig.cycle(&sync, |r| {
                r.record(update(EntityId::new(300, seq), UpdateKind::Add, &Material::new(1)));
            });
            // Give the writer a chance to hand buffers back.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let stats = rig.runtime.block_on(sync.shutdown()).unwrap();
        assert_eq!(stats.cycles_persisted, 20);
        assert_eq!(stats.entities_inserted, 20);
        assert!(stats.buffers_reused > 0);
        assert_eq!(rig.provider.commits(), 20);
    }
}
