//! End-to-end tests: producer writes, tick commits, provider contents.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata::{
    CancelToken, Component, ComponentCollection, ComponentObserver, Engine, EngineConfig, EngineError,
    EntityAssigner, EntityId, EntityKind, Health, Material, MemoryProvider, PersistedId, PersistenceProvider, SyncError,
    Velocity,
};
use strata_persist::Statement;
use tokio::runtime::Runtime;

#[derive(Default)]
struct Events {
    log: Mutex<Vec<(&'static str, EntityId, u16)>>,
}

impl ComponentObserver<Material> for Events {
    fn on_add(&self, entity: EntityId, value: &Material) {
        self.log.lock().push(("add", entity, value.id));
    }
    fn on_modify(&self, entity: EntityId, value: &Material) {
        self.log.lock().push(("modify", entity, value.id));
    }
    fn on_remove(&self, entity: EntityId, value: &Material) {
        self.log.lock().push(("remove", entity, value.id));
    }
    fn on_unload(&self, entity: EntityId, value: &Material) {
        self.log.lock().push(("unload", entity, value.id));
    }
}

// The runtime is dropped last: it waits for the writer, which exits once
// the engine is gone.
struct World {
    provider: Arc<MemoryProvider>,
    engine: Engine,
    materials: Arc<ComponentCollection<Material>>,
    health: Arc<ComponentCollection<Health>>,
    velocities: Arc<ComponentCollection<Velocity>>,
    events: Arc<Events>,
    fatal: Arc<Mutex<Vec<SyncError>>>,
    runtime: Runtime,
}

fn world_with(config: EngineConfig) -> World {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let fatal = Arc::new(Mutex::new(Vec::new()));
    let hook_log = Arc::clone(&fatal);

    let mut builder = Engine::builder(Arc::clone(&provider) as Arc<dyn PersistenceProvider>)
        .config(config)
        .fatal_hook(Arc::new(move |err: &SyncError| hook_log.lock().push(err.clone())));
    let materials = builder.register::<Material>().unwrap();
    let health = builder.register::<Health>().unwrap();
    let velocities = builder.register::<Velocity>().unwrap();
    let engine = builder.build(runtime.handle()).unwrap();

    let events = Arc::new(Events::default());
    materials.subscribe(Arc::clone(&events) as Arc<dyn ComponentObserver<Material>>);

    World {
        provider,
        engine,
        materials,
        health,
        velocities,
        events,
        fatal,
        runtime,
    }
}

fn world() -> World {
    world_with(EngineConfig::default())
}

impl World {
    fn finish(self) -> (Arc<MemoryProvider>, Result<strata::SyncStats, EngineError>) {
        let result = self.runtime.block_on(self.engine.shutdown());
        (self.provider, result)
    }
}

fn bytes<T: Component>(value: &T) -> Vec<u8> {
    bytemuck::bytes_of(value).to_vec()
}

fn volatile_block() -> EntityAssigner {
    EntityAssigner::new(1)
}

fn pid(sequence: u64) -> PersistedId {
    PersistedId::from_sequence(sequence).unwrap()
}

#[test]
fn test_set_flush_commit_persists_insert_and_add() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();

    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    let report = w.engine.tick().unwrap();

    assert_eq!(report.flush.added, 1);
    assert_eq!(report.cycle, Some(1));
    assert_eq!(*w.events.log.lock(), vec![("add", e1, 7)]);
    assert_eq!(w.materials.get(e1), Some(Material::new(7)));
    let persisted = w.engine.persisted_id(e1).unwrap();
    assert_eq!(e1.kind(), EntityKind::Volatile);
    assert_eq!(persisted.entity().kind(), EntityKind::Persisted);
    assert_ne!(persisted.entity(), EntityAssigner::template(0).unwrap().next_id().unwrap());

    let (provider, result) = w.finish();
    result.unwrap();
    assert_eq!(
        provider.journal(),
        vec![
            Statement::InsertEntity(persisted),
            Statement::AddComponent {
                component: Material::ID,
                entity: persisted,
                value: bytes(&Material::new(7)),
            },
        ]
    );
}

#[test]
fn test_last_write_wins_within_tick() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(1));
    }
    w.engine.tick().unwrap();
    w.events.log.lock().clear();

    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
        w.materials.set(&weak, e1, Material::new(9));
    }
    let report = w.engine.tick().unwrap();

    assert_eq!(report.flush.modified, 1);
    assert_eq!(*w.events.log.lock(), vec![("modify", e1, 9)]);

    let persisted = w.engine.persisted_id(e1).unwrap();
    let (provider, result) = w.finish();
    result.unwrap();
    let modifies: Vec<_> = provider
        .journal()
        .into_iter()
        .filter(|s| matches!(s, Statement::ModifyComponent { .. }))
        .collect();
    assert_eq!(
        modifies,
        vec![Statement::ModifyComponent {
            component: Material::ID,
            entity: persisted,
            value: bytes(&Material::new(9)),
        }]
    );
}

#[test]
fn test_removed_slot_reused_without_aliasing() {
    let w = world();
    let mut assigner = volatile_block();
    let e1 = assigner.next_id().unwrap();
    let e2 = assigner.next_id().unwrap();

    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    w.engine.tick().unwrap();
    let slot = w.materials.slot_of(e1);

    {
        let weak = w.engine.weak();
        w.engine.remove_entity(&weak, e1);
        w.materials.set(&weak, e2, Material::new(3));
    }

    assert_eq!(w.materials.slot_of(e2), slot);
    assert_eq!(w.materials.get(e1), None);
    assert_eq!(w.materials.get(e2), Some(Material::new(3)));

    let report = w.engine.tick().unwrap();
    assert_eq!(report.flush.removed, 1);
    assert_eq!(report.flush.added, 1);
    assert_eq!(report.flush.entities_removed, 1);
    assert_eq!(w.materials.get(e1), None);
}

#[test]
fn test_idle_tick_commits_nothing() {
    let w = world();

    let first = w.engine.tick().unwrap();
    let second = w.engine.tick().unwrap();

    assert!(first.flush.is_empty());
    assert_eq!(first.cycle, None);
    assert_eq!(second.cycle, None);
    assert!(w.events.log.lock().is_empty());

    let (provider, result) = w.finish();
    assert_eq!(result.unwrap().cycles_committed, 0);
    assert_eq!(provider.commits(), 0);
}

#[test]
fn test_remove_entity_deletes_durable_rows() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
        w.health.set(&weak, e1, Health::full(10));
    }
    w.engine.tick().unwrap();
    let persisted = w.engine.persisted_id(e1).unwrap();

    {
        let weak = w.engine.weak();
        assert_eq!(w.engine.remove_entity(&weak, e1), 2);
    }
    w.engine.tick().unwrap();
    assert_eq!(w.engine.persisted_id(e1), None);

    let (provider, result) = w.finish();
    let stats = result.unwrap();
    assert_eq!(stats.entities_deleted, 1);
    assert!(!provider.entity_exists(persisted));
    assert_eq!(provider.row_count(), 0);
}

#[test]
fn test_unload_keeps_durable_rows() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    w.engine.tick().unwrap();
    let first = w.engine.persisted_id(e1).unwrap();

    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(8));
        assert_eq!(w.engine.unload_entity(&weak, e1), 1);
    }
    let report = w.engine.tick().unwrap();
    assert_eq!(report.flush.entities_unloaded, 1);
    assert_eq!(w.engine.persisted_id(e1), None);
    assert!(!w.materials.exists(e1));
    assert_eq!(w.events.log.lock().last(), Some(&("unload", e1, 8)));

    let (provider, result) = w.finish();
    result.unwrap();
    assert!(provider.entity_exists(first));
    assert_eq!(provider.component::<Material>(first), Some(Material::new(8)));
}

#[test]
fn test_volatile_component_never_persisted() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.velocities.set(&weak, e1, Velocity::new(1.0, 0.0, 0.0));
    }
    let report = w.engine.tick().unwrap();

    assert_eq!(report.flush.added, 1);
    assert_eq!(report.cycle, None);
    assert_eq!(w.engine.persisted_id(e1), None);

    let (provider, result) = w.finish();
    result.unwrap();
    assert_eq!(provider.entity_count(), 0);
}

#[test]
fn test_failed_transaction_halts_engine() {
    let w = world();
    w.provider.fail_commits(true);
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    assert_eq!(w.engine.tick().unwrap().cycle, Some(1));

    let deadline = Instant::now() + Duration::from_secs(5);
    while w.fatal.lock().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(w.fatal.lock().len(), 1);

    {
        let weak = w.engine.weak();
        w.materials.set(&weak, e1, Material::new(8));
    }
    assert_eq!(w.engine.tick(), Err(EngineError::Sync(SyncError::Halted)));

    let fatal = Arc::clone(&w.fatal);
    let (provider, result) = w.finish();
    assert!(matches!(
        result,
        Err(EngineError::Sync(SyncError::Provider { cycle: 1, .. }))
    ));
    assert_eq!(fatal.lock().len(), 1);
    assert_eq!(provider.entity_count(), 0);
}

#[test]
fn test_shutdown_commits_pending_changes() {
    let w = world();
    let e1 = volatile_block().next_id().unwrap();
    {
        let weak = w.engine.weak();
        w.health.set(&weak, e1, Health::full(42));
    }

    let (provider, result) = w.finish();
    assert_eq!(result.unwrap().cycles_persisted, 1);
    assert_eq!(provider.component::<Health>(pid(1)), Some(Health::full(42)));
}

#[test]
fn test_run_until_cancelled() {
    let config = EngineConfig {
        tick_rate: 200,
        ..EngineConfig::default()
    };
    let w = world_with(config);
    let cancel = CancelToken::new();
    let mut seen = 0u64;

    let ticks = w
        .engine
        .run(&cancel, |_| {
            seen += 1;
            if seen == 5 {
                cancel.cancel();
            }
        })
        .unwrap();

    assert_eq!(ticks, 5);
    assert_eq!(seen, 5);
}

#[test]
fn test_producers_and_tick_loop_together() {
    let config = EngineConfig {
        tick_rate: 500,
        late_tick_warning: false,
        ..EngineConfig::default()
    };
    let w = world_with(config);
    let cancel = CancelToken::new();

    let total = std::thread::scope(|s| {
        let producers: Vec<_> = (0..3)
            .map(|_| {
                let mut assigner = w.engine.blocks().assigner().unwrap();
                let (engine, materials, cancel) = (&w.engine, &w.materials, &cancel);
                s.spawn(move || {
                    let mut written = 0usize;
                    while !cancel.is_cancelled() && written < 200 {
                        let weak = engine.weak();
                        materials.set(&weak, assigner.next_id().unwrap(), Material::new(1));
                        written += 1;
                    }
                    written
                })
            })
            .collect();

        let runner = s.spawn(|| w.engine.run(&cancel, |_| {}));
        let total: usize = producers.into_iter().map(|h| h.join().unwrap()).sum();
        cancel.cancel();
        runner.join().unwrap().unwrap();
        total
    });

    assert_eq!(total, 600);
    assert_eq!(w.materials.len(), 600);

    let (provider, result) = w.finish();
    let stats = result.unwrap();
    assert_eq!(stats.entities_inserted, 600);
    assert_eq!(provider.entity_count(), 600);
    assert_eq!(provider.row_count(), 600);
}
