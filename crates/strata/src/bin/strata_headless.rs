//! # Strata Headless
//!
//! Runs the engine against the in-memory provider with a few producer
//! systems, then drains the synchronizer and prints what was persisted.
//!
//! ```text
//! strata_headless [CONFIG.toml] [SECONDS]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata::{
    CancelToken, ComponentCollection, ComponentObserver, Engine, EngineConfig, EntityId, EntityObserver, Health,
    Material, MemoryProvider, PersistenceProvider, Position, Velocity,
};
use tracing_subscriber::EnvFilter;

/// Entities each producer keeps alive before it starts removing old ones.
const LIVE_PER_SYSTEM: usize = 256;

/// Counts health changes that reach observers.
#[derive(Default)]
struct DamageLog {
    modified: AtomicU64,
}

impl ComponentObserver<Health> for DamageLog {
    fn on_modify(&self, _entity: EntityId, _value: &Health) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts entity removals.
#[derive(Default)]
struct Reaper {
    removed: AtomicU64,
}

impl EntityObserver for Reaper {
    fn on_remove(&self, _entity: EntityId) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }
}

struct Collections {
    materials: Arc<ComponentCollection<Material>>,
    positions: Arc<ComponentCollection<Position>>,
    health: Arc<ComponentCollection<Health>>,
    velocities: Arc<ComponentCollection<Velocity>>,
}

/// One simulation system: spawns entities, moves them, damages them and
/// removes the oldest.
fn producer(engine: &Engine, world: &Collections, cancel: &CancelToken) -> Result<u64, strata::EngineError> {
    let mut assigner = engine.blocks().assigner()?;
    let mut live: Vec<EntityId> = Vec::with_capacity(LIVE_PER_SYSTEM);
    let mut steps = 0u64;

    while !cancel.is_cancelled() {
        let entity = assigner.next_id()?;
        let seq = entity.sequence();
        {
            let weak = engine.weak();
            // Exact in f32 for any realistic run length.
            #[allow(clippy::cast_precision_loss)]
            let x = (seq % 1024) as f32;
            world.materials.set(&weak, entity, Material::new((seq % 16) as u16));
            world.positions.set(&weak, entity, Position::new(x, 0.0, 0.0));
            world.health.set(&weak, entity, Health::full(100));
            world.velocities.set(&weak, entity, Velocity::new(1.0, 0.0, 0.0));

            for &other in live.iter().rev().take(8) {
                if let Some(mut hp) = world.health.get(other) {
                    hp.current -= 1;
                    world.health.set(&weak, other, hp);
                }
                if let (Some(p), Some(v)) = (world.positions.get(other), world.velocities.get(other)) {
                    world.positions.set(&weak, other, Position::new(p.x + v.x, p.y + v.y, p.z + v.z));
                }
            }

            live.push(entity);
            if live.len() > LIVE_PER_SYSTEM {
                let oldest = live.remove(0);
                engine.remove_entity(&weak, oldest);
            }
        }

        steps += 1;
        thread::sleep(Duration::from_micros(500));
    }

    Ok(steps)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let seconds: u64 = args.next().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(3);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("strata-sync")
        .build()?;

    let provider = Arc::new(MemoryProvider::new());
    let mut builder = Engine::builder(Arc::clone(&provider) as Arc<dyn PersistenceProvider>).config(config);
    let world = Collections {
        materials: builder.register::<Material>()?,
        positions: builder.register::<Position>()?,
        health: builder.register::<Health>()?,
        velocities: builder.register::<Velocity>()?,
    };
    let engine = builder.build(runtime.handle())?;

    let damage = Arc::new(DamageLog::default());
    world.health.subscribe(Arc::clone(&damage) as Arc<dyn ComponentObserver<Health>>);
    let reaper = Arc::new(Reaper::default());
    engine.notifier().subscribe(Arc::clone(&reaper) as Arc<dyn EntityObserver>);

    let cancel = CancelToken::new();
    let started = Instant::now();

    let (ticks, steps) = thread::scope(|s| -> Result<(u64, u64), strata::EngineError> {
        let producers: Vec<_> = (0..3)
            .map(|_| s.spawn(|| producer(&engine, &world, &cancel)))
            .collect();

        let timer = s.spawn(|| {
            thread::sleep(Duration::from_secs(seconds));
            cancel.cancel();
        });

        let ticks = engine.run(&cancel, |report| {
            if let Some(cycle) = report.cycle {
                tracing::trace!(cycle, changes = report.flush.component_changes(), "tick committed");
            }
        });
        // Stop producers even if the loop failed.
        cancel.cancel();

        let mut steps = 0;
        for handle in producers {
            steps += handle.join().map_err(|_| strata::EngineError::Config("producer panicked".into()))??;
        }
        let _ = timer.join();
        Ok((ticks?, steps))
    })?;

    let stats = runtime.block_on(engine.shutdown())?;

    tracing::info!(
        seconds = started.elapsed().as_secs_f64(),
        ticks,
        producer_steps = steps,
        health_modifications = damage.modified.load(Ordering::Relaxed),
        entities_removed = reaper.removed.load(Ordering::Relaxed),
        "simulation finished"
    );
    tracing::info!(
        cycles = stats.cycles_persisted,
        rows = stats.rows_written,
        inserted = stats.entities_inserted,
        deleted = stats.entities_deleted,
        buffers_reused = stats.buffers_reused,
        db_entities = provider.entity_count(),
        db_rows = provider.row_count(),
        "persisted state"
    );

    Ok(())
}
