//! Integration tests for concurrent producer systems against one registry.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use strata_core::{
    BlockIssuer, CollectSink, ComponentCollection, ComponentObserver, ComponentRegistry,
    ConcurrencyGuard, EntityId, EntityNotifier, Health, Material, Position, UpdateKind, WeakLock,
};

struct World {
    guard: Arc<ConcurrencyGuard>,
    registry: ComponentRegistry,
    materials: Arc<ComponentCollection<Material>>,
    positions: Arc<ComponentCollection<Position>>,
    health: Arc<ComponentCollection<Health>>,
}

fn world() -> World {
    let guard = Arc::new(ConcurrencyGuard::new());
    let notifier = Arc::new(EntityNotifier::new(Arc::clone(&guard)));
    let mut registry = ComponentRegistry::new(Arc::clone(&guard), notifier);
    let materials = Arc::new(ComponentCollection::new(Arc::clone(&guard)));
    let positions = Arc::new(ComponentCollection::new(Arc::clone(&guard)));
    let health = Arc::new(ComponentCollection::new(Arc::clone(&guard)));
    registry.register(&materials).unwrap();
    registry.register(&positions).unwrap();
    registry.register(&health).unwrap();
    World {
        guard,
        registry,
        materials,
        positions,
        health,
    }
}

#[derive(Default)]
struct MaterialLog {
    events: Mutex<Vec<(&'static str, EntityId, u16)>>,
}

impl ComponentObserver<Material> for MaterialLog {
    fn on_add(&self, entity: EntityId, value: &Material) {
        self.events.lock().push(("add", entity, value.id));
    }
    fn on_modify(&self, entity: EntityId, value: &Material) {
        self.events.lock().push(("modify", entity, value.id));
    }
    fn on_remove(&self, entity: EntityId, value: &Material) {
        self.events.lock().push(("remove", entity, value.id));
    }
}

struct Overlap {
    inside: AtomicUsize,
    peak: AtomicUsize,
    barrier: Barrier,
}

impl Overlap {
    fn hold<F: FnOnce(&WeakLock<'_>)>(&self, guard: &ConcurrencyGuard, body: F) {
        let weak = guard.weak();
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        body(&weak);
        // Every system waits for the others while still holding its lock.
        self.barrier.wait();
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_weak_holders_on_different_collections_overlap() {
    let w = world();
    let e = EntityId::new(300, 1);
    let overlap = Overlap {
        inside: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        barrier: Barrier::new(3),
    };

    thread::scope(|s| {
        s.spawn(|| overlap.hold(&w.guard, |weak| w.materials.set(weak, e, Material::new(1))));
        s.spawn(|| overlap.hold(&w.guard, |weak| w.positions.set(weak, e, Position::new(1.0, 2.0, 3.0))));
        s.spawn(|| overlap.hold(&w.guard, |weak| w.health.set(weak, e, Health::full(10))));
    });

    assert_eq!(overlap.peak.load(Ordering::SeqCst), 3);
    let report = w.registry.flush_all_pending(&mut CollectSink::default());
    assert_eq!(report.added, 3);
}

#[test]
fn test_flush_never_overlaps_producers() {
    let w = world();
    let issuer = BlockIssuer::new();
    let active = AtomicUsize::new(0);
    let overlap = AtomicBool::new(false);
    let stop = AtomicBool::new(false);
    let flushes = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..4 {
            let mut assigner = issuer.assigner().unwrap();
            let (w, active, stop) = (&w, &active, &stop);
            s.spawn(move || {
                let mut written = 0;
                while !stop.load(Ordering::Relaxed) && written < 20_000 {
                    written += 1;
                    let entity = assigner.next_id().unwrap();
                    let weak = w.guard.weak();
                    active.fetch_add(1, Ordering::SeqCst);
                    w.materials.set(&weak, entity, Material::new(3));
                    w.positions.set(&weak, entity, Position::new(0.0, 1.0, 0.0));
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            let strong = w.guard.strong();
            if active.load(Ordering::SeqCst) != 0 {
                overlap.store(true, Ordering::SeqCst);
            }
            w.registry.flush_locked(&strong, &mut CollectSink::default());
            drop(strong);
            flushes.fetch_add(1, Ordering::Relaxed);
        }
        stop.store(true, Ordering::Relaxed);
    });

    let mut sink = CollectSink::default();
    w.registry.flush_all_pending(&mut sink);

    assert!(!overlap.load(Ordering::SeqCst));
    assert!(flushes.load(Ordering::Relaxed) > 0);
    assert!(!w.registry.has_pending());
    assert_eq!(w.materials.len(), w.positions.len());
}

#[test]
fn test_add_then_last_write_wins() {
    let w = world();
    let log = Arc::new(MaterialLog::default());
    w.materials.subscribe(Arc::clone(&log) as Arc<dyn ComponentObserver<Material>>);
    let e1 = EntityId::new(1, 1);

    {
        let weak = w.guard.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    let mut sink = CollectSink::default();
    w.registry.flush_all_pending(&mut sink);
    assert_eq!(*log.events.lock(), vec![("add", e1, 7)]);
    assert_eq!(w.materials.get(e1), Some(Material::new(7)));
    assert_eq!(sink.updates[0].kind, UpdateKind::Add);

    {
        let weak = w.guard.weak();
        w.materials.set(&weak, e1, Material::new(8));
        w.materials.set(&weak, e1, Material::new(9));
    }
    let mut sink = CollectSink::default();
    let report = w.registry.flush_all_pending(&mut sink);

    assert_eq!(report.modified, 1);
    assert_eq!(log.events.lock().last(), Some(&("modify", e1, 9)));
    assert_eq!(log.events.lock().len(), 2);
    assert_eq!(sink.updates.len(), 1);
    assert_eq!(sink.updates[0].value, bytemuck::bytes_of(&Material::new(9)).to_vec());
}

#[test]
fn test_freed_slot_reused_by_new_entity() {
    let w = world();
    let e1 = EntityId::new(1, 1);
    let e2 = EntityId::new(1, 2);

    {
        let weak = w.guard.weak();
        w.materials.set(&weak, e1, Material::new(7));
    }
    w.registry.flush_all_pending(&mut CollectSink::default());
    let slot = w.materials.slot_of(e1);

    {
        let weak = w.guard.weak();
        assert_eq!(w.registry.remove_entity(&weak, e1), 1);
        w.materials.set(&weak, e2, Material::new(11));
    }

    assert_eq!(w.materials.slot_of(e2), slot);
    assert_eq!(w.materials.slot_of(e1), None);
    assert_eq!(w.materials.get(e1), None);
    assert_eq!(w.materials.get(e2), Some(Material::new(11)));

    {
        let weak = w.guard.weak();
        w.materials.set(&weak, e1, Material::new(2));
    }
    assert_eq!(w.materials.get(e1), Some(Material::new(2)));
    assert_ne!(w.materials.slot_of(e1), w.materials.slot_of(e2));
}
