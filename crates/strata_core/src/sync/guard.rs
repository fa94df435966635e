//! # Concurrency Guard
//!
//! Epoch-style weak/strong lock shared by every component collection.
//!
//! ## Protocol
//!
//! ```text
//!   System A ──weak──┐
//!   System B ──weak──┼──> [ holders: N ] ──drain──> [ STRONG: commit ] ──> release
//!   System C ──weak──┘         ▲                          │
//!                              └──── blocked while ───────┘
//!                                    strong is pending
//! ```
//!
//! - Weak holders never exclude each other. They mutate disjoint data and
//!   rely on each collection's internal bookkeeping for atomicity.
//! - A strong request raises the pending flag, waits for the holder count
//!   to drain to zero, then runs alone until dropped.
//! - New weak acquisitions block while a strong lock is pending or held.
//!
//! A thread holding a weak lock must never request the strong lock (or a
//! second weak lock while a strong request may be pending): it would wait
//! on itself.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Weak/strong synchronization primitive.
///
/// Weak holders are counted on an atomic epoch counter; the strong holder
/// is serialized by an internal mutex and gated by a pending flag.
pub struct ConcurrencyGuard {
    /// Number of active weak holders.
    holders: AtomicUsize,
    /// Set while a strong lock is requested or held.
    strong_pending: AtomicBool,
    /// Completed strong sections.
    epoch: AtomicU64,
    /// Serializes strong holders.
    strong: Mutex<()>,
    /// Parking lot for both sides.
    gate: Mutex<()>,
    /// Signalled on last weak release and on strong release.
    changed: Condvar,
}

impl ConcurrencyGuard {
    /// Creates an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self {
            holders: AtomicUsize::new(0),
            strong_pending: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            strong: Mutex::new(()),
            gate: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    /// Acquires a weak lock, blocking only while a strong lock is pending
    /// or held.
    #[must_use]
    pub fn weak(&self) -> WeakLock<'_> {
        loop {
            if self.strong_pending.load(Ordering::SeqCst) {
                let mut gate = self.gate.lock();
                while self.strong_pending.load(Ordering::SeqCst) {
                    self.changed.wait(&mut gate);
                }
            }

            if let Some(lock) = self.try_weak() {
                return lock;
            }
        }
    }

    /// Acquires a weak lock without blocking.
    ///
    /// Returns `None` if a strong lock is pending or held.
    #[must_use]
    pub fn try_weak(&self) -> Option<WeakLock<'_>> {
        if self.strong_pending.load(Ordering::SeqCst) {
            return None;
        }

        self.holders.fetch_add(1, Ordering::SeqCst);

        // A strong request may have slipped in between the check and the
        // increment. Back out so it can drain.
        if self.strong_pending.load(Ordering::SeqCst) {
            self.release_weak();
            return None;
        }

        Some(WeakLock { guard: self })
    }

    /// Acquires the strong lock.
    ///
    /// Blocks new weak acquisitions immediately, then waits until every
    /// weak holder active at request time has released.
    #[must_use]
    pub fn strong(&self) -> StrongLock<'_> {
        let serial = self.strong.lock();
        self.strong_pending.store(true, Ordering::SeqCst);

        let mut gate = self.gate.lock();
        while self.holders.load(Ordering::SeqCst) != 0 {
            self.changed.wait(&mut gate);
        }
        drop(gate);

        StrongLock {
            guard: self,
            _serial: serial,
        }
    }

    /// Returns the number of active weak holders.
    #[inline]
    #[must_use]
    pub fn weak_holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    /// Returns whether a strong lock is pending or held.
    #[inline]
    #[must_use]
    pub fn is_strong_pending(&self) -> bool {
        self.strong_pending.load(Ordering::SeqCst)
    }

    /// Returns the number of completed strong sections.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn release_weak(&self) {
        let previous = self.holders.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "weak lock released more often than acquired");

        if previous == 1 && self.strong_pending.load(Ordering::SeqCst) {
            let _gate = self.gate.lock();
            self.changed.notify_all();
        }
    }

    fn release_strong(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.strong_pending.store(false, Ordering::SeqCst);

        let _gate = self.gate.lock();
        self.changed.notify_all();
    }
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConcurrencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGuard")
            .field("weak_holders", &self.weak_holders())
            .field("strong_pending", &self.is_strong_pending())
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Proof of a weak acquisition. Released on drop.
#[must_use = "the weak lock is released as soon as it is dropped"]
pub struct WeakLock<'a> {
    guard: &'a ConcurrencyGuard,
}

impl WeakLock<'_> {
    /// Returns whether this lock was taken on `guard`.
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, guard: &ConcurrencyGuard) -> bool {
        std::ptr::eq(self.guard, guard)
    }
}

impl Drop for WeakLock<'_> {
    fn drop(&mut self) {
        self.guard.release_weak();
    }
}

/// Proof of the exclusive strong acquisition. Released on drop.
#[must_use = "the strong lock is released as soon as it is dropped"]
pub struct StrongLock<'a> {
    guard: &'a ConcurrencyGuard,
    _serial: MutexGuard<'a, ()>,
}

impl StrongLock<'_> {
    /// Returns whether this lock was taken on `guard`.
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, guard: &ConcurrencyGuard) -> bool {
        std::ptr::eq(self.guard, guard)
    }

    /// Epoch this strong section will complete.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.guard.epoch() + 1
    }
}

impl Drop for StrongLock<'_> {
    fn drop(&mut self) {
        self.guard.release_strong();
    }
}
