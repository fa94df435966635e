//! # Synchronization Primitives
//!
//! ## The Problem
//!
//! ```text
//! Systems (many threads):  WRITE to different component types
//! Tick thread (one):       COMMIT a consistent snapshot, once per tick
//!
//! With one Mutex per world:  every system serializes on every other
//! With no coordination:      the commit sees half-applied writes
//! ```
//!
//! ## The Solution: Weak/Strong Epochs
//!
//! Systems take cheap *weak* locks that never exclude each other. The tick
//! thread takes the *strong* lock, which drains the weak holders and runs
//! alone. That single exclusion point is the commit boundary.

mod guard;

pub use guard::{ConcurrencyGuard, StrongLock, WeakLock};
