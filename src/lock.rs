// src/lock.rs

//! Poison-ignoring mutex acquisition shared by the endpoint layers.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Mutex poisoning indicates that another task panicked while holding the
/// lock. The state protected by locks in this crate (sink registries,
/// endpoint collections, worker handles) carries no invariants spanning
/// multiple fields; the worst outcome of continuing is a dropped
/// notification. Ignoring poisoning also avoids propagating non-`Send`
/// poison errors across async boundaries.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
