//! Sync module - Concurrency primitives shared by the engine's managers
//!
//! [`KeyedLock`] serialises work per resource ID (container, image, volume)
//! while unrelated resources proceed in parallel.  [`RingBuffer`] sits between
//! an event, log or stats producer and a slower consumer.

pub mod keyed_lock;
pub mod ring_buffer;

pub use keyed_lock::{KeyGuard, KeyedLock};
pub use ring_buffer::RingBuffer;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, taking the guard back out of a poisoned lock.
///
/// None of the primitives' operations may fail, and every critical section
/// leaves the guarded state consistent before anything that could panic.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
