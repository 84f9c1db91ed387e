//! Bounded, Lossy Hand-off Between a Producer and Its Consumers
//!
//! Event, log and stats streams must never stall the component that produces
//! them.  [`RingBuffer`] keeps a fixed number of slots; when the consumer falls
//! behind, a push overwrites the oldest unread value instead of waiting.
//! Consumers block in [`RingBuffer::pop`] until a value arrives or the buffer
//! is closed.
//!
//! # Performance-First Design:
//! - All slots are allocated once at construction
//! - One mutex guards cursors and slots; parked consumers wait on a `Condvar`
//! - Producers never block on a slow consumer

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use super::lock_unpoisoned;
use crate::error::{Result, SyncError};
use crate::stats::{RingMetrics, RingSnapshot};

#[derive(Debug)]
struct Ring<T> {
    slots: Box<[Option<T>]>,
    /// Slot the next push writes.
    push: usize,
    /// Slot the next pop reads.
    pop: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            push: 0,
            pop: 0,
            len: 0,
            closed: false,
        }
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    /// Store `value` at the push cursor. Returns `(overwrote, was_empty)`.
    fn store(&mut self, value: T) -> (bool, bool) {
        let at = self.push;
        let overwrote = self.slots[at].replace(value).is_some();
        let was_empty = !overwrote && at == self.pop;
        if overwrote {
            // A full ring has push == pop: the oldest value is gone, so the
            // read cursor moves on to the next-oldest.
            self.pop = self.next(at);
        } else {
            self.len += 1;
        }
        self.push = self.next(at);
        (overwrote, was_empty)
    }

    fn take_front(&mut self) -> Option<T> {
        let value = self.slots[self.pop].take()?;
        self.pop = self.next(self.pop);
        self.len -= 1;
        Some(value)
    }

    fn has_front(&self) -> bool {
        self.slots[self.pop].is_some()
    }
}

/// Fixed-capacity circular buffer with overwrite-on-full pushes and blocking pops.
///
/// Intended for one producer calling [`push`](Self::push) and one or more
/// consumers calling [`pop`](Self::pop) until it reports `closed`.  Each value
/// is delivered to exactly one `pop`, in push order, unless it was overwritten
/// first.
///
/// ```rust,no_run
/// # use enviro_sync::RingBuffer;
/// let events = RingBuffer::new(128);
/// events.push("container started");
/// let (event, closed) = events.pop();
/// ```
#[derive(Debug)]
pub struct RingBuffer<T> {
    ring: Mutex<Ring<T>>,
    available: Condvar,
    capacity: usize,
    metrics: RingMetrics,
}

impl<T> RingBuffer<T> {
    /// Allocate a buffer with exactly `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero. Use [`try_new`](Self::try_new) for
    /// capacities coming from configuration.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be greater than zero");
        debug!(capacity, "Creating RingBuffer");
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            metrics: RingMetrics::new(),
        }
    }

    pub fn try_new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidCapacity);
        }
        Ok(Self::new(capacity))
    }

    fn ring(&self) -> MutexGuard<'_, Ring<T>> {
        lock_unpoisoned(&self.ring)
    }

    /// Write `value` into the next slot.
    ///
    /// Returns `true` if an unread value was overwritten.  After
    /// [`close`](Self::close) the value is dropped and `false` is returned.
    pub fn push(&self, value: T) -> bool {
        let mut ring = self.ring();
        if ring.closed {
            self.metrics.record_dropped();
            trace!("Push after close dropped");
            return false;
        }

        let (overwrote, was_empty) = ring.store(value);
        drop(ring);

        self.metrics.record_push(overwrote);
        if overwrote {
            trace!("RingBuffer full, oldest value overwritten");
        }
        if was_empty {
            self.available.notify_one();
        }
        overwrote
    }

    /// Take the oldest unread value, blocking while the buffer is empty and open.
    ///
    /// Returns `(value, closed)`.  A value popped from a closed buffer is still
    /// returned alongside `closed == true`; once drained, `(None, true)`.
    pub fn pop(&self) -> (Option<T>, bool) {
        let mut ring = self.ring();
        loop {
            if let Some(value) = ring.take_front() {
                let more = ring.has_front();
                let closed = ring.closed;
                drop(ring);

                self.metrics.record_pop();
                if more && !closed {
                    // Pass the wake-up along so a burst reaches every parked consumer.
                    self.available.notify_one();
                }
                return (Some(value), closed);
            }
            if ring.closed {
                return (None, true);
            }
            ring = self
                .available
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take the oldest unread value without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let value = self.ring().take_front();
        if value.is_some() {
            self.metrics.record_pop();
        }
        value
    }

    /// Mark the buffer closed and wake every parked consumer. Always succeeds.
    pub fn close(&self) -> Result<()> {
        let mut ring = self.ring();
        let already = ring.closed;
        ring.closed = true;
        let unread = ring.len;
        drop(ring);

        self.available.notify_all();
        if !already {
            debug!(unread, "RingBuffer closed");
        }
        Ok(())
    }

    /// Number of unread values.
    pub fn len(&self) -> usize {
        self.ring().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.ring().closed
    }

    pub fn metrics(&self) -> RingSnapshot {
        self.metrics.snapshot()
    }
}
