//! Counters for lock and buffer activity
//!
//! Every [`KeyedLock`](crate::KeyedLock) and [`RingBuffer`](crate::RingBuffer)
//! owns one of these trackers and bumps it on its operation paths.
//!
//! # Design Goals:
//! - Lock-free atomic counters
//! - No allocation when recording
//! - Snapshots are plain serde structs so the daemon can emit them as JSON

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Activity counters for a [`KeyedLock`](crate::KeyedLock).
#[derive(Debug, Default)]
pub struct LockMetrics {
    uncontended: AtomicU64,
    contended: AtomicU64,
    try_misses: AtomicU64,
    timeouts: AtomicU64,
    unlocks: AtomicU64,
    reaped: AtomicU64,
}

impl LockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-ever acquisition of a key, or a token taken without waiting.
    pub fn record_uncontended(&self) {
        bump(&self.uncontended);
    }

    /// Acquisition that had to wait for the token.
    pub fn record_contended(&self) {
        bump(&self.contended);
    }

    /// `try_lock` found the key held.
    pub fn record_try_miss(&self) {
        bump(&self.try_misses);
    }

    pub fn record_timeout(&self) {
        bump(&self.timeouts);
    }

    /// An unlock that actually deposited a token.
    pub fn record_unlock(&self) {
        bump(&self.unlocks);
    }

    pub fn record_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            uncontended: self.uncontended.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            try_misses: self.try_misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unlocks: self.unlocks.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.uncontended,
            &self.contended,
            &self.try_misses,
            &self.timeouts,
            &self.unlocks,
            &self.reaped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`LockMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockSnapshot {
    pub uncontended: u64,
    pub contended: u64,
    pub try_misses: u64,
    pub timeouts: u64,
    pub unlocks: u64,
    pub reaped: u64,
}

impl LockSnapshot {
    /// Total successful acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.uncontended + self.contended
    }

    /// Share of acquisitions that had to wait, as a percentage.
    pub fn contention_rate(&self) -> f64 {
        let total = self.acquisitions();
        if total == 0 {
            return 0.0;
        }
        (self.contended as f64) / (total as f64) * 100.0
    }
}

/// Activity counters for a [`RingBuffer`](crate::RingBuffer).
#[derive(Debug, Default)]
pub struct RingMetrics {
    pushes: AtomicU64,
    overwrites: AtomicU64,
    dropped: AtomicU64,
    pops: AtomicU64,
}

impl RingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A value was stored; `overwrote` marks whether an unread one was lost.
    pub fn record_push(&self, overwrote: bool) {
        bump(&self.pushes);
        if overwrote {
            bump(&self.overwrites);
        }
    }

    /// A push arrived after close and was discarded.
    pub fn record_dropped(&self) {
        bump(&self.dropped);
    }

    pub fn record_pop(&self) {
        bump(&self.pops);
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            pushes: self.pushes.load(Ordering::Relaxed),
            overwrites: self.overwrites.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [&self.pushes, &self.overwrites, &self.dropped, &self.pops] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// A point-in-time copy of [`RingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingSnapshot {
    pub pushes: u64,
    pub overwrites: u64,
    pub dropped: u64,
    pub pops: u64,
}

impl RingSnapshot {
    /// Percentage of stored values that were lost to overwrite.
    pub fn loss_rate(&self) -> f64 {
        if self.pushes == 0 {
            return 0.0;
        }
        (self.overwrites as f64) / (self.pushes as f64) * 100.0
    }
}
