//! Per-Key Mutual Exclusion for Resource Managers
//!
//! Container, image and volume managers must never run two mutations against
//! the same resource at once, but operations on *different* resources should
//! not wait on each other.  [`KeyedLock`] hands out exclusive ownership of an
//! arbitrary string key, creating per-key state lazily and reclaiming it from
//! a background reaper thread.
//!
//! Each key owns a single-unit rendezvous token.  Holding the unit means the
//! key is free; taking it acquires the key and giving it back releases it.
//!
//! # Reclamation
//! The reaper drops every key whose waiter count is zero.  It does not look at
//! whether the key is currently held, so a key locked without contention can
//! be reclaimed underneath its holder.  The holder's later `unlock` is then a
//! no-op and the next acquirer of that key is admitted immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::lock_unpoisoned;
use crate::config::KeyedLockConfig;
use crate::stats::{LockMetrics, LockSnapshot};

#[derive(Debug, Default)]
struct TokenState {
    available: bool,
    closed: bool,
}

impl TokenState {
    fn blocks(&self) -> bool {
        !self.available && !self.closed
    }

    /// Consume the unit if one is present. A closed token admits everyone.
    fn take(&mut self) -> bool {
        if self.closed {
            return true;
        }
        if self.available {
            self.available = false;
            return true;
        }
        false
    }
}

/// Capacity-one binary semaphore. Starts empty: whoever created it holds the key.
#[derive(Debug, Default)]
struct Token {
    state: Mutex<TokenState>,
    ready: Condvar,
}

impl Token {
    fn try_take(&self) -> bool {
        lock_unpoisoned(&self.state).take()
    }

    fn take(&self) {
        let state = lock_unpoisoned(&self.state);
        let mut state = self
            .ready
            .wait_while(state, |s| s.blocks())
            .unwrap_or_else(PoisonError::into_inner);
        state.take();
    }

    fn take_timeout(&self, timeout: Duration) -> bool {
        let state = lock_unpoisoned(&self.state);
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.blocks())
            .unwrap_or_else(PoisonError::into_inner);
        state.take()
    }

    /// Deposit the unit. Returns `false` if one was already present or the
    /// token is closed.
    fn give(&self) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        if state.closed || state.available {
            return false;
        }
        state.available = true;
        self.ready.notify_one();
        true
    }

    fn close(&self) {
        lock_unpoisoned(&self.state).closed = true;
        self.ready.notify_all();
    }
}

#[derive(Debug, Default)]
struct KeyState {
    token: Token,
    /// Only mutated while the table mutex is held.
    waiters: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    table: Mutex<HashMap<String, Arc<KeyState>>>,
    metrics: LockMetrics,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<KeyState>>> {
        lock_unpoisoned(&self.table)
    }

    /// Fast path for a brand-new key, otherwise register as a waiter and hand
    /// back the key's state to block on.
    fn enter_wait(&self, key: &str) -> Option<Arc<KeyState>> {
        let mut table = self.table();
        match table.get(key) {
            Some(state) => {
                state.waiters.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(state))
            }
            None => {
                table.insert(key.to_owned(), Arc::default());
                None
            }
        }
    }

    fn leave_wait(&self, state: &KeyState) {
        let _table = self.table();
        state.waiters.fetch_sub(1, Ordering::Relaxed);
    }

    fn reap(&self) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, state| {
            if state.waiters.load(Ordering::Relaxed) == 0 {
                state.token.close();
                false
            } else {
                true
            }
        });
        let reaped = before - table.len();
        if reaped > 0 {
            self.metrics.record_reaped(reaped);
        }
        debug!(reaped, remaining = table.len(), "Keyed lock reaper sweep");
        reaped
    }
}

/// Background thread that sweeps idle keys at a fixed interval.
#[derive(Debug)]
struct Reaper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> Option<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name("keyed-lock-reaper".to_string())
            .spawn(move || {
                let (flag, wake) = &*signal;
                let mut stopped = lock_unpoisoned(flag);
                loop {
                    let (guard, _) = wake
                        .wait_timeout_while(stopped, interval, |s| !*s)
                        .unwrap_or_else(PoisonError::into_inner);
                    stopped = guard;
                    if *stopped {
                        break;
                    }
                    shared.reap();
                }
                trace!("Keyed lock reaper exiting");
            });

        match spawned {
            Ok(handle) => Some(Self {
                stop,
                handle: Some(handle),
            }),
            Err(e) => {
                warn!(error = %e, "Failed to spawn keyed lock reaper; idle keys will not be reclaimed");
                None
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        let (flag, wake) = &*self.stop;
        *lock_unpoisoned(flag) = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Keyed lock reaper panicked");
            }
        }
    }
}

/// Grants at most one holder per key, independently for every key.
///
/// Pair every successful acquisition with [`unlock`](Self::unlock) on all code
/// paths, or use the [`guard`](Self::guard) helpers.  Unlocking a key that is
/// not held is a silent no-op.
///
/// # Performance Pattern: Short Table Critical Sections
/// The table mutex only covers lookups, inserts and waiter bookkeeping.
/// Callers block on the key's own token, never on the table.
///
/// ```rust,no_run
/// # use enviro_sync::KeyedLock;
/// let locks = KeyedLock::new();
/// if locks.lock("ctr-1") {
///     // mutate container state
///     locks.unlock("ctr-1");
/// }
/// ```
#[derive(Debug)]
pub struct KeyedLock {
    shared: Arc<Shared>,
    _reaper: Option<Reaper>,
}

impl KeyedLock {
    /// Create a lock table with the default one-minute reaper.
    pub fn new() -> Self {
        Self::with_config(KeyedLockConfig::default())
    }

    /// Create a lock table; a zero interval leaves reclamation to [`reap`](Self::reap).
    pub fn with_config(config: KeyedLockConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let reaper = config.reap_interval().and_then(|interval| {
            info!(interval_ms = interval.as_millis() as u64, "Starting keyed lock reaper");
            Reaper::spawn(Arc::clone(&shared), interval)
        });
        Self {
            shared,
            _reaper: reaper,
        }
    }

    /// Acquire `key` without blocking. Returns `false` if it is currently held.
    pub fn try_lock(&self, key: &str) -> bool {
        let mut table = self.shared.table();
        let acquired = match table.get(key) {
            Some(state) => state.token.try_take(),
            None => {
                table.insert(key.to_owned(), Arc::default());
                true
            }
        };
        if acquired {
            self.shared.metrics.record_uncontended();
        } else {
            self.shared.metrics.record_try_miss();
            trace!(key, "try_lock found key held");
        }
        acquired
    }

    /// Acquire `key`, blocking until it is released. Always returns `true`.
    pub fn lock(&self, key: &str) -> bool {
        let Some(state) = self.shared.enter_wait(key) else {
            self.shared.metrics.record_uncontended();
            return true;
        };
        state.token.take();
        self.shared.leave_wait(&state);
        self.shared.metrics.record_contended();
        true
    }

    /// Acquire `key`, giving up after `timeout`.
    ///
    /// Returns `false` when the timer wins; the waiter registration is undone
    /// on both paths.
    pub fn lock_with_timeout(&self, key: &str, timeout: Duration) -> bool {
        let Some(state) = self.shared.enter_wait(key) else {
            self.shared.metrics.record_uncontended();
            return true;
        };
        let acquired = state.token.take_timeout(timeout);
        self.shared.leave_wait(&state);
        if acquired {
            self.shared.metrics.record_contended();
        } else {
            self.shared.metrics.record_timeout();
            debug!(key, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for key");
        }
        acquired
    }

    /// Release `key`. No-op if the key is unknown or already released.
    pub fn unlock(&self, key: &str) {
        let table = self.shared.table();
        if let Some(state) = table.get(key) {
            if state.token.give() {
                self.shared.metrics.record_unlock();
            }
        }
    }

    /// Run one reclamation sweep now, returning how many keys were dropped.
    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    /// [`lock`](Self::lock) wrapped in a guard that unlocks on drop.
    pub fn guard(&self, key: &str) -> KeyGuard<'_> {
        self.lock(key);
        KeyGuard::new(self, key)
    }

    pub fn try_guard(&self, key: &str) -> Option<KeyGuard<'_>> {
        self.try_lock(key).then(|| KeyGuard::new(self, key))
    }

    pub fn guard_with_timeout(&self, key: &str, timeout: Duration) -> Option<KeyGuard<'_>> {
        self.lock_with_timeout(key, timeout)
            .then(|| KeyGuard::new(self, key))
    }

    /// Number of keys with live bookkeeping.
    pub fn len(&self) -> usize {
        self.shared.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.table().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.table().contains_key(key)
    }

    /// Callers currently blocked on `key`, or `None` if it has no bookkeeping.
    pub fn waiters(&self, key: &str) -> Option<usize> {
        self.shared
            .table()
            .get(key)
            .map(|state| state.waiters.load(Ordering::Relaxed))
    }

    pub fn metrics(&self) -> LockSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a key of a [`KeyedLock`] until dropped.
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLock,
    key: String,
}

impl<'a> KeyGuard<'a> {
    fn new(locks: &'a KeyedLock, key: &str) -> Self {
        Self {
            locks,
            key: key.to_owned(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Instant;

    fn manual() -> KeyedLock {
        KeyedLock::with_config(KeyedLockConfig::manual_reap())
    }

    /// Spin until `key` has `n` parked waiters.
    fn wait_for_waiters(locks: &KeyedLock, key: &str, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while locks.waiters(key) != Some(n) {
            assert!(Instant::now() < deadline, "waiters on {key} never reached {n}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_first_try_lock_is_free() {
        let locks = manual();
        assert!(locks.try_lock("ctr-1"));
        assert!(locks.contains("ctr-1"));
        assert_eq!(locks.waiters("ctr-1"), Some(0));
    }

    #[test]
    fn test_try_lock_while_held() {
        let locks = manual();
        assert!(locks.try_lock("ctr-1"));
        assert!(!locks.try_lock("ctr-1"));

        locks.unlock("ctr-1");
        assert!(locks.try_lock("ctr-1"));
        assert_eq!(locks.metrics().try_misses, 1);
    }

    #[test]
    fn test_unlock_unknown_key_is_noop() {
        let locks = manual();
        locks.unlock("ghost");
        assert!(locks.is_empty());
        assert_eq!(locks.metrics().unlocks, 0);
    }

    #[test]
    fn test_double_unlock_deposits_once() {
        let locks = manual();
        assert!(locks.lock("vol"));
        locks.unlock("vol");
        locks.unlock("vol");

        assert!(locks.try_lock("vol"));
        assert!(!locks.try_lock("vol"));
        assert_eq!(locks.metrics().unlocks, 1);
    }

    #[test]
    fn test_lock_blocks_until_unlock() {
        let locks = Arc::new(manual());
        assert!(locks.lock("img"));

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let start = Instant::now();
                assert!(locks.lock("img"));
                start.elapsed()
            })
        };

        wait_for_waiters(&locks, "img", 1);
        thread::sleep(Duration::from_millis(50));
        locks.unlock("img");

        let waited = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(50));
        assert_eq!(locks.waiters("img"), Some(0));
        assert!(!locks.try_lock("img"), "waiter should now hold the key");
        assert_eq!(locks.metrics().contended, 1);
    }

    #[test]
    fn test_timeout_returns_false_and_clears_waiter() {
        let locks = manual();
        assert!(locks.lock("net"));

        let start = Instant::now();
        assert!(!locks.lock_with_timeout("net", Duration::from_millis(100)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(locks.waiters("net"), Some(0));
        assert_eq!(locks.metrics().timeouts, 1);

        locks.unlock("net");
        assert!(locks.lock("net"));
    }

    #[test]
    fn test_timeout_acquires_when_released_in_time() {
        let locks = Arc::new(manual());
        assert!(locks.lock("ctr"));

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.lock_with_timeout("ctr", Duration::from_secs(5)))
        };

        wait_for_waiters(&locks, "ctr", 1);
        locks.unlock("ctr");
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let locks = Arc::new(manual());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    locks.lock_with_timeout(&format!("ctr-{i}"), Duration::from_millis(100))
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(locks.len(), 8);
        assert_eq!(locks.metrics().uncontended, 8);
    }

    #[test]
    fn test_reap_skips_keys_with_waiters() {
        let locks = Arc::new(manual());
        assert!(locks.lock("busy"));
        assert!(locks.lock("idle"));
        locks.unlock("idle");

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.lock("busy"))
        };
        wait_for_waiters(&locks, "busy", 1);

        assert_eq!(locks.reap(), 1);
        assert!(locks.contains("busy"));
        assert!(!locks.contains("idle"));

        locks.unlock("busy");
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_reap_reclaims_held_key_without_waiters() {
        // The sweep only checks the waiter count, so an uncontended holder
        // loses its bookkeeping and a second caller is admitted.
        let locks = manual();
        assert!(locks.try_lock("ctr"));
        assert_eq!(locks.reap(), 1);
        assert!(!locks.contains("ctr"));

        assert!(locks.try_lock("ctr"), "reclaimed key admits a second holder");
        assert_eq!(locks.metrics().reaped, 1);
    }

    #[test]
    fn test_closed_token_never_blocks() {
        let token = Token::default();
        assert!(!token.try_take());
        token.close();
        assert!(token.try_take());
        assert!(token.take_timeout(Duration::from_millis(10)));
        assert!(!token.give());
    }

    #[test]
    fn test_background_reaper_sweeps() {
        let locks = KeyedLock::with_config(KeyedLockConfig::with_interval(Duration::from_millis(20)));
        assert!(locks.lock("tmp"));
        locks.unlock("tmp");

        let deadline = Instant::now() + Duration::from_secs(5);
        while locks.contains("tmp") {
            assert!(Instant::now() < deadline, "reaper never reclaimed the key");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_drop_stops_reaper_promptly() {
        let locks = KeyedLock::new();
        assert!(locks.try_lock("a"));
        let start = Instant::now();
        drop(locks);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = manual();
        {
            let guard = locks.guard("ctr");
            assert_eq!(guard.key(), "ctr");
            assert!(locks.try_guard("ctr").is_none());
        }
        let again = locks.try_guard("ctr");
        assert!(again.is_some());
        assert!(locks
            .guard_with_timeout("ctr", Duration::from_millis(10))
            .is_none());
    }
}
