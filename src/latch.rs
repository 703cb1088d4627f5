//! Spin latches for separating erasure from everything else.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

/// State value marking exclusive ownership; anything below it is a reader
/// count.
const WRITER: usize = usize::MAX;

/// A reader/writer spin latch.
///
/// Shared mode is taken by inserts, reads, and iteration; exclusive mode
/// only by the erase-queue drain. Readers never wait for a *pending* writer,
/// only for one that already holds the latch, so shared acquisition cannot
/// deadlock against itself and a reader-heavy workload simply starves the
/// drain (which is opportunistic anyway).
pub(crate) struct RwLatch {
    state: AtomicUsize,
}

impl RwLatch {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// Acquire shared mode. Spins only while a drain holds the latch.
    #[inline]
    pub(crate) fn shared(&self) -> SharedGuard<'_> {
        let backoff = Backoff::new();
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state != WRITER
                && self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return SharedGuard { latch: self };
            }
            backoff.snooze();
        }
    }

    /// Acquire exclusive mode, waiting out all readers.
    pub(crate) fn exclusive(&self) -> ExclusiveGuard<'_> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_exclusive() {
                return guard;
            }
            backoff.snooze();
        }
    }

    /// Attempt exclusive mode without waiting.
    #[inline]
    pub(crate) fn try_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        if self
            .state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(ExclusiveGuard { latch: self })
        } else {
            None
        }
    }
}

/// RAII shared-mode guard. Releases on drop.
pub(crate) struct SharedGuard<'a> {
    latch: &'a RwLatch,
}

impl Drop for SharedGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.latch.state.fetch_sub(1, Ordering::Release);
    }
}

/// RAII exclusive-mode guard. Releases on drop.
pub(crate) struct ExclusiveGuard<'a> {
    latch: &'a RwLatch,
}

impl Drop for ExclusiveGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.latch.state.store(0, Ordering::Release);
    }
}

/// A TTAS (Test-Test-And-Set) spin lock serializing the grow path.
pub(crate) struct SpinLock {
    acquired: AtomicBool,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        Self {
            acquired: AtomicBool::new(false),
        }
    }

    /// Acquire the lock.
    #[inline]
    pub(crate) fn lock(&self) -> SpinGuard<'_> {
        let backoff = Backoff::new();
        loop {
            // Test phase: spin on relaxed load (stays in cache)
            while self.acquired.load(Ordering::Relaxed) {
                backoff.snooze();
            }
            // Test-and-set phase: attempt to acquire
            if !self.acquired.swap(true, Ordering::Acquire) {
                return SpinGuard { lock: self };
            }
        }
    }
}

/// RAII guard for [`SpinLock`]. Releases the lock on drop.
pub(crate) struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.acquired.store(false, Ordering::Release);
    }
}

/// A shared borrow of a value in a concurrent slot map.
///
/// Holds the map's erase latch in shared mode, which pins out the relocating
/// drain without excluding other readers, inserters, or iterators. Drop the
/// guard before calling a blocking drain on the same thread.
pub struct ValueRef<'a, T> {
    value: &'a T,
    _guard: SharedGuard<'a>,
}

impl<'a, T> ValueRef<'a, T> {
    pub(crate) fn new(value: &'a T, guard: SharedGuard<'a>) -> Self {
        Self {
            value,
            _guard: guard,
        }
    }
}

impl<T> Deref for ValueRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: fmt::Display> fmt::Display for ValueRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: PartialEq> PartialEq<T> for ValueRef<'_, T> {
    fn eq(&self, other: &T) -> bool {
        self.value == other
    }
}
