//! The reader/writer-locked slot map.

use std::sync::RwLock;

use crate::key::Key;
use crate::seq::DenseSlotMap;

/// A thread-safe slot map built from a [`DenseSlotMap`] behind a
/// `std::sync::RwLock`.
///
/// Every operation takes the lock for its full duration, so the semantics
/// are exactly the sequential map's. This is the baseline the optimistic
/// variants are measured and tested against: slower under write contention,
/// but with nothing deferred — erased values are gone when `erase` returns,
/// and `len` is always exact.
pub struct LockedSlotMap<T> {
    inner: RwLock<DenseSlotMap<T>>,
}

impl<T> Default for LockedSlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockedSlotMap<T> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map with room for `capacity` values.
    pub fn with_capacity(capacity: u32) -> Self {
        LockedSlotMap {
            inner: RwLock::new(DenseSlotMap::with_capacity(capacity)),
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Returns `true` if the map holds no values.
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// Number of values the map can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap().capacity()
    }

    /// Reserves room for at least `additional` more values.
    pub fn reserve(&self, additional: u32) {
        self.inner.write().unwrap().reserve(additional);
    }

    /// Inserts `value`, returning a key that stays valid until removal.
    pub fn insert(&self, value: T) -> Key {
        self.inner.write().unwrap().insert(value)
    }

    /// Erases the value behind `key`; `true` if it was live.
    pub fn erase(&self, key: Key) -> bool {
        self.inner.write().unwrap().remove(key).is_some()
    }

    /// Removes and returns the value behind `key`.
    pub fn take(&self, key: Key) -> Option<T> {
        self.inner.write().unwrap().remove(key)
    }

    /// Removes every value; all outstanding keys die.
    pub fn clear(&self) {
        self.inner.write().unwrap().clear();
    }

    /// Clones out the value behind `key`, if live.
    pub fn get(&self, key: Key) -> Option<T>
    where
        T: Clone,
    {
        self.inner.read().unwrap().get(key).cloned()
    }

    /// Runs `f` on the value behind `key`, if live.
    pub fn with<R>(&self, key: Key, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.read().unwrap().get(key).map(f)
    }

    /// Runs `f` on the value behind `key` with write access, if live.
    pub fn with_mut<R>(&self, key: Key, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.write().unwrap().get_mut(key).map(f)
    }

    /// Returns `true` while `key` resolves to a value.
    pub fn contains_key(&self, key: Key) -> bool {
        self.inner.read().unwrap().contains_key(key)
    }

    /// Applies `f` to every live value under the read lock.
    pub fn iterate(&self, mut f: impl FnMut(&T)) {
        let map = self.inner.read().unwrap();
        for value in map.values() {
            f(value);
        }
    }

    /// Applies `f` to every live value under the write lock.
    pub fn iterate_mut(&self, mut f: impl FnMut(&mut T)) {
        let mut map = self.inner.write().unwrap();
        for value in map.values_mut() {
            f(value);
        }
    }
}
