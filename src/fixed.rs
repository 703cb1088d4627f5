//! The fixed-capacity lock-free slot map.

use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use petek_vec::CacheAligned;

use crate::error::Error;
use crate::key::{Key, NIL};
use crate::latch::{RwLatch, ValueRef};
use crate::slot::{pack_head, unpack_head, Slot};

/// A concurrent slot map with a capacity chosen at construction.
///
/// Runs the same engine as [`SlotMap`](crate::SlotMap) — lock-free inserts
/// and lookups, two-phase deferred erasure, dense iteration — but over flat
/// arrays with no growth path: when the free list runs dry, `insert` fails
/// with [`Error::CapacityExceeded`] and every previously issued key stays
/// valid.
pub struct FixedSlotMap<T> {
    /// Slot table; one trailing slot acts as the free-list sentinel.
    slots: Box<[Slot]>,

    /// Dense value storage.
    data: Box<[UnsafeCell<MaybeUninit<T>>]>,

    /// Dense index -> slot index, `NIL` where no insert has linked back.
    reverse: Box<[AtomicU32]>,

    /// Slot indices awaiting compaction.
    queue: Box<[UnsafeCell<u32>]>,

    /// Tagged head of the free list (claim tag in the upper half).
    free_head: CacheAligned<AtomicU64>,

    /// Index of the sentinel slot; `head == tail` means the map is full.
    free_tail: CacheAligned<AtomicU32>,

    /// Count of reserved dense cells.
    len: CacheAligned<AtomicU32>,

    /// Watermark below which the three arrays are mutually consistent.
    published_len: CacheAligned<AtomicU32>,

    /// Claim counter for the erase queue.
    queue_reserved: AtomicUsize,

    /// Contiguous watermark of fully written queue entries.
    queue_published: AtomicUsize,

    /// Shared: insert/read/iterate. Exclusive: drain.
    latch: RwLatch,

    capacity: u32,
}

// SAFETY: the map owns its values.
unsafe impl<T: Send> Send for FixedSlotMap<T> {}

// SAFETY: inserts move T in through &self and reads hand out &T.
unsafe impl<T: Send + Sync> Sync for FixedSlotMap<T> {}

impl<T> FixedSlotMap<T> {
    /// Creates a map that holds at most `capacity` values.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < NIL, "capacity must leave room for the null index");
        let slots: Box<[Slot]> = (0..capacity)
            .map(|i| Slot::free(i + 1))
            .chain(std::iter::once(Slot::free(capacity)))
            .collect();
        let data = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        let reverse = (0..capacity).map(|_| AtomicU32::new(NIL)).collect();
        let queue = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        FixedSlotMap {
            slots,
            data,
            reverse,
            queue,
            free_head: CacheAligned::new(AtomicU64::new(pack_head(0, 0))),
            free_tail: CacheAligned::new(AtomicU32::new(capacity)),
            len: CacheAligned::new(AtomicU32::new(0)),
            published_len: CacheAligned::new(AtomicU32::new(0)),
            queue_reserved: AtomicUsize::new(0),
            queue_published: AtomicUsize::new(0),
            latch: RwLatch::new(),
            capacity,
        }
    }

    /// Number of reserved values: live ones plus erased ones whose
    /// compaction has not run yet. Exact after a blocking drain.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed) as usize
    }

    /// Returns `true` if the map holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of values the map can hold.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Inserts `value`, returning a key that stays valid until the value is
    /// erased, or [`Error::CapacityExceeded`] when no free slot remains.
    pub fn insert(&self, value: T) -> Result<Key, Error> {
        let slot_idx = self.claim_slot()?;
        let shared = self.latch.shared();

        let dense_idx = self.len.fetch_add(1, Ordering::AcqRel);
        // SAFETY: at most `capacity` slots can be claimed at once, so
        // dense_idx is in bounds and its cell is vacant.
        unsafe { self.data_ptr(dense_idx as usize).write(value) };

        let slot = &self.slots[slot_idx as usize];
        slot.idx.store(dense_idx, Ordering::Release);
        self.reverse[dense_idx as usize].store(slot_idx, Ordering::Release);

        self.publish();

        let generation = slot.generation.load(Ordering::Acquire);
        drop(shared);
        Ok(Key::new(slot_idx, generation))
    }

    /// Looks up a live value.
    ///
    /// Returns a guard dereferencing to the value; the guard holds the erase
    /// latch in shared mode, so the value cannot be relocated while it is
    /// alive. Stale keys return `None`.
    pub fn find(&self, key: Key) -> Option<ValueRef<'_, T>> {
        let guard = self.latch.shared();
        if key.index() >= self.capacity {
            return None;
        }
        let slot = &self.slots[key.index() as usize];
        if slot.generation.load(Ordering::Acquire) != key.generation() {
            return None;
        }
        let dense_idx = slot.idx.load(Ordering::Acquire);
        if dense_idx >= self.len.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: a matching generation under the shared latch means the
        // payload sits at dense_idx and cannot move while the guard exists.
        let value = unsafe { &*self.data_ptr(dense_idx as usize) };
        Some(ValueRef::new(value, guard))
    }

    /// Like [`find`](FixedSlotMap::find) but distinguishes out-of-range
    /// indices from stale keys.
    pub fn at(&self, key: Key) -> Result<Option<ValueRef<'_, T>>, Error> {
        if key.index() >= self.capacity {
            return Err(Error::OutOfBounds {
                index: key.index(),
                capacity: self.capacity,
            });
        }
        Ok(self.find(key))
    }

    /// Runs `f` on the value behind `key`, if live.
    pub fn with<R>(&self, key: Key, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.find(key).map(|value| f(&*value))
    }

    /// Clones out the value behind `key`, if live.
    pub fn get_cloned(&self, key: Key) -> Option<T>
    where
        T: Clone,
    {
        self.with(key, T::clone)
    }

    /// Returns `true` while `key` resolves to a value.
    pub fn contains_key(&self, key: Key) -> bool {
        key.index() < self.capacity
            && self.slots[key.index() as usize]
                .generation
                .load(Ordering::Acquire)
                == key.generation()
    }

    /// Looks up a value without any checks or latching.
    ///
    /// # Safety
    ///
    /// `key` must be live for this map, and no drain may run for the
    /// lifetime of the returned reference.
    pub unsafe fn find_unchecked(&self, key: Key) -> &T {
        let slot = unsafe { self.slots.get_unchecked(key.index() as usize) };
        let dense_idx = slot.idx.load(Ordering::Acquire);
        unsafe { &*self.data_ptr(dense_idx as usize) }
    }

    /// Erases the value behind `key`.
    ///
    /// Returns `true` if the key was live. The key dies before this call
    /// returns; the dense cell is reclaimed by a later drain (one is
    /// attempted opportunistically here).
    pub fn erase(&self, key: Key) -> bool {
        if !self.mark_erased(key) {
            return false;
        }
        self.drain_erase_queue(false);
        true
    }

    /// Compacts every queued erasure.
    ///
    /// With `block` set this waits for all readers, inserters, and iterators
    /// to leave, then drains; otherwise it drains only if the latch is free.
    pub fn drain_erase_queue(&self, block: bool) {
        let guard = if block {
            Some(self.latch.exclusive())
        } else {
            self.latch.try_exclusive()
        };
        if guard.is_some() {
            self.drain_locked();
        }
    }

    /// Applies `f` to every live value.
    ///
    /// Same contract as [`SlotMap::iterate`](crate::SlotMap::iterate):
    /// visits the consistent dense prefix until it stops growing, with the
    /// drain latched out for the duration.
    pub fn iterate(&self, mut f: impl FnMut(&T)) {
        {
            let _guard = self.latch.shared();
            let mut visited = 0u32;
            loop {
                let published = self.published_len.load(Ordering::Acquire);
                while visited < published {
                    // SAFETY: cells below published_len are initialized and
                    // cannot move while we hold shared mode.
                    f(unsafe { &*self.data_ptr(visited as usize) });
                    visited += 1;
                }
                if self.published_len.load(Ordering::Acquire) == published {
                    break;
                }
            }
        }
        self.drain_erase_queue(false);
    }

    #[inline]
    unsafe fn data_ptr(&self, index: usize) -> *mut T {
        // MaybeUninit<T> is layout-transparent over T.
        unsafe { self.data.get_unchecked(index).get() as *mut T }
    }

    /// Claims a free slot or reports the map full.
    fn claim_slot(&self) -> Result<u32, Error> {
        let backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            let (tag, head_idx) = unpack_head(head);
            if head_idx == self.free_tail.load(Ordering::Acquire) {
                return Err(Error::CapacityExceeded);
            }
            let next = self.slots[head_idx as usize].idx.load(Ordering::Acquire);
            if self
                .free_head
                .compare_exchange_weak(
                    head,
                    pack_head(tag.wrapping_add(1), next),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(head_idx);
            }
            backoff.spin();
        }
    }

    /// Marks the key dead and queues its slot for compaction.
    fn mark_erased(&self, key: Key) -> bool {
        if key.index() >= self.capacity {
            return false;
        }
        let slot = &self.slots[key.index() as usize];
        if slot
            .generation
            .compare_exchange(
                key.generation(),
                key.generation().wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }

        let queue_idx = self.queue_reserved.fetch_add(1, Ordering::AcqRel);
        // SAFETY: at most one queue entry per claimed slot between drains,
        // so queue_idx < capacity.
        unsafe { (*self.queue.get_unchecked(queue_idx).get()) = key.index() };

        let backoff = Backoff::new();
        while self
            .queue_published
            .compare_exchange_weak(
                queue_idx,
                queue_idx + 1,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_err()
        {
            backoff.spin();
        }
        true
    }

    /// Advances `published_len` over every dense prefix whose slot and
    /// reverse entries agree.
    fn publish(&self) {
        loop {
            let published = self.published_len.load(Ordering::Acquire);
            if published >= self.len.load(Ordering::Acquire) {
                return;
            }
            let slot_idx = self.reverse[published as usize].load(Ordering::Acquire);
            if slot_idx == NIL {
                return;
            }
            let slot = &self.slots[slot_idx as usize];
            if slot.idx.load(Ordering::Acquire) != published {
                return;
            }
            let _ = self.published_len.compare_exchange(
                published,
                published + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Drains the erase queue. Caller must hold the latch exclusively.
    fn drain_locked(&self) {
        let backoff = Backoff::new();
        let mut drained = 0usize;
        loop {
            let published = self.queue_published.load(Ordering::Acquire);
            while drained < published {
                // SAFETY: entries below the queue watermark are fully
                // written.
                let slot_idx = unsafe { *self.queue[drained].get() };
                self.erase_slot(slot_idx);
                drained += 1;
            }
            match self.queue_reserved.compare_exchange(
                published,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.queue_published.store(0, Ordering::Release);
                    return;
                }
                Err(_) => backoff.snooze(),
            }
        }
    }

    /// Compacts one tombstoned slot: swap-with-last in the dense array,
    /// then return the slot to the free-list tail.
    fn erase_slot(&self, slot_idx: u32) {
        let slot = &self.slots[slot_idx as usize];
        let hole = slot.idx.load(Ordering::Acquire);
        let last = self.len.fetch_sub(1, Ordering::AcqRel) - 1;

        // SAFETY: exclusive ownership of the dense array; `hole` holds the
        // erased value, `last` the one getting moved into it.
        unsafe {
            let hole_ptr = self.data_ptr(hole as usize);
            ptr::drop_in_place(hole_ptr);
            if hole != last {
                ptr::copy_nonoverlapping(self.data_ptr(last as usize), hole_ptr, 1);
                let moved_slot_idx = self.reverse[last as usize].load(Ordering::Acquire);
                self.slots[moved_slot_idx as usize]
                    .idx
                    .store(hole, Ordering::Release);
                self.reverse[hole as usize].store(moved_slot_idx, Ordering::Release);
            }
            self.reverse[last as usize].store(NIL, Ordering::Release);
        }
        self.published_len.store(last, Ordering::Release);

        let prev_tail = self.free_tail.load(Ordering::Acquire);
        self.slots[prev_tail as usize]
            .idx
            .store(slot_idx, Ordering::Release);
        self.free_tail.store(slot_idx, Ordering::Release);
    }
}

impl<T> Drop for FixedSlotMap<T> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            let len = *self.len.get_mut();
            for i in 0..len {
                // SAFETY: cells below len hold initialized values, each
                // dropped exactly once.
                unsafe { ptr::drop_in_place(self.data_ptr(i as usize)) };
            }
        }
    }
}
