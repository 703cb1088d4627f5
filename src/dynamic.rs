//! The growable lock-free slot map.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use petek_vec::{CacheAligned, SegVec};

use crate::error::Error;
use crate::key::{Key, NIL};
use crate::latch::{RwLatch, SpinLock, ValueRef};
use crate::slot::{pack_head, unpack_head, Slot};

const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// A concurrent slot map that grows on demand.
///
/// Values live in a dense array backed by segmented storage, so iteration
/// walks contiguous memory and growing never moves an element. Inserts,
/// lookups, and iteration run fully in parallel; only the deferred
/// compaction of erased entries (the drain) takes the internal latch
/// exclusively.
///
/// Erasure is two-phase: `erase` bumps the slot's generation, which kills
/// the key immediately, and queues the slot for compaction. The queue is
/// drained opportunistically by `erase` and `iterate`, or deterministically
/// via [`drain_erase_queue`](SlotMap::drain_erase_queue).
///
/// # Example
///
/// ```
/// use petek::SlotMap;
///
/// let map = SlotMap::new();
/// let key = map.insert("hornet");
/// assert_eq!(*map.find(key).unwrap(), "hornet");
/// assert!(map.erase(key));
/// assert!(map.find(key).is_none());
/// ```
pub struct SlotMap<T> {
    /// Slot table; one trailing slot past `capacity` acts as the free-list
    /// sentinel.
    slots: SegVec<Slot>,

    /// Dense value storage, addressed with the map's own counters.
    data: SegVec<T>,

    /// Dense index -> slot index, `NIL` where no insert has linked back.
    reverse: SegVec<AtomicU32>,

    /// Slot indices awaiting compaction.
    queue: SegVec<u32>,

    /// Tagged head of the free list (claim tag in the upper half).
    free_head: CacheAligned<AtomicU64>,

    /// Index of the sentinel slot; `head == tail` means no free slots.
    free_tail: CacheAligned<AtomicU32>,

    /// Count of reserved dense cells (live values plus not-yet-drained
    /// tombstones).
    len: CacheAligned<AtomicU32>,

    /// Watermark below which slots, dense array, and reverse index are
    /// mutually consistent. Iteration trusts only this prefix.
    published_len: CacheAligned<AtomicU32>,

    capacity: AtomicU32,
    growth_factor: AtomicU64,

    /// Claim counter for the erase queue.
    queue_reserved: AtomicUsize,

    /// Contiguous watermark of fully written queue entries.
    queue_published: AtomicUsize,

    /// Shared: insert/read/iterate. Exclusive: drain.
    latch: RwLatch,

    /// Serializes growers; claimers spin outside it.
    grow_lock: SpinLock,
}

// SAFETY: the map owns its values and hands them across threads by value
// only on insert.
unsafe impl<T: Send> Send for SlotMap<T> {}

// SAFETY: inserts move T in through &self and reads hand out &T, so sharing
// the map requires T: Send + Sync.
unsafe impl<T: Send + Sync> Sync for SlotMap<T> {}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotMap<T> {
    /// Creates an empty map that allocates on first insert.
    pub fn new() -> Self {
        Self::with_capacity(0, DEFAULT_GROWTH_FACTOR)
    }

    /// Creates a map with room for `capacity` values and the given growth
    /// factor (clamped to be greater than 1).
    pub fn with_capacity(capacity: u32, growth_factor: f64) -> Self {
        assert!(capacity < NIL, "capacity must leave room for the null index");
        let growth_factor = if growth_factor > 1.0 {
            growth_factor
        } else {
            DEFAULT_GROWTH_FACTOR
        };

        let map = SlotMap {
            slots: SegVec::new(),
            data: SegVec::new(),
            reverse: SegVec::new(),
            queue: SegVec::new(),
            free_head: CacheAligned::new(AtomicU64::new(pack_head(0, 0))),
            free_tail: CacheAligned::new(AtomicU32::new(0)),
            len: CacheAligned::new(AtomicU32::new(0)),
            published_len: CacheAligned::new(AtomicU32::new(0)),
            capacity: AtomicU32::new(0),
            growth_factor: AtomicU64::new(growth_factor.to_bits()),
            queue_reserved: AtomicUsize::new(0),
            queue_published: AtomicUsize::new(0),
            latch: RwLatch::new(),
            grow_lock: SpinLock::new(),
        };

        // Seed the free list with just the sentinel; every extension,
        // including the initial capacity, goes through the grow path.
        map.slots
            .push(Slot::free(0))
            .expect("fresh slot table cannot be full");
        if capacity > 0 {
            let _g = map.grow_lock.lock();
            map.grow_to(capacity);
        }
        map
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

    /// Number of values the map can hold before growing again.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire) as usize
    }

    /// Grows the map so that at least `capacity` values fit. Never shrinks.
    pub fn reserve(&self, capacity: u32) {
        let _g = self.grow_lock.lock();
        self.grow_to(capacity);
    }

    /// Sets the factor applied to the capacity on each grow. Values of 1 or
    /// below are ignored.
    pub fn set_growth_factor(&self, factor: f64) {
        if factor > 1.0 {
            self.growth_factor.store(factor.to_bits(), Ordering::Relaxed);
        }
    }

    /// Inserts `value`, returning a key that stays valid until the value is
    /// erased.
    ///
    /// Lock-free against other inserts, lookups, and iteration; may spin
    /// briefly while the map grows.
    ///
    /// # Panics
    ///
    /// Panics if the backing storage exhausts its bucket budget (the u32 key
    /// space runs out first in any realistic configuration).
    pub fn insert(&self, value: T) -> Key {
        let slot_idx = self.claim_slot();
        let shared = self.latch.shared();

        let dense_idx = self.len.fetch_add(1, Ordering::AcqRel);
        // SAFETY: at most `capacity` slots can be claimed at once, so
        // dense_idx lies within the buckets reserved by the last grow, and
        // the cell it names is vacant.
        unsafe { self.data.cell(dense_idx as usize).write(value) };

        // SAFETY: slot_idx came off the free list, so the slot is pushed.
        let slot = unsafe { self.slots.get_unchecked(slot_idx as usize) };
        slot.idx.store(dense_idx, Ordering::Release);
        // SAFETY: reverse holds a cell per dense index below capacity.
        unsafe { self.reverse.get_unchecked(dense_idx as usize) }
            .store(slot_idx, Ordering::Release);

        self.publish();

        let generation = slot.generation.load(Ordering::Acquire);
        drop(shared);
        Key::new(slot_idx, generation)
    }

    /// Looks up a live value.
    ///
    /// Returns a guard dereferencing to the value; the guard holds the erase
    /// latch in shared mode, so the value cannot be relocated while it is
    /// alive. Stale keys return `None`.
    pub fn find(&self, key: Key) -> Option<ValueRef<'_, T>> {
        let guard = self.latch.shared();
        if key.index() >= self.capacity.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: every index below capacity is a pushed slot.
        let slot = unsafe { self.slots.get_unchecked(key.index() as usize) };
        if slot.generation.load(Ordering::Acquire) != key.generation() {
            return None;
        }
        let dense_idx = slot.idx.load(Ordering::Acquire);
        if dense_idx >= self.len.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: a matching generation under the shared latch means the
        // slot's payload sits at dense_idx and cannot move while the guard
        // exists.
        let value = unsafe { &*self.data.cell(dense_idx as usize) };
        Some(ValueRef::new(value, guard))
    }

    /// Like [`find`](SlotMap::find) but distinguishes out-of-range indices
    /// from stale keys.
    pub fn at(&self, key: Key) -> Result<Option<ValueRef<'_, T>>, Error> {
        let capacity = self.capacity.load(Ordering::Acquire);
        if key.index() >= capacity {
            return Err(Error::OutOfBounds {
                index: key.index(),
                capacity,
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
        if key.index() >= self.capacity.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: bounds-checked above.
        let slot = unsafe { self.slots.get_unchecked(key.index() as usize) };
        slot.generation.load(Ordering::Acquire) == key.generation()
    }

    /// Looks up a value without any checks or latching.
    ///
    /// # Safety
    ///
    /// `key` must be live for this map, and no drain may run for the
    /// lifetime of the returned reference.
    pub unsafe fn find_unchecked(&self, key: Key) -> &T {
        // SAFETY: per contract, key indexes an occupied slot.
        let slot = unsafe { self.slots.get_unchecked(key.index() as usize) };
        let dense_idx = slot.idx.load(Ordering::Acquire);
        unsafe { &*self.data.cell(dense_idx as usize) }
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
    /// Visits the consistent dense prefix and re-checks it until it stops
    /// growing, so every value whose insert completed before this call is
    /// visited exactly once; values inserted concurrently may or may not
    /// be. Erasure is blocked out for the duration, so every visited value
    /// was live at some point during the call.
    pub fn iterate(&self, mut f: impl FnMut(&T)) {
        {
            let _guard = self.latch.shared();
            let mut visited = 0u32;
            loop {
                let published = self.published_len.load(Ordering::Acquire);
                while visited < published {
                    // SAFETY: cells below published_len are initialized and
                    // cannot move while we hold shared mode.
                    f(unsafe { &*self.data.cell(visited as usize) });
                    visited += 1;
                }
                if self.published_len.load(Ordering::Acquire) == published {
                    break;
                }
            }
        }
        self.drain_erase_queue(false);
    }

    /// Claims a free slot, growing the table when none is left.
    fn claim_slot(&self) -> u32 {
        let backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            let (tag, head_idx) = unpack_head(head);
            if head_idx == self.free_tail.load(Ordering::Acquire) {
                self.grow();
                continue;
            }
            // SAFETY: free-list nodes are always pushed slots.
            let next = unsafe { self.slots.get_unchecked(head_idx as usize) }
                .idx
                .load(Ordering::Acquire);
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
                return head_idx;
            }
            backoff.spin();
        }
    }

    /// Marks the key dead and queues its slot for compaction.
    fn mark_erased(&self, key: Key) -> bool {
        if key.index() >= self.capacity.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: bounds-checked above.
        let slot = unsafe { self.slots.get_unchecked(key.index() as usize) };
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
        // and queue buckets are reserved through capacity + 1.
        unsafe { self.queue.cell(queue_idx).write(key.index()) };

        // Publish in claim order; the drain trusts every entry below the
        // watermark to be fully written.
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
    /// reverse entries agree. Stops at the first cell some other insert has
    /// not linked back yet; that insert finishes the job.
    fn publish(&self) {
        loop {
            let published = self.published_len.load(Ordering::Acquire);
            if published >= self.len.load(Ordering::Acquire) {
                return;
            }
            // SAFETY: published < len <= capacity, and reverse has a cell
            // per dense index below capacity.
            let slot_idx = unsafe { self.reverse.get_unchecked(published as usize) }
                .load(Ordering::Acquire);
            if slot_idx == NIL {
                return;
            }
            // SAFETY: reverse entries are either NIL or pushed slot indices.
            let slot = unsafe { self.slots.get_unchecked(slot_idx as usize) };
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
                let slot_idx = unsafe { *self.queue.cell(drained) };
                self.erase_slot(slot_idx);
                drained += 1;
            }
            // Retire the drained prefix; a producer that appended in the
            // meantime forces another round.
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
    /// then return the slot to the free-list tail. Caller must hold the
    /// latch exclusively.
    fn erase_slot(&self, slot_idx: u32) {
        // SAFETY: queue entries are claimed slot indices.
        let slot = unsafe { self.slots.get_unchecked(slot_idx as usize) };
        let hole = slot.idx.load(Ordering::Acquire);
        let last = self.len.fetch_sub(1, Ordering::AcqRel) - 1;

        // SAFETY: exclusive ownership of the dense array; `hole` holds the
        // erased value, `last` the one getting moved into it.
        unsafe {
            let hole_ptr = self.data.cell(hole as usize);
            ptr::drop_in_place(hole_ptr);
            if hole != last {
                ptr::copy_nonoverlapping(self.data.cell(last as usize), hole_ptr, 1);
                let moved_slot_idx = self
                    .reverse
                    .get_unchecked(last as usize)
                    .load(Ordering::Acquire);
                self.slots
                    .get_unchecked(moved_slot_idx as usize)
                    .idx
                    .store(hole, Ordering::Release);
                self.reverse
                    .get_unchecked(hole as usize)
                    .store(moved_slot_idx, Ordering::Release);
            }
            // The vacated tail cell must read as unlinked, or the publish
            // loop could chase a stale slot through it.
            self.reverse
                .get_unchecked(last as usize)
                .store(NIL, Ordering::Release);
        }
        self.published_len.store(last, Ordering::Release);

        // Append the slot at the free-list tail; single-threaded under the
        // exclusive latch.
        let prev_tail = self.free_tail.load(Ordering::Acquire);
        // SAFETY: the tail always names a pushed slot.
        unsafe { self.slots.get_unchecked(prev_tail as usize) }
            .idx
            .store(slot_idx, Ordering::Release);
        self.free_tail.store(slot_idx, Ordering::Release);
    }

    /// Grows when the free list is exhausted. Serialized by the grow lock;
    /// losers return and retry their claim.
    fn grow(&self) {
        let _g = self.grow_lock.lock();
        // Re-check under the lock: another grower or a drain may have
        // produced free slots already.
        let (_, head_idx) = unpack_head(self.free_head.load(Ordering::Acquire));
        if head_idx != self.free_tail.load(Ordering::Acquire) {
            return;
        }
        let old_cap = self.capacity.load(Ordering::Acquire);
        let factor = f64::from_bits(self.growth_factor.load(Ordering::Relaxed));
        let target = ((old_cap as f64) * factor).ceil() as u32;
        self.grow_to(target.max(old_cap + 1));
    }

    /// Extends capacity to `new_cap`. Caller must hold the grow lock.
    fn grow_to(&self, new_cap: u32) {
        let old_cap = self.capacity.load(Ordering::Acquire);
        if new_cap <= old_cap {
            return;
        }
        assert!(new_cap < NIL, "slot map exceeded the u32 key space");

        self.data
            .reserve(new_cap as usize)
            .expect("dense storage exhausted its bucket budget");
        self.queue
            .reserve(new_cap as usize + 1)
            .expect("erase queue exhausted its bucket budget");

        // Fresh free slots chained in order, ending in the new sentinel.
        // They land at indices old_cap + 1 ..= new_cap.
        for i in (old_cap + 1)..new_cap {
            self.slots
                .push(Slot::free(i + 1))
                .expect("slot table exhausted its bucket budget");
        }
        self.slots
            .push(Slot::free(new_cap))
            .expect("slot table exhausted its bucket budget");
        for _ in old_cap..new_cap {
            self.reverse
                .push(AtomicU32::new(NIL))
                .expect("reverse index exhausted its bucket budget");
        }

        // Publish capacity before the new slots become claimable so a key
        // issued for one always passes the bounds checks.
        self.capacity.store(new_cap, Ordering::Release);

        // Splice the new chain in behind the current sentinel. Shared mode
        // keeps the drain (the only other tail writer) out.
        let _shared = self.latch.shared();
        let prev_sentinel = self.free_tail.load(Ordering::Acquire);
        // SAFETY: the tail always names a pushed slot.
        unsafe { self.slots.get_unchecked(prev_sentinel as usize) }
            .idx
            .store(old_cap + 1, Ordering::Release);
        self.free_tail.store(new_cap, Ordering::Release);
    }
}

impl<T> Drop for SlotMap<T> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            let len = *self.len.get_mut();
            for i in 0..len {
                // SAFETY: cells below len hold initialized values (live or
                // tombstoned-but-undrained), each dropped exactly once.
                unsafe { ptr::drop_in_place(self.data.cell(i as usize)) };
            }
        }
    }
}
