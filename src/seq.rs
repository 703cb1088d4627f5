//! The sequential dense slot map.

use crate::key::{Key, NIL};

/// A slot in the sequential map: no atomics, same dual-use layout as the
/// concurrent table.
struct SeqSlot {
    /// Dense index when occupied, next free slot otherwise.
    idx: u32,
    generation: u32,
}

/// A single-threaded dense slot map.
///
/// The plain, borrow-checked rendition of the engine: same keys, same
/// generation semantics, same swap-with-last compaction, but erasure happens
/// on the spot instead of through a deferred queue. It backs
/// [`LockedSlotMap`](crate::LockedSlotMap) and doubles as the reference the
/// concurrent variants are tested against.
pub struct DenseSlotMap<T> {
    slots: Vec<SeqSlot>,
    data: Vec<T>,
    reverse: Vec<u32>,
    free_head: u32,
}

impl<T> Default for DenseSlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DenseSlotMap<T> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map with room for `capacity` values.
    pub fn with_capacity(capacity: u32) -> Self {
        let capacity = capacity as usize;
        DenseSlotMap {
            slots: Vec::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
            reverse: Vec::with_capacity(capacity),
            free_head: NIL,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the map holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of values the map can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Reserves room for at least `additional` more values.
    pub fn reserve(&mut self, additional: u32) {
        let additional = additional as usize;
        self.slots.reserve(additional);
        self.data.reserve(additional);
        self.reverse.reserve(additional);
    }

    /// Inserts `value`, returning a key that stays valid until removal.
    pub fn insert(&mut self, value: T) -> Key {
        let slot_idx = if self.free_head != NIL {
            let idx = self.free_head;
            self.free_head = self.slots[idx as usize].idx;
            idx
        } else {
            let idx = self.slots.len();
            assert!(idx < NIL as usize, "slot map exceeded the u32 key space");
            self.slots.push(SeqSlot {
                idx: 0,
                generation: 0,
            });
            idx as u32
        };

        let dense_idx = self.data.len() as u32;
        self.data.push(value);
        self.reverse.push(slot_idx);
        let slot = &mut self.slots[slot_idx as usize];
        slot.idx = dense_idx;
        Key::new(slot_idx, slot.generation)
    }

    /// Returns the value behind `key`, if live.
    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.live_slot(key)?;
        Some(&self.data[slot as usize])
    }

    /// Mutable counterpart of [`get`](DenseSlotMap::get).
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.live_slot(key)?;
        Some(&mut self.data[slot as usize])
    }

    /// Returns `true` while `key` resolves to a value.
    pub fn contains_key(&self, key: Key) -> bool {
        self.live_slot(key).is_some()
    }

    /// Removes and returns the value behind `key`. The key dies; the hole
    /// is filled by the last dense element.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let dense_idx = self.live_slot(key)? as usize;
        let slot_idx = key.index();

        let slot = &mut self.slots[slot_idx as usize];
        slot.generation = slot.generation.wrapping_add(1);

        let value = self.data.swap_remove(dense_idx);
        self.reverse.swap_remove(dense_idx);
        if dense_idx < self.data.len() {
            let moved = self.reverse[dense_idx];
            self.slots[moved as usize].idx = dense_idx as u32;
        }

        self.slots[slot_idx as usize].idx = self.free_head;
        self.free_head = slot_idx;
        Some(value)
    }

    /// Removes every value. All outstanding keys die; slot storage is
    /// retained for reuse.
    pub fn clear(&mut self) {
        for &slot_idx in &self.reverse {
            let slot = &mut self.slots[slot_idx as usize];
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.data.clear();
        self.reverse.clear();
        self.free_head = NIL;
        for idx in (0..self.slots.len()).rev() {
            self.slots[idx].idx = self.free_head;
            self.free_head = idx as u32;
        }
    }

    /// Iterates `(key, value)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        self.reverse
            .iter()
            .zip(self.data.iter())
            .map(move |(&slot_idx, value)| {
                let generation = self.slots[slot_idx as usize].generation;
                (Key::new(slot_idx, generation), value)
            })
    }

    /// Iterates live keys in dense order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Iterates values in dense order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.data.iter()
    }

    /// Mutably iterates values in dense order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.data.iter_mut()
    }

    /// The dense index of `key`'s payload, if the key is live.
    fn live_slot(&self, key: Key) -> Option<u32> {
        let slot = self.slots.get(key.index() as usize)?;
        if slot.generation == key.generation() && (slot.idx as usize) < self.data.len() {
            // A free slot's idx is a free-list link, which can collide with
            // a dense index; the reverse entry disambiguates.
            if self.reverse[slot.idx as usize] == key.index() {
                return Some(slot.idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut map = DenseSlotMap::new();
        let a = map.insert("a");
        let b = map.insert("b");
        assert_eq!(map.get(a), Some(&"a"));
        assert_eq!(map.get(b), Some(&"b"));
        assert_eq!(map.remove(a), Some("a"));
        assert_eq!(map.get(a), None);
        assert_eq!(map.remove(a), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_slot_reuse_bumps_nothing_but_erase() {
        let mut map = DenseSlotMap::new();
        let a = map.insert(1);
        assert_eq!((a.index(), a.generation()), (0, 0));
        map.remove(a);
        let b = map.insert(2);
        assert_eq!((b.index(), b.generation()), (0, 1));
        assert_eq!(map.get(a), None);
        assert_eq!(map.get(b), Some(&2));
    }

    #[test]
    fn test_clear_kills_all_keys() {
        let mut map = DenseSlotMap::new();
        let keys: Vec<_> = (0..10).map(|i| map.insert(i)).collect();
        map.clear();
        assert!(map.is_empty());
        for key in keys {
            assert_eq!(map.get(key), None);
        }
        let again = map.insert(99);
        assert_eq!(map.get(again), Some(&99));
    }
}
