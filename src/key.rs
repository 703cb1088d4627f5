use std::fmt;

/// Reserved index meaning "no slot".
pub(crate) const NIL: u32 = u32::MAX;

/// A stable, generation-tagged handle to a value in a slot map.
///
/// Keys are issued by `insert` and stay valid until the value is erased;
/// after that every lookup with the old key fails, even if the slot is
/// reused. A key is a plain pair of integers: copy it, hash it, send it
/// across threads. Keys are only meaningful for the map that issued them.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub(crate) fn new(index: u32, generation: u32) -> Key {
        Key { index, generation }
    }

    /// The null key: refers to no slot in any map.
    pub const fn null() -> Key {
        Key {
            index: NIL,
            generation: 0,
        }
    }

    /// Returns `true` for the null key.
    pub fn is_null(&self) -> bool {
        self.index == NIL
    }

    /// Slot index of this key.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation stamp of this key.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::null()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Key(null)")
        } else {
            write!(f, "Key({}v{})", self.index, self.generation)
        }
    }
}
