//! Petek: concurrent slot maps with dense storage and generation-tagged keys.
//!
//! A slot map hands out a small, copyable [`Key`] on every insert. Lookup,
//! mutation, and erasure through a key are O(1); a key whose value was
//! erased is detected and rejected forever, even after the slot is reused.
//! Values are kept densely packed, so iteration walks contiguous memory.
//!
//! Three variants share those semantics:
//!
//! - [`SlotMap`] — lock-free engine over segmented storage, grows on demand.
//! - [`FixedSlotMap`] — the same engine at a capacity fixed on construction.
//! - [`LockedSlotMap`] — a sequential [`DenseSlotMap`] behind a
//!   reader/writer lock; the reference semantics.
//!
//! The concurrent variants never block inserts, lookups, or iteration
//! against each other. Erasure is two-phase: the key dies immediately, while
//! compaction of the dense array is deferred to a drain that runs
//! opportunistically or on demand via `drain_erase_queue`.
//!
//! # Example
//!
//! ```rust
//! use petek::SlotMap;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let map = Arc::new(SlotMap::new());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let map = Arc::clone(&map);
//!         thread::spawn(move || map.insert(t * 100))
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     let key = handle.join().unwrap();
//!     assert!(map.find(key).is_some());
//! }
//! assert_eq!(map.len(), 4);
//! ```

#![warn(missing_docs)]

mod dynamic;
mod error;
mod fixed;
mod key;
mod latch;
mod locked;
mod seq;
mod slot;

pub use dynamic::SlotMap;
pub use error::Error;
pub use fixed::FixedSlotMap;
pub use key::Key;
pub use latch::ValueRef;
pub use locked::LockedSlotMap;
pub use seq::DenseSlotMap;
