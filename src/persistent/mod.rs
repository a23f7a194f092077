//! Persistent (immutable) data structures.
//!
//! This module provides [`PersistentIntMap`], an immutable sparse map with
//! nonnegative integer keys, and [`TransientIntMap`], its single-owner
//! mutable counterpart for batch construction.
//!
//! # Structural Sharing
//!
//! All operations on the persistent map return new versions that share
//! untouched subtrees with their input; nothing is ever mutated in place.
//! The transient map mutates in place only nodes it allocated itself, and
//! copies shared nodes on first write.
//!
//! # Examples
//!
//! ## `PersistentIntMap`
//!
//! ```rust
//! use intrie::persistent::PersistentIntMap;
//!
//! let map = PersistentIntMap::new().insert(7, "seven").unwrap();
//!
//! // Structural sharing: the original map is preserved
//! let extended = map.insert(8, "eight").unwrap();
//! assert_eq!(map.get(8), None);
//! assert_eq!(extended.get(8), Some(&"eight"));
//! ```
//!
//! ## `TransientIntMap`
//!
//! ```rust
//! use intrie::persistent::PersistentIntMap;
//!
//! let mut transient = PersistentIntMap::new().transient();
//! for key in 0..100 {
//!     transient.insert(key, key * 2).unwrap();
//! }
//! let map = transient.persistent().unwrap();
//! assert_eq!(map.get(99), Some(&198));
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod intmap;

pub use intmap::IntMapError;
pub use intmap::PersistentIntMap;
pub use intmap::PersistentIntMapIntoIterator;
pub use intmap::PersistentIntMapIterator;
pub use intmap::TransientIntMap;

// Rayon parallel iterator re-exports
#[cfg(feature = "rayon")]
pub use intmap::PersistentIntMapParallelIterator;
#[cfg(feature = "rayon")]
pub use intmap::PersistentIntMapParallelRefIterator;

// =============================================================================
// Tests
// =============================================================================
