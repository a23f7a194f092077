//! # intrie
//!
//! Persistent and transient sparse integer-keyed maps for Rust.
//!
//! ## Overview
//!
//! This library provides a single data structure in two flavors:
//!
//! - [`PersistentIntMap`](persistent::PersistentIntMap): an immutable map
//!   from `usize` keys to arbitrary values. Every mutating operation returns
//!   a new map that shares untouched subtrees with its input.
//! - [`TransientIntMap`](persistent::TransientIntMap): a single-owner,
//!   temporarily mutable variant for batch construction, convertible to and
//!   from the persistent flavor in O(1).
//!
//! Both are backed by the same bitwise-partitioned trie with a branching
//! factor of 32. The map tracks a *window* — the key range addressable from
//! the root — so dense clusters of keys anywhere on the number line stay
//! shallow instead of paying for the distance from zero.
//!
//! Beyond insertion, removal, and lookup, the map supports ordered key
//! traversal (`first_key`/`next_key`/`prev_key`/`last_key`), ascending
//! folds, and set-like `union` and `intersect` with a caller-supplied value
//! merge function.
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` internally, making persistent maps
//!   shareable across threads
//! - `serde`: `Serialize`/`Deserialize` implementations
//! - `rayon`: parallel iterators
//!
//! ## Example
//!
//! ```rust
//! use intrie::prelude::*;
//!
//! let map = PersistentIntMap::new()
//!     .insert(1, "one")
//!     .unwrap()
//!     .insert(1024, "one thousand twenty-four")
//!     .unwrap();
//!
//! assert_eq!(map.get(1), Some(&"one"));
//! assert_eq!(map.next_key(1), Some(1024));
//!
//! // Structural sharing: the original map is preserved
//! let removed = map.remove(1);
//! assert_eq!(map.get(1), Some(&"one"));
//! assert_eq!(removed.get(1), None);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod persistent;

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use intrie::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::IntMapError;
    pub use crate::persistent::PersistentIntMap;
    pub use crate::persistent::TransientIntMap;
}
