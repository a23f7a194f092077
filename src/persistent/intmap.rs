//! Persistent (immutable) sparse map with nonnegative integer keys.
//!
//! This module provides [`PersistentIntMap`], an immutable map from `usize`
//! keys to arbitrary values, and [`TransientIntMap`], its single-owner
//! mutable counterpart.
//!
//! # Overview
//!
//! `PersistentIntMap` is a bitwise-partitioned trie with a branching factor
//! of 32 (5 key bits per level). Unlike a hash-based trie, keys are used
//! directly: the map tracks a *window* `[min, min + 2^shift)` of keys
//! addressable from the root, so a cluster of keys near each other — at any
//! magnitude — needs only as many levels as the cluster's diameter requires.
//! Inserting a key outside the window grows the trie one level at a time
//! until the window covers it; removal prunes redundant levels back off.
//!
//! - O(log32 N) get, insert, remove
//! - O(log32 N) ordered successor/predecessor queries
//! - Ascending-order fold and iteration
//! - Set-like `union` and `intersect` that preserve subtree sharing
//!
//! All operations return new maps without modifying the original, and
//! structural sharing keeps the copies cheap.
//!
//! # Examples
//!
//! ```rust
//! use intrie::persistent::PersistentIntMap;
//!
//! let map = PersistentIntMap::new()
//!     .insert(0, "a")
//!     .unwrap()
//!     .insert(4096, "b")
//!     .unwrap();
//!
//! assert_eq!(map.get(0), Some(&"a"));
//! assert_eq!(map.get(4096), Some(&"b"));
//! assert_eq!(map.next_key(0), Some(4096));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.remove(0);
//! assert_eq!(map.get(0), Some(&"a"));
//! assert_eq!(updated.get(0), None);
//! ```
//!
//! # Internal Structure
//!
//! The trie uses:
//! - 32-way branching (5 bits per level)
//! - A window `(min, shift)` locating the root on the number line
//! - Leaves stored directly at shift 0; a one-element map is just
//!   `(key, 0, value)` with no branch nodes at all
//! - Structural sharing via reference-counted branch nodes
//!
//! Branch nodes carry an *edit token* identifying the transient that may
//! mutate them in place. Persistent maps only ever hold nodes whose token
//! does not match any live transient, so they are immutable by
//! construction; a transient copies such nodes on first write and stamps
//! the copies with its own token.

use std::fmt;
use std::thread::{self, ThreadId};

use smallvec::SmallVec;

#[cfg(feature = "rayon")]
use rayon::iter::plumbing::UnindexedConsumer;
#[cfg(feature = "rayon")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::ReferenceCounter;

// =============================================================================
// Constants
// =============================================================================

/// Bits of the key consumed per trie level.
const BITS_PER_LEVEL: u32 = 5;

/// Branching factor (2^5 = 32).
const BRANCHING_FACTOR: usize = 1 << BITS_PER_LEVEL;

/// Mask for extracting one level's digit from a key.
const LEVEL_MASK: usize = BRANCHING_FACTOR - 1;

// =============================================================================
// Errors
// =============================================================================

/// Error returned by fallible map operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntMapError {
    /// Two different values met at the same key and no merge function was
    /// supplied. Recoverable by retrying with an explicit merge function
    /// (`insert_with`, `union_with`, `intersect_with`).
    ValueConflict,
    /// A transient map was accessed from a thread other than the one that
    /// created it. Transients are pinned to a single owner.
    OwnershipViolation,
}

impl fmt::Display for IntMapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueConflict => write!(
                formatter,
                "conflicting values for one key and no merge function was supplied"
            ),
            Self::OwnershipViolation => write!(
                formatter,
                "transient map accessed from outside its owning thread"
            ),
        }
    }
}

impl std::error::Error for IntMapError {}

// =============================================================================
// Edit Cells
// =============================================================================

/// Ownership cell shared by a transient map and every branch node it has
/// allocated. Compared by identity: a branch may be mutated in place exactly
/// when its token is the same cell as the mutating transient's.
struct EditCell {
    owner: ThreadId,
}

impl EditCell {
    fn new() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }
}

// =============================================================================
// Node Definition
// =============================================================================

/// Internal trie node. Leaves only exist at shift 0.
#[derive(Clone)]
enum Node<V> {
    /// Interior node with up to 32 children.
    Branch(ReferenceCounter<Branch<V>>),
    /// A stored value.
    Leaf(V),
}

/// Interior node: 32 child slots plus the edit token.
///
/// An empty slot (`None`) means no key with the corresponding digit prefix
/// is present. `edit: None` marks the branch as frozen; a branch is mutable
/// in place only by the transient whose edit cell it carries.
#[derive(Clone)]
struct Branch<V> {
    edit: Option<ReferenceCounter<EditCell>>,
    children: [Option<Node<V>>; BRANCHING_FACTOR],
}

impl<V> Branch<V> {
    fn new(edit: Option<ReferenceCounter<EditCell>>) -> Self {
        Self {
            edit,
            children: [const { None }; BRANCHING_FACTOR],
        }
    }

    /// Returns the only occupied slot, or `None` if zero or several slots
    /// are occupied.
    fn sole_child(&self) -> Option<(usize, &Node<V>)> {
        let mut found = None;
        for (index, slot) in self.children.iter().enumerate() {
            if let Some(child) = slot {
                if found.is_some() {
                    return None;
                }
                found = Some((index, child));
            }
        }
        found
    }
}

impl<V: Clone> Branch<V> {
    /// Clones this branch with one slot replaced. The copy is frozen.
    fn with_child(&self, index: usize, child: Option<Node<V>>) -> Self {
        let mut children = self.children.clone();
        children[index] = child;
        Self {
            edit: None,
            children,
        }
    }
}

// =============================================================================
// Window Arithmetic
// =============================================================================

/// Rounds `value` down to a multiple of `2^shift`.
const fn round_down(value: usize, shift: u32) -> usize {
    if shift >= usize::BITS {
        0
    } else {
        value & !((1 << shift) - 1)
    }
}

/// The low `shift` bits set. Callers keep `shift` below the word size.
const fn low_bits(shift: u32) -> usize {
    (1 << shift) - 1
}

/// Whether `key` falls inside the window `[min, min + 2^shift)`.
const fn window_covers(min: usize, shift: u32, key: usize) -> bool {
    key >= min && (shift >= usize::BITS || (key - min) >> shift == 0)
}

/// The child slot selected by `relative` (a key offset from `min`) at a
/// branch addressing `shift` key bits.
const fn child_index(relative: usize, shift: u32) -> usize {
    (relative >> (shift - BITS_PER_LEVEL)) & LEVEL_MASK
}

// =============================================================================
// Shared Trie Core
// =============================================================================
//
// Both map flavors share one trie shape, so descent, ordered search, folds,
// and growth are written once over nodes and the window.

/// Walks down the trie to the value stored at `key`, if any.
fn lookup<V>(root: &Option<Node<V>>, min: usize, shift: u32, key: usize) -> Option<&V> {
    let mut node = root.as_ref()?;
    if !window_covers(min, shift, key) {
        return None;
    }
    let relative = key - min;
    let mut shift = shift;
    loop {
        match node {
            Node::Leaf(value) => return Some(value),
            Node::Branch(branch) => {
                node = branch.children[child_index(relative, shift)].as_ref()?;
                shift -= BITS_PER_LEVEL;
            }
        }
    }
}

/// Builds a chain of single-child branches from `shift` down to a leaf
/// holding `value`. New branches carry `edit` so a transient can keep
/// mutating them in place.
fn leaf_chain<V>(
    shift: u32,
    relative: usize,
    value: V,
    edit: Option<&ReferenceCounter<EditCell>>,
) -> Node<V> {
    if shift == 0 {
        Node::Leaf(value)
    } else {
        let mut branch = Branch::new(edit.cloned());
        branch.children[child_index(relative, shift)] =
            Some(leaf_chain(shift - BITS_PER_LEVEL, relative, value, edit));
        Node::Branch(ReferenceCounter::new(branch))
    }
}

/// Wraps `root` as the single child of a branch one level taller, widening
/// the window. `min` is re-aligned to the coarser granularity.
fn grow_one_level<V>(
    min: usize,
    shift: u32,
    root: Node<V>,
    edit: Option<&ReferenceCounter<EditCell>>,
) -> (usize, u32, Node<V>) {
    let grown_shift = shift + BITS_PER_LEVEL;
    let grown_min = round_down(min, grown_shift);
    let index = (min - grown_min) >> shift;
    let mut branch = Branch::new(edit.cloned());
    branch.children[index] = Some(root);
    (grown_min, grown_shift, Node::Branch(ReferenceCounter::new(branch)))
}

/// Smallest stored key offset `>= lower` within a subtree spanning
/// `2^shift` keys, or `None`. `lower` must be below the subtree's span.
fn next_in<V>(node: &Node<V>, shift: u32, lower: usize) -> Option<usize> {
    match node {
        Node::Leaf(_) => (lower == 0).then_some(0),
        Node::Branch(branch) => {
            let child_shift = shift - BITS_PER_LEVEL;
            let start = lower >> child_shift;
            for index in start..BRANCHING_FACTOR {
                if let Some(child) = &branch.children[index] {
                    let sub_lower = if index == start {
                        lower & low_bits(child_shift)
                    } else {
                        0
                    };
                    if let Some(offset) = next_in(child, child_shift, sub_lower) {
                        return Some((index << child_shift) + offset);
                    }
                }
            }
            None
        }
    }
}

/// Largest stored key offset `<= upper` within a subtree spanning
/// `2^shift` keys, or `None`. `upper` must be below the subtree's span.
fn prev_in<V>(node: &Node<V>, shift: u32, upper: usize) -> Option<usize> {
    match node {
        Node::Leaf(_) => Some(0),
        Node::Branch(branch) => {
            let child_shift = shift - BITS_PER_LEVEL;
            let start = upper >> child_shift;
            for index in (0..=start).rev() {
                if let Some(child) = &branch.children[index] {
                    let sub_upper = if index == start {
                        upper & low_bits(child_shift)
                    } else {
                        low_bits(child_shift)
                    };
                    if let Some(offset) = prev_in(child, child_shift, sub_upper) {
                        return Some((index << child_shift) + offset);
                    }
                }
            }
            None
        }
    }
}

/// Smallest stored key `>= bound`, or `None`.
fn search_ge<V>(root: &Option<Node<V>>, min: usize, shift: u32, bound: usize) -> Option<usize> {
    let node = root.as_ref()?;
    let relative = bound.saturating_sub(min);
    if shift < usize::BITS && relative >> shift != 0 {
        return None;
    }
    next_in(node, shift, relative).map(|offset| min + offset)
}

/// Largest stored key `<= bound`, or `None`.
fn search_le<V>(root: &Option<Node<V>>, min: usize, shift: u32, bound: usize) -> Option<usize> {
    let node = root.as_ref()?;
    if bound < min {
        return None;
    }
    let relative = bound - min;
    let upper = if shift < usize::BITS {
        relative.min(low_bits(shift))
    } else {
        relative
    };
    prev_in(node, shift, upper).map(|offset| min + offset)
}

/// Folds every `(key, value)` pair in ascending key order.
fn fold_node<'map, V, B, F>(
    node: &'map Node<V>,
    base: usize,
    shift: u32,
    accumulator: B,
    function: &mut F,
) -> B
where
    F: FnMut(usize, &'map V, B) -> B,
{
    match node {
        Node::Leaf(value) => function(base, value, accumulator),
        Node::Branch(branch) => {
            let child_shift = shift - BITS_PER_LEVEL;
            let mut accumulator = accumulator;
            for (index, slot) in branch.children.iter().enumerate() {
                if let Some(child) = slot {
                    accumulator = fold_node(
                        child,
                        base + (index << child_shift),
                        child_shift,
                        accumulator,
                        function,
                    );
                }
            }
            accumulator
        }
    }
}

/// Folds every `(key, value)` pair in descending key order.
fn fold_node_reverse<'map, V, B, F>(
    node: &'map Node<V>,
    base: usize,
    shift: u32,
    accumulator: B,
    function: &mut F,
) -> B
where
    F: FnMut(usize, &'map V, B) -> B,
{
    match node {
        Node::Leaf(value) => function(base, value, accumulator),
        Node::Branch(branch) => {
            let child_shift = shift - BITS_PER_LEVEL;
            let mut accumulator = accumulator;
            for (index, slot) in branch.children.iter().enumerate().rev() {
                if let Some(child) = slot {
                    accumulator = fold_node_reverse(
                        child,
                        base + (index << child_shift),
                        child_shift,
                        accumulator,
                        function,
                    );
                }
            }
            accumulator
        }
    }
}

/// Collects all entries from a node in ascending key order.
fn collect_entries<'map, V>(
    node: &'map Node<V>,
    base: usize,
    shift: u32,
    entries: &mut SmallVec<[(usize, &'map V); BRANCHING_FACTOR]>,
) {
    match node {
        Node::Leaf(value) => entries.push((base, value)),
        Node::Branch(branch) => {
            let child_shift = shift - BITS_PER_LEVEL;
            for (index, slot) in branch.children.iter().enumerate() {
                if let Some(child) = slot {
                    collect_entries(child, base + (index << child_shift), child_shift, entries);
                }
            }
        }
    }
}

/// Whether two slots hold the same entry: shared branches compare by
/// identity, leaves by value.
fn same_entry<V: PartialEq>(left: &Option<Node<V>>, right: &Option<Node<V>>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(Node::Branch(left)), Some(Node::Branch(right))) => {
            ReferenceCounter::ptr_eq(left, right)
        }
        (Some(Node::Leaf(left)), Some(Node::Leaf(right))) => left == right,
        _ => false,
    }
}

/// Collapses redundant upper levels: while the root branch has exactly one
/// occupied slot, that child becomes the root and the window narrows. A
/// one-element map always ends up as a bare leaf at shift 0.
fn prune<V: Clone>(mut min: usize, mut shift: u32, mut root: Node<V>) -> PersistentIntMap<V> {
    while shift > 0 {
        let Node::Branch(branch) = &root else { break };
        let Some((index, child)) = branch.sole_child() else {
            break;
        };
        let child = child.clone();
        shift -= BITS_PER_LEVEL;
        min += index << shift;
        root = child;
    }
    PersistentIntMap {
        min,
        shift,
        root: Some(root),
    }
}

// =============================================================================
// Persistent Update Helpers
// =============================================================================

/// Recursive helper for persistent insert. Returns `Ok(None)` when the key
/// is already bound to an equal value, so callers can share the input
/// unchanged all the way up.
fn adjoin<V, F>(
    node: &Node<V>,
    shift: u32,
    relative: usize,
    value: V,
    meet: &mut F,
) -> Result<Option<Node<V>>, IntMapError>
where
    V: Clone + PartialEq,
    F: FnMut(&V, &V) -> Result<V, IntMapError>,
{
    match node {
        Node::Leaf(existing) => {
            if *existing == value {
                Ok(None)
            } else {
                Ok(Some(Node::Leaf(meet(existing, &value)?)))
            }
        }
        Node::Branch(branch) => {
            let index = child_index(relative, shift);
            match &branch.children[index] {
                None => {
                    let child = leaf_chain(shift - BITS_PER_LEVEL, relative, value, None);
                    Ok(Some(Node::Branch(ReferenceCounter::new(
                        branch.with_child(index, Some(child)),
                    ))))
                }
                Some(child) => {
                    match adjoin(child, shift - BITS_PER_LEVEL, relative, value, meet)? {
                        None => Ok(None),
                        Some(updated) => Ok(Some(Node::Branch(ReferenceCounter::new(
                            branch.with_child(index, Some(updated)),
                        )))),
                    }
                }
            }
        }
    }
}

/// Recursive helper for remove. Returns `None` when the key is absent,
/// `Some(None)` when the subtree became empty, and `Some(Some(node))` for a
/// rebuilt subtree.
fn remove_in<V: Clone>(node: &Node<V>, shift: u32, relative: usize) -> Option<Option<Node<V>>> {
    match node {
        Node::Leaf(_) => Some(None),
        Node::Branch(branch) => {
            let index = child_index(relative, shift);
            let child = branch.children[index].as_ref()?;
            match remove_in(child, shift - BITS_PER_LEVEL, relative)? {
                Some(updated) => Some(Some(Node::Branch(ReferenceCounter::new(
                    branch.with_child(index, Some(updated)),
                )))),
                None => {
                    let cleared = branch.with_child(index, None);
                    if cleared.children.iter().all(Option::is_none) {
                        Some(None)
                    } else {
                        Some(Some(Node::Branch(ReferenceCounter::new(cleared))))
                    }
                }
            }
        }
    }
}

/// Recursive helper for union over two subtrees covering the same window.
///
/// Preserves sharing three ways: if every merged slot matches the left
/// input the left node is returned as-is, likewise for the right, and only
/// otherwise is a fresh branch allocated.
fn union_in<V, F>(
    left: &Node<V>,
    right: &Node<V>,
    shift: u32,
    meet: &mut F,
) -> Result<Node<V>, IntMapError>
where
    V: Clone + PartialEq,
    F: FnMut(&V, &V) -> Result<V, IntMapError>,
{
    match (left, right) {
        (Node::Leaf(left_value), Node::Leaf(right_value)) => {
            if left_value == right_value {
                Ok(left.clone())
            } else {
                Ok(Node::Leaf(meet(left_value, right_value)?))
            }
        }
        (Node::Branch(left_branch), Node::Branch(right_branch)) => {
            if ReferenceCounter::ptr_eq(left_branch, right_branch) {
                return Ok(left.clone());
            }
            let child_shift = shift - BITS_PER_LEVEL;
            let mut children: [Option<Node<V>>; BRANCHING_FACTOR] =
                [const { None }; BRANCHING_FACTOR];
            let mut same_as_left = true;
            let mut same_as_right = true;
            for index in 0..BRANCHING_FACTOR {
                let merged = match (&left_branch.children[index], &right_branch.children[index]) {
                    (None, None) => None,
                    (Some(child), None) => Some(child.clone()),
                    (None, Some(child)) => Some(child.clone()),
                    (Some(left_child), Some(right_child)) => {
                        Some(union_in(left_child, right_child, child_shift, meet)?)
                    }
                };
                same_as_left = same_as_left && same_entry(&merged, &left_branch.children[index]);
                same_as_right = same_as_right && same_entry(&merged, &right_branch.children[index]);
                children[index] = merged;
            }
            if same_as_left {
                return Ok(left.clone());
            }
            if same_as_right {
                return Ok(right.clone());
            }
            Ok(Node::Branch(ReferenceCounter::new(Branch {
                edit: None,
                children,
            })))
        }
        _ => unreachable!(),
    }
}

/// Recursive helper for intersection over two subtrees covering the same
/// window. Returns `None` when the intersection is empty.
fn intersect_in<V, F>(
    left: &Node<V>,
    right: &Node<V>,
    shift: u32,
    meet: &mut F,
) -> Result<Option<Node<V>>, IntMapError>
where
    V: Clone + PartialEq,
    F: FnMut(&V, &V) -> Result<V, IntMapError>,
{
    match (left, right) {
        (Node::Leaf(left_value), Node::Leaf(right_value)) => {
            if left_value == right_value {
                Ok(Some(left.clone()))
            } else {
                Ok(Some(Node::Leaf(meet(left_value, right_value)?)))
            }
        }
        (Node::Branch(left_branch), Node::Branch(right_branch)) => {
            if ReferenceCounter::ptr_eq(left_branch, right_branch) {
                return Ok(Some(left.clone()));
            }
            let child_shift = shift - BITS_PER_LEVEL;
            let mut children: [Option<Node<V>>; BRANCHING_FACTOR] =
                [const { None }; BRANCHING_FACTOR];
            let mut same_as_left = true;
            let mut same_as_right = true;
            let mut occupied = false;
            for index in 0..BRANCHING_FACTOR {
                let merged = match (&left_branch.children[index], &right_branch.children[index]) {
                    (Some(left_child), Some(right_child)) => {
                        intersect_in(left_child, right_child, child_shift, meet)?
                    }
                    _ => None,
                };
                occupied = occupied || merged.is_some();
                same_as_left = same_as_left && same_entry(&merged, &left_branch.children[index]);
                same_as_right = same_as_right && same_entry(&merged, &right_branch.children[index]);
                children[index] = merged;
            }
            if !occupied {
                return Ok(None);
            }
            if same_as_left {
                return Ok(Some(left.clone()));
            }
            if same_as_right {
                return Ok(Some(right.clone()));
            }
            Ok(Some(Node::Branch(ReferenceCounter::new(Branch {
                edit: None,
                children,
            }))))
        }
        _ => unreachable!(),
    }
}

/// One step of intersection window reconciliation: descends the wider
/// window (the one with the smaller `min`) into its child covering
/// `target_min`. `None` means the windows cannot overlap.
fn descend_toward<V: Clone>(
    window: &(usize, u32, Node<V>),
    target_min: usize,
    target_shift: u32,
) -> Option<(usize, u32, Node<V>)> {
    let (min, shift, node) = window;
    if *shift <= target_shift {
        // Both mins are aligned to at least this granularity, so the whole
        // window lies below `target_min`.
        return None;
    }
    let child_shift = shift - BITS_PER_LEVEL;
    let index = (target_min - min) >> child_shift;
    if index >= BRANCHING_FACTOR {
        return None;
    }
    let Node::Branch(branch) = node else {
        unreachable!()
    };
    let child = branch.children[index].as_ref()?.clone();
    Some((min + (index << child_shift), child_shift, child))
}

/// One step of intersection window reconciliation when the mins agree:
/// descends the taller window into its lowest slot, discarding keys the
/// shorter window cannot contain. `None` means the intersection is empty.
fn descend_low_slot<V: Clone>(window: &(usize, u32, Node<V>)) -> Option<(usize, u32, Node<V>)> {
    let (min, shift, node) = window;
    let Node::Branch(branch) = node else {
        unreachable!()
    };
    let child = branch.children[0].as_ref()?.clone();
    Some((*min, shift - BITS_PER_LEVEL, child))
}

// =============================================================================
// PersistentIntMap Definition
// =============================================================================

/// A persistent (immutable) sparse map with `usize` keys.
///
/// `PersistentIntMap` is an immutable data structure that uses structural
/// sharing to efficiently support functional update patterns. Keys are used
/// directly as trie paths — no hashing — so iteration and folds visit
/// entries in ascending key order, and the map supports ordered
/// successor/predecessor queries.
///
/// Inserting a value for an already-bound key does not silently replace it:
/// [`insert`](Self::insert) fails with [`IntMapError::ValueConflict`] when
/// the values differ, and [`insert_with`](Self::insert_with) resolves the
/// conflict with a caller-supplied merge function. This makes the map safe
/// to use as an accumulator in fixed-point computations where an unnoticed
/// overwrite would hide a bug.
///
/// # Time Complexity
///
/// | Operation      | Complexity        |
/// |----------------|-------------------|
/// | `new`          | O(1)              |
/// | `get`          | O(log32 N)        |
/// | `insert`       | O(log32 N)        |
/// | `remove`       | O(log32 N)        |
/// | `next_key`     | O(log32 N)        |
/// | `union`        | O(N + M), with shared subtrees skipped |
/// | `intersect`    | O(min(N, M)), with shared subtrees skipped |
/// | `is_empty`     | O(1)              |
/// | `len`          | O(N)              |
///
/// # Examples
///
/// ```rust
/// use intrie::persistent::PersistentIntMap;
///
/// let map = PersistentIntMap::singleton(42, "answer");
/// assert_eq!(map.get(42), Some(&"answer"));
/// ```
#[derive(Clone)]
pub struct PersistentIntMap<V> {
    /// Lowest key addressable from the root without growing.
    min: usize,
    /// Key bits addressable from the root; 0 or a multiple of 5.
    shift: u32,
    /// `None` for the empty map, a leaf for a one-element map at shift 0,
    /// and a branch otherwise.
    root: Option<Node<V>>,
}

impl<V> PersistentIntMap<V> {
    /// Creates a new empty map.
    ///
    /// Allocation-free: the empty map is just the window `(0, 0)` with no
    /// root node.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> = PersistentIntMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min: 0,
            shift: 0,
            root: None,
        }
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(N) — the count is not cached, so that `union` and `intersect` can
    /// return shared subtrees without visiting them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map = PersistentIntMap::new()
    ///     .insert(1, 'a')
    ///     .unwrap()
    ///     .insert(2, 'b')
    ///     .unwrap();
    /// assert_eq!(map.len(), 2);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.fold(0, |_, _, count| count + 1)
    }

    /// Returns a reference to the value bound to `key`.
    ///
    /// # Complexity
    ///
    /// O(log32 N), no allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map = PersistentIntMap::singleton(7, "seven");
    /// assert_eq!(map.get(7), Some(&"seven"));
    /// assert_eq!(map.get(8), None);
    /// ```
    #[must_use]
    pub fn get(&self, key: usize) -> Option<&V> {
        lookup(&self.root, self.min, self.shift, key)
    }

    /// Returns `true` if the map contains a value for `key`.
    #[must_use]
    pub fn contains_key(&self, key: usize) -> bool {
        self.get(key).is_some()
    }

    /// Returns the smallest key in the map, or `None` if the map is empty.
    #[must_use]
    pub fn first_key(&self) -> Option<usize> {
        search_ge(&self.root, self.min, self.shift, 0)
    }

    /// Returns the largest key in the map, or `None` if the map is empty.
    #[must_use]
    pub fn last_key(&self) -> Option<usize> {
        search_le(&self.root, self.min, self.shift, usize::MAX)
    }

    /// Returns the smallest key strictly greater than `key`, or `None`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> =
    ///     [(1, 10), (32, 20), (1024, 30)].into_iter().collect();
    ///
    /// assert_eq!(map.next_key(1), Some(32));
    /// assert_eq!(map.next_key(2), Some(32));
    /// assert_eq!(map.next_key(1024), None);
    /// ```
    #[must_use]
    pub fn next_key(&self, key: usize) -> Option<usize> {
        search_ge(&self.root, self.min, self.shift, key.checked_add(1)?)
    }

    /// Returns the largest key strictly less than `key`, or `None`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> =
    ///     [(1, 10), (32, 20), (1024, 30)].into_iter().collect();
    ///
    /// assert_eq!(map.prev_key(1024), Some(32));
    /// assert_eq!(map.prev_key(1), None);
    /// ```
    #[must_use]
    pub fn prev_key(&self, key: usize) -> Option<usize> {
        search_le(&self.root, self.min, self.shift, key.checked_sub(1)?)
    }

    /// Folds every `(key, value)` pair in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> = [(1, 10), (2, 20)].into_iter().collect();
    /// let sum = map.fold(0, |_key, value, accumulator| accumulator + value);
    /// assert_eq!(sum, 30);
    /// ```
    pub fn fold<B, F>(&self, seed: B, mut function: F) -> B
    where
        F: FnMut(usize, &V, B) -> B,
    {
        match &self.root {
            None => seed,
            Some(node) => fold_node(node, self.min, self.shift, seed, &mut function),
        }
    }

    /// Folds every `(key, value)` pair in descending key order.
    pub fn fold_right<B, F>(&self, seed: B, mut function: F) -> B
    where
        F: FnMut(usize, &V, B) -> B,
    {
        match &self.root {
            None => seed,
            Some(node) => fold_node_reverse(node, self.min, self.shift, seed, &mut function),
        }
    }

    /// Returns an iterator over key-value pairs in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> = [(2, 20), (1, 10)].into_iter().collect();
    /// let entries: Vec<(usize, &i32)> = map.iter().collect();
    /// assert_eq!(entries, vec![(1, &10), (2, &20)]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentIntMapIterator<'_, V> {
        let mut entries = SmallVec::new();
        if let Some(root) = &self.root {
            collect_entries(root, self.min, self.shift, &mut entries);
        }
        PersistentIntMapIterator {
            entries,
            current_index: 0,
        }
    }

    /// Returns an iterator over keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

impl<V: Clone + PartialEq> PersistentIntMap<V> {
    /// Creates a map containing a single key-value pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map = PersistentIntMap::singleton(5, "five");
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: usize, value: V) -> Self {
        Self {
            min: key,
            shift: 0,
            root: Some(Node::Leaf(value)),
        }
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If `key` is already bound to an equal value the map is returned
    /// unchanged (sharing its root with `self`).
    ///
    /// # Errors
    ///
    /// [`IntMapError::ValueConflict`] if `key` is bound to a different
    /// value. Use [`insert_with`](Self::insert_with) to resolve conflicts.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map = PersistentIntMap::new().insert(1, "one").unwrap();
    ///
    /// assert_eq!(map.get(1), Some(&"one"));
    /// assert!(map.insert(1, "uno").is_err());
    /// ```
    pub fn insert(&self, key: usize, value: V) -> Result<Self, IntMapError> {
        self.insert_with_meet(key, value, &mut |_, _| Err(IntMapError::ValueConflict))
    }

    /// Inserts a key-value pair, resolving conflicts with `meet`.
    ///
    /// When `key` is already bound to a different value, the stored value
    /// becomes `meet(&existing, &new)`. When the values are equal the map
    /// is returned unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let counts = PersistentIntMap::singleton(3, 1);
    /// let bumped = counts.insert_with(3, 1, |old, new| old + new);
    /// // Equal values leave the map unchanged...
    /// assert_eq!(bumped.get(3), Some(&1));
    /// // ...while differing values are merged.
    /// let merged = counts.insert_with(3, 9, |old, new| old + new);
    /// assert_eq!(merged.get(3), Some(&10));
    /// ```
    #[must_use]
    pub fn insert_with<F>(&self, key: usize, value: V, mut meet: F) -> Self
    where
        F: FnMut(&V, &V) -> V,
    {
        match self.insert_with_meet(key, value, &mut |left, right| Ok(meet(left, right))) {
            Ok(map) => map,
            Err(_) => unreachable!(),
        }
    }

    fn insert_with_meet<F>(&self, key: usize, value: V, meet: &mut F) -> Result<Self, IntMapError>
    where
        F: FnMut(&V, &V) -> Result<V, IntMapError>,
    {
        let Some(root) = self.root.as_ref() else {
            return Ok(Self::singleton(key, value));
        };
        if window_covers(self.min, self.shift, key) {
            return match adjoin(root, self.shift, key - self.min, value, meet)? {
                None => Ok(self.clone()),
                Some(updated) => Ok(Self {
                    min: self.min,
                    shift: self.shift,
                    root: Some(updated),
                }),
            };
        }
        if key < self.min {
            // The new key lies below the window, so it cannot collide with
            // any existing binding; rebuild by unioning a fresh singleton.
            return Self::singleton(key, value).union_with_meet(self, &mut |_, _| unreachable!());
        }
        let (mut min, mut shift, mut root) = (self.min, self.shift, root.clone());
        while !window_covers(min, shift, key) {
            (min, shift, root) = grow_one_level(min, shift, root, None);
        }
        match adjoin(&root, shift, key - min, value, meet)? {
            None => Ok(self.clone()),
            Some(updated) => Ok(Self {
                min,
                shift,
                root: Some(updated),
            }),
        }
    }

    /// Removes `key` from the map.
    ///
    /// If the key is absent the map is returned unchanged, sharing its root
    /// with `self`. After a removal the window is pruned back to the
    /// remaining support, so a one-element result is always a bare leaf.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map: PersistentIntMap<i32> = [(1, 10), (2, 20)].into_iter().collect();
    /// let removed = map.remove(1);
    ///
    /// assert_eq!(map.get(1), Some(&10)); // Original unchanged
    /// assert_eq!(removed.get(1), None);
    /// assert_eq!(removed.get(2), Some(&20));
    /// ```
    #[must_use]
    pub fn remove(&self, key: usize) -> Self {
        let Some(root) = self.root.as_ref() else {
            return self.clone();
        };
        if !window_covers(self.min, self.shift, key) {
            return self.clone();
        }
        match remove_in(root, self.shift, key - self.min) {
            None => self.clone(),
            Some(None) => Self::new(),
            Some(Some(updated)) => prune(self.min, self.shift, updated),
        }
    }

    /// Combines two maps; keys present in only one side survive unchanged.
    ///
    /// # Errors
    ///
    /// [`IntMapError::ValueConflict`] if a key is bound to different values
    /// on the two sides. Use [`union_with`](Self::union_with) to resolve
    /// conflicts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let left = PersistentIntMap::singleton(0, 'a');
    /// let right = PersistentIntMap::singleton(1_000_000, 'b');
    /// let both = left.union(&right).unwrap();
    ///
    /// assert_eq!(both.get(0), Some(&'a'));
    /// assert_eq!(both.get(1_000_000), Some(&'b'));
    /// ```
    pub fn union(&self, other: &Self) -> Result<Self, IntMapError> {
        self.union_with_meet(other, &mut |_, _| Err(IntMapError::ValueConflict))
    }

    /// Combines two maps, resolving per-key conflicts with `meet`.
    ///
    /// `meet` receives this map's value on the left and `other`'s on the
    /// right; keys bound to equal values on both sides are shared without
    /// calling it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let left = PersistentIntMap::singleton(1, 10);
    /// let right = PersistentIntMap::singleton(1, 32);
    /// let merged = left.union_with(&right, |l, r| l + r);
    ///
    /// assert_eq!(merged.get(1), Some(&42));
    /// ```
    #[must_use]
    pub fn union_with<F>(&self, other: &Self, mut meet: F) -> Self
    where
        F: FnMut(&V, &V) -> V,
    {
        match self.union_with_meet(other, &mut |left, right| Ok(meet(left, right))) {
            Ok(map) => map,
            Err(_) => unreachable!(),
        }
    }

    fn union_with_meet<F>(&self, other: &Self, meet: &mut F) -> Result<Self, IntMapError>
    where
        F: FnMut(&V, &V) -> Result<V, IntMapError>,
    {
        let Some(left_root) = self.root.as_ref() else {
            return Ok(other.clone());
        };
        let Some(right_root) = other.root.as_ref() else {
            return Ok(self.clone());
        };

        let (mut left_min, mut left_shift, mut left_node) =
            (self.min, self.shift, left_root.clone());
        let (mut right_min, mut right_shift, mut right_node) =
            (other.min, other.shift, right_root.clone());

        // Grow the shallower side until the shifts agree, then grow both in
        // lockstep until the windows coincide.
        while left_shift < right_shift {
            (left_min, left_shift, left_node) =
                grow_one_level(left_min, left_shift, left_node, None);
        }
        while right_shift < left_shift {
            (right_min, right_shift, right_node) =
                grow_one_level(right_min, right_shift, right_node, None);
        }
        while left_min != right_min {
            (left_min, left_shift, left_node) =
                grow_one_level(left_min, left_shift, left_node, None);
            (right_min, right_shift, right_node) =
                grow_one_level(right_min, right_shift, right_node, None);
        }

        let root = union_in(&left_node, &right_node, left_shift, meet)?;
        Ok(Self {
            min: left_min,
            shift: left_shift,
            root: Some(root),
        })
    }

    /// Keeps only the keys present in both maps.
    ///
    /// Keys bound to equal values on both sides are shared; the result's
    /// window is pruned to its actual support.
    ///
    /// # Errors
    ///
    /// [`IntMapError::ValueConflict`] if a common key is bound to different
    /// values. Use [`intersect_with`](Self::intersect_with) to resolve
    /// conflicts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let left: PersistentIntMap<i32> = [(1, 10), (2, 20)].into_iter().collect();
    /// let right: PersistentIntMap<i32> = [(2, 20), (3, 30)].into_iter().collect();
    /// let common = left.intersect(&right).unwrap();
    ///
    /// assert_eq!(common.get(2), Some(&20));
    /// assert_eq!(common.get(1), None);
    /// assert_eq!(common.get(3), None);
    /// ```
    pub fn intersect(&self, other: &Self) -> Result<Self, IntMapError> {
        self.intersect_with_meet(other, &mut |_, _| Err(IntMapError::ValueConflict))
    }

    /// Keeps only the keys present in both maps, combining values with
    /// `meet`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let left: PersistentIntMap<i32> = [(1, 10), (2, 20)].into_iter().collect();
    /// let right: PersistentIntMap<i32> = [(2, 2), (3, 3)].into_iter().collect();
    /// let common = left.intersect_with(&right, |l, r| l.min(r).clone());
    ///
    /// assert_eq!(common.get(2), Some(&2));
    /// assert_eq!(common.len(), 1);
    /// ```
    #[must_use]
    pub fn intersect_with<F>(&self, other: &Self, mut meet: F) -> Self
    where
        F: FnMut(&V, &V) -> V,
    {
        match self.intersect_with_meet(other, &mut |left, right| Ok(meet(left, right))) {
            Ok(map) => map,
            Err(_) => unreachable!(),
        }
    }

    fn intersect_with_meet<F>(&self, other: &Self, meet: &mut F) -> Result<Self, IntMapError>
    where
        F: FnMut(&V, &V) -> Result<V, IntMapError>,
    {
        let (Some(left_root), Some(right_root)) = (self.root.as_ref(), other.root.as_ref()) else {
            return Ok(Self::new());
        };

        let mut left = (self.min, self.shift, left_root.clone());
        let mut right = (other.min, other.shift, right_root.clone());

        // Unlike union, a window mismatch never grows anything: the wider
        // window descends toward the other's range, and a miss anywhere
        // means the intersection is empty.
        loop {
            if left.0 < right.0 {
                let Some(descended) = descend_toward(&left, right.0, right.1) else {
                    return Ok(Self::new());
                };
                left = descended;
            } else if right.0 < left.0 {
                let Some(descended) = descend_toward(&right, left.0, left.1) else {
                    return Ok(Self::new());
                };
                right = descended;
            } else if left.1 > right.1 {
                let Some(descended) = descend_low_slot(&left) else {
                    return Ok(Self::new());
                };
                left = descended;
            } else if right.1 > left.1 {
                let Some(descended) = descend_low_slot(&right) else {
                    return Ok(Self::new());
                };
                right = descended;
            } else {
                break;
            }
        }

        let (min, shift, left_node) = left;
        match intersect_in(&left_node, &right.2, shift, meet)? {
            None => Ok(Self::new()),
            Some(root) => Ok(prune(min, shift, root)),
        }
    }

    /// Converts this map into a transient for batch mutation.
    ///
    /// O(1): the transient starts out sharing this map's nodes and copies
    /// them lazily on first write.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let mut transient = PersistentIntMap::new().transient();
    /// for key in 0..1000 {
    ///     transient.insert(key, key).unwrap();
    /// }
    /// let map = transient.persistent().unwrap();
    /// assert_eq!(map.len(), 1000);
    /// ```
    #[must_use]
    pub fn transient(self) -> TransientIntMap<V> {
        TransientIntMap {
            min: self.min,
            shift: self.shift,
            root: self.root,
            edit: ReferenceCounter::new(EditCell::new()),
        }
    }

    /// Returns `true` if both maps have the same representation and share
    /// their storage: a cheap, conservative sameness check.
    ///
    /// Two maps for which this returns `true` are equal; equal maps may
    /// still compare `false` when they were built separately.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::PersistentIntMap;
    ///
    /// let map = PersistentIntMap::singleton(1, 'a');
    /// // Re-inserting an equal value returns the map unchanged.
    /// let same = map.insert(1, 'a').unwrap();
    /// assert!(map.ptr_eq(&same));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.min == other.min
            && self.shift == other.shift
            && match (&self.root, &other.root) {
                (None, None) => true,
                (Some(Node::Branch(left)), Some(Node::Branch(right))) => {
                    ReferenceCounter::ptr_eq(left, right)
                }
                (Some(Node::Leaf(left)), Some(Node::Leaf(right))) => left == right,
                _ => false,
            }
    }
}

// =============================================================================
// TransientIntMap Definition
// =============================================================================

/// A single-owner, temporarily mutable variant of [`PersistentIntMap`].
///
/// Transients make batch construction cheap: instead of allocating a fresh
/// path from the root for every insertion, a transient mutates in place the
/// nodes it has allocated itself, and copies shared nodes only on first
/// write. Sealing the transient with [`persistent`](Self::persistent) is
/// O(1) and freezes everything it allocated.
///
/// A transient is pinned to the thread that created it; every operation
/// fails with [`IntMapError::OwnershipViolation`] when invoked from any
/// other thread. After sealing, the same handle may keep inserting — it
/// behaves as a fresh transient snapshot of the sealed result, and the
/// sealed map is unaffected.
///
/// # Examples
///
/// ```rust
/// use intrie::persistent::{PersistentIntMap, TransientIntMap};
///
/// let mut transient = TransientIntMap::new();
/// for key in 0..100 {
///     transient.insert(key, key * 2).unwrap();
/// }
/// let map = transient.persistent().unwrap();
///
/// // The sealed map is isolated from further mutation of the handle.
/// transient.insert_with(0, 999, |_, new| *new).unwrap();
/// assert_eq!(map.get(0), Some(&0));
/// ```
pub struct TransientIntMap<V> {
    min: usize,
    shift: u32,
    root: Option<Node<V>>,
    edit: ReferenceCounter<EditCell>,
}

impl<V> TransientIntMap<V> {
    /// Creates a new empty transient owned by the current thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min: 0,
            shift: 0,
            root: None,
            edit: ReferenceCounter::new(EditCell::new()),
        }
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Fails unless the calling thread owns this transient.
    fn guard(&self) -> Result<(), IntMapError> {
        if thread::current().id() == self.edit.owner {
            Ok(())
        } else {
            Err(IntMapError::OwnershipViolation)
        }
    }

    /// Returns a reference to the value bound to `key`.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a thread other
    /// than the owner.
    pub fn get(&self, key: usize) -> Result<Option<&V>, IntMapError> {
        self.guard()?;
        Ok(lookup(&self.root, self.min, self.shift, key))
    }

    /// Returns the smallest key in the map.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn first_key(&self) -> Result<Option<usize>, IntMapError> {
        self.guard()?;
        Ok(search_ge(&self.root, self.min, self.shift, 0))
    }

    /// Returns the largest key in the map.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn last_key(&self) -> Result<Option<usize>, IntMapError> {
        self.guard()?;
        Ok(search_le(&self.root, self.min, self.shift, usize::MAX))
    }

    /// Returns the smallest key strictly greater than `key`.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn next_key(&self, key: usize) -> Result<Option<usize>, IntMapError> {
        self.guard()?;
        Ok(key
            .checked_add(1)
            .and_then(|bound| search_ge(&self.root, self.min, self.shift, bound)))
    }

    /// Returns the largest key strictly less than `key`.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn prev_key(&self, key: usize) -> Result<Option<usize>, IntMapError> {
        self.guard()?;
        Ok(key
            .checked_sub(1)
            .and_then(|bound| search_le(&self.root, self.min, self.shift, bound)))
    }

    /// Folds every `(key, value)` pair in ascending key order.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn fold<B, F>(&self, seed: B, mut function: F) -> Result<B, IntMapError>
    where
        F: FnMut(usize, &V, B) -> B,
    {
        self.guard()?;
        Ok(match &self.root {
            None => seed,
            Some(node) => fold_node(node, self.min, self.shift, seed, &mut function),
        })
    }
}

impl<V: Clone + PartialEq> TransientIntMap<V> {
    /// Inserts a key-value pair, mutating the transient in place.
    ///
    /// Nodes owned by this transient are updated directly; nodes shared
    /// with persistent maps are copied first, so snapshots are never
    /// affected.
    ///
    /// # Errors
    ///
    /// - [`IntMapError::ValueConflict`] if `key` is bound to a different
    ///   value; use [`insert_with`](Self::insert_with) to merge.
    /// - [`IntMapError::OwnershipViolation`] if called from a non-owner
    ///   thread.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::TransientIntMap;
    ///
    /// let mut transient = TransientIntMap::new();
    /// transient.insert(3, "three").unwrap();
    /// assert_eq!(transient.get(3).unwrap(), Some(&"three"));
    /// ```
    pub fn insert(&mut self, key: usize, value: V) -> Result<(), IntMapError> {
        self.insert_with_meet(key, value, &mut |_, _| Err(IntMapError::ValueConflict))
    }

    /// Inserts a key-value pair, resolving conflicts with `meet`.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    pub fn insert_with<F>(&mut self, key: usize, value: V, mut meet: F) -> Result<(), IntMapError>
    where
        F: FnMut(&V, &V) -> V,
    {
        self.insert_with_meet(key, value, &mut |left, right| Ok(meet(left, right)))
    }

    fn insert_with_meet<F>(
        &mut self,
        key: usize,
        value: V,
        meet: &mut F,
    ) -> Result<(), IntMapError>
    where
        F: FnMut(&V, &V) -> Result<V, IntMapError>,
    {
        self.guard()?;
        let edit = self.edit.clone();
        let Some(root) = self.root.take() else {
            self.min = key;
            self.shift = 0;
            self.root = Some(Node::Leaf(value));
            return Ok(());
        };
        let (mut min, mut shift, mut root) = (self.min, self.shift, root);
        while !window_covers(min, shift, key) {
            (min, shift, root) = grow_one_level(min, shift, root, Some(&edit));
        }
        let mut slot = Some(root);
        let outcome = adjoin_mut(&mut slot, shift, key - min, value, &edit, meet);
        self.min = min;
        self.shift = shift;
        self.root = slot;
        outcome
    }

    /// Seals this transient into a persistent map.
    ///
    /// O(1): the returned map takes over the current trie, and the handle
    /// is rebound to a fresh edit cell. Every node allocated so far is
    /// thereby frozen — further insertions through this handle copy on
    /// write, exactly as if the transient had just been created from the
    /// returned map.
    ///
    /// # Errors
    ///
    /// [`IntMapError::OwnershipViolation`] if called from a non-owner thread.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use intrie::persistent::TransientIntMap;
    ///
    /// let mut transient = TransientIntMap::new();
    /// transient.insert(1, 'a').unwrap();
    ///
    /// let sealed = transient.persistent().unwrap();
    /// transient.insert(2, 'b').unwrap();
    ///
    /// assert_eq!(sealed.len(), 1);
    /// assert_eq!(transient.get(2).unwrap(), Some(&'b'));
    /// ```
    pub fn persistent(&mut self) -> Result<PersistentIntMap<V>, IntMapError> {
        self.guard()?;
        self.edit = ReferenceCounter::new(EditCell::new());
        if self.root.is_none() {
            return Ok(PersistentIntMap::new());
        }
        Ok(PersistentIntMap {
            min: self.min,
            shift: self.shift,
            root: self.root.clone(),
        })
    }
}

impl<V> Default for TransientIntMap<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Transient Update Helpers
// =============================================================================

/// Makes `branch` writable by the transient owning `edit`: a branch
/// carrying the same edit cell is returned as-is for in-place mutation,
/// anything else is cloned and stamped first.
fn writable_branch<'branch, V: Clone>(
    branch: &'branch mut ReferenceCounter<Branch<V>>,
    edit: &ReferenceCounter<EditCell>,
) -> &'branch mut Branch<V> {
    let owned = branch
        .edit
        .as_ref()
        .is_some_and(|token| ReferenceCounter::ptr_eq(token, edit));
    if !owned {
        *branch = ReferenceCounter::new(Branch {
            edit: Some(edit.clone()),
            children: branch.children.clone(),
        });
    }
    ReferenceCounter::make_mut(branch)
}

/// Recursive helper for transient insert: same key-range logic as the
/// persistent `adjoin`, but mutating slots through writable branches.
fn adjoin_mut<V, F>(
    slot: &mut Option<Node<V>>,
    shift: u32,
    relative: usize,
    value: V,
    edit: &ReferenceCounter<EditCell>,
    meet: &mut F,
) -> Result<(), IntMapError>
where
    V: Clone + PartialEq,
    F: FnMut(&V, &V) -> Result<V, IntMapError>,
{
    match slot {
        None => {
            *slot = Some(leaf_chain(shift, relative, value, Some(edit)));
            Ok(())
        }
        Some(Node::Leaf(existing)) => {
            if *existing != value {
                let merged = meet(existing, &value)?;
                *existing = merged;
            }
            Ok(())
        }
        Some(Node::Branch(branch)) => {
            let index = child_index(relative, shift);
            let writable = writable_branch(branch, edit);
            adjoin_mut(
                &mut writable.children[index],
                shift - BITS_PER_LEVEL,
                relative,
                value,
                edit,
                meet,
            )
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over key-value pairs of a [`PersistentIntMap`] in ascending
/// key order.
pub struct PersistentIntMapIterator<'map, V> {
    entries: SmallVec<[(usize, &'map V); BRANCHING_FACTOR]>,
    current_index: usize,
}

impl<'map, V> Iterator for PersistentIntMapIterator<'map, V> {
    type Item = (usize, &'map V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.entries.len() {
            None
        } else {
            let entry = self.entries[self.current_index];
            self.current_index += 1;
            Some(entry)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<V> ExactSizeIterator for PersistentIntMapIterator<'_, V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

/// An owning iterator over key-value pairs of a [`PersistentIntMap`] in
/// ascending key order.
pub struct PersistentIntMapIntoIterator<V> {
    entries: Vec<(usize, V)>,
    current_index: usize,
}

impl<V: Clone> Iterator for PersistentIntMapIntoIterator<V> {
    type Item = (usize, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.entries.len() {
            None
        } else {
            let entry = self.entries[self.current_index].clone();
            self.current_index += 1;
            Some(entry)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<V: Clone> ExactSizeIterator for PersistentIntMapIntoIterator<V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<V> Default for PersistentIntMap<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + PartialEq> FromIterator<(usize, V)> for PersistentIntMap<V> {
    /// Builds a map from an iterator of entries. Later entries replace
    /// earlier ones bound to the same key.
    fn from_iter<I: IntoIterator<Item = (usize, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map = map.insert_with(key, value, |_, replacement| replacement.clone());
        }
        map
    }
}

impl<V: Clone> IntoIterator for PersistentIntMap<V> {
    type Item = (usize, V);
    type IntoIter = PersistentIntMapIntoIterator<V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(usize, V)> = self
            .iter()
            .map(|(key, value)| (key, value.clone()))
            .collect();
        PersistentIntMapIntoIterator {
            entries,
            current_index: 0,
        }
    }
}

impl<'map, V> IntoIterator for &'map PersistentIntMap<V> {
    type Item = (usize, &'map V);
    type IntoIter = PersistentIntMapIterator<'map, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: PartialEq> PartialEq for PersistentIntMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl<V: Eq> Eq for PersistentIntMap<V> {}

impl<V: fmt::Debug> fmt::Debug for PersistentIntMap<V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<V: serde::Serialize> serde::Serialize for PersistentIntMap<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(&key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentIntMapVisitor<V> {
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<V> PersistentIntMapVisitor<V> {
    const fn new() -> Self {
        Self {
            value_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, V> serde::de::Visitor<'de> for PersistentIntMapVisitor<V>
where
    V: serde::Deserialize<'de> + Clone + PartialEq,
{
    type Value = PersistentIntMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map with nonnegative integer keys")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = PersistentIntMap::new();
        while let Some((key, value)) = access.next_entry::<usize, V>()? {
            map = map.insert_with(key, value, |_, replacement| replacement.clone());
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, V> serde::Deserialize<'de> for PersistentIntMap<V>
where
    V: serde::Deserialize<'de> + Clone + PartialEq,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentIntMapVisitor::new())
    }
}

// =============================================================================
// Rayon Support
// =============================================================================

/// A parallel iterator over owned key-value pairs of a
/// [`PersistentIntMap`].
#[cfg(feature = "rayon")]
pub struct PersistentIntMapParallelIterator<V> {
    entries: rayon::vec::IntoIter<(usize, V)>,
}

#[cfg(feature = "rayon")]
impl<V: Send> ParallelIterator for PersistentIntMapParallelIterator<V> {
    type Item = (usize, V);

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        self.entries.drive_unindexed(consumer)
    }
}

/// A parallel iterator over borrowed key-value pairs of a
/// [`PersistentIntMap`].
#[cfg(feature = "rayon")]
pub struct PersistentIntMapParallelRefIterator<'map, V> {
    entries: rayon::vec::IntoIter<(usize, &'map V)>,
}

#[cfg(feature = "rayon")]
impl<'map, V: Sync> ParallelIterator for PersistentIntMapParallelRefIterator<'map, V> {
    type Item = (usize, &'map V);

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        self.entries.drive_unindexed(consumer)
    }
}

#[cfg(feature = "rayon")]
impl<V: Clone + PartialEq> PersistentIntMap<V> {
    /// Returns a parallel iterator over borrowed key-value pairs.
    pub fn par_iter(&self) -> PersistentIntMapParallelRefIterator<'_, V>
    where
        V: Sync,
    {
        PersistentIntMapParallelRefIterator {
            entries: self.iter().collect::<Vec<_>>().into_par_iter(),
        }
    }

    /// Converts the map into a parallel iterator over owned key-value
    /// pairs.
    #[must_use]
    pub fn into_par_iter(self) -> PersistentIntMapParallelIterator<V>
    where
        V: Send,
    {
        let entries: Vec<(usize, V)> = self
            .iter()
            .map(|(key, value)| (key, value.clone()))
            .collect();
        PersistentIntMapParallelIterator {
            entries: entries.into_par_iter(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
