//! Disk-resident B-tree mapping `i64` keys to `i64` values.
//!
//! # Structure
//!
//! A classic B-tree of minimum degree `T = 10`:
//! - every node holds at most `2T - 1 = 19` keys and `2T = 20` children
//! - every node except the root holds at least `T - 1 = 9` keys
//! - all leaves sit at the same depth
//!
//! Nodes live one per block and reference each other by block id only. The
//! tree is never held in memory as a whole; every operation reads and writes
//! the blocks it visits.
//!
//! # Splitting
//!
//! Inserts split full nodes on the way down (top-down splitting), so the leaf
//! reached at the end always has room and no second pass back up the tree is
//! needed. A split always writes its two halves to freshly allocated blocks.

mod cursor;
mod node;
mod tree;

pub use cursor::Cursor;
pub use node::{Node, NodeError};
pub use tree::{BTree, BTreeError, TreeStats};

/// Minimum degree.
pub const T: usize = 10;

/// Maximum keys per node (`2T - 1`).
pub const MAX_KEYS: usize = 2 * T - 1;

/// Minimum keys per non-root node (`T - 1`).
pub const MIN_KEYS: usize = T - 1;

/// Maximum children per internal node (`2T`).
pub const MAX_CHILDREN: usize = 2 * T;

/// Deepest tree any traversal will descend before declaring the file corrupt.
///
/// A tree of depth 64 at the minimum fanout holds far more keys than 64-bit
/// block ids can address.
pub const MAX_DEPTH: usize = 64;
