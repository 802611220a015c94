//! B-tree node type and its block codec.
//!
//! Every node occupies exactly one 512-byte block:
//!
//! ```text
//! offset  size  field
//!      0     8  id (this node's own block id)
//!      8     8  parent_id (0 for the root)
//!     16     8  key_count
//!     24   152  keys[19]      (i64, big-endian)
//!    176   152  values[19]    (i64, big-endian)
//!    328   160  children[20]  (u64, big-endian, all zero in a leaf)
//!    488    24  zero padding
//! ```
//!
//! Slots beyond `key_count` (and beyond `key_count + 1` for children) are
//! zero-filled on encode and ignored on decode.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{Block, BlockId, NO_BLOCK};
use crate::storage::btree::{MAX_CHILDREN, MAX_KEYS, T};

/// Node field offsets.
mod offsets {
    use super::MAX_KEYS;

    pub const ID: usize = 0;
    pub const PARENT: usize = 8;
    pub const KEY_COUNT: usize = 16;
    pub const KEYS: usize = 24;
    pub const VALUES: usize = KEYS + MAX_KEYS * 8;
    pub const CHILDREN: usize = VALUES + MAX_KEYS * 8;
    #[cfg(test)]
    pub const PADDING: usize = CHILDREN + super::MAX_CHILDREN * 8;
}

/// A decoded B-tree node.
///
/// `children` is empty for a leaf and holds exactly `keys.len() + 1` ids for an
/// internal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: BlockId,
    /// Non-owning back-reference to the parent, `NO_BLOCK` for the root.
    pub parent_id: BlockId,
    pub keys: Vec<i64>,
    pub values: Vec<i64>,
    pub children: Vec<BlockId>,
}

impl Node {
    /// Create an empty leaf.
    #[must_use]
    pub fn leaf(id: BlockId, parent_id: BlockId) -> Self {
        Self {
            id,
            parent_id,
            keys: Vec::with_capacity(MAX_KEYS),
            values: Vec::with_capacity(MAX_KEYS),
            children: Vec::new(),
        }
    }

    /// Create an internal node with a single child and no keys yet.
    ///
    /// Only valid as the transient state of a freshly allocated root right
    /// before its first split promotes a key into it.
    #[must_use]
    pub fn above(id: BlockId, child: BlockId) -> Self {
        let mut children = Vec::with_capacity(MAX_CHILDREN);
        children.push(child);
        Self {
            id,
            parent_id: NO_BLOCK,
            keys: Vec::with_capacity(MAX_KEYS),
            values: Vec::with_capacity(MAX_KEYS),
            children,
        }
    }

    /// Number of populated key/value slots.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if the node holds `2t - 1` keys and must be split before a key
    /// can be added below or into it.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }

    /// Binary search for `key`.
    ///
    /// `Ok(i)` if `keys[i] == key`, otherwise `Err(i)` where `i` is both the
    /// sorted insertion position and the index of the child to descend into.
    pub fn find(&self, key: i64) -> Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    /// Insert an entry at `pos`, shifting later entries right.
    pub fn insert_entry(&mut self, pos: usize, key: i64, value: i64) {
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
    }

    /// Split a full node around its median (index `t - 1`).
    ///
    /// Returns the median entry and the two halves, which take the given block
    /// ids and keep this node's `parent_id` until the caller repoints them.
    /// Each half receives `t - 1` entries; an internal node's `2t` children
    /// are divided `t` and `t`.
    #[must_use]
    pub fn split(mut self, left_id: BlockId, right_id: BlockId) -> (i64, i64, Self, Self) {
        let median = T - 1;

        let right_keys = self.keys.split_off(median + 1);
        let right_values = self.values.split_off(median + 1);
        let right_children = if self.children.is_empty() {
            Vec::new()
        } else {
            self.children.split_off(median + 1)
        };

        let median_key = self.keys.pop().unwrap_or_default();
        let median_value = self.values.pop().unwrap_or_default();

        let left = Self {
            id: left_id,
            parent_id: self.parent_id,
            keys: self.keys,
            values: self.values,
            children: self.children,
        };
        let right = Self {
            id: right_id,
            parent_id: self.parent_id,
            keys: right_keys,
            values: right_values,
            children: right_children,
        };

        (median_key, median_value, left, right)
    }

    /// Encode the node into a block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut block = Block::new();
        block.write_u64(offsets::ID, self.id);
        block.write_u64(offsets::PARENT, self.parent_id);
        block.write_u64(offsets::KEY_COUNT, self.keys.len() as u64);

        for (i, key) in self.keys.iter().enumerate() {
            block.write_i64(offsets::KEYS + i * 8, *key);
        }
        for (i, value) in self.values.iter().enumerate() {
            block.write_i64(offsets::VALUES + i * 8, *value);
        }
        for (i, child) in self.children.iter().enumerate() {
            block.write_u64(offsets::CHILDREN + i * 8, *child);
        }

        block
    }

    /// Decode a node from a block, validating its shape.
    pub fn from_block(block: &Block) -> Result<Self, NodeError> {
        let raw_count = block.read_u64(offsets::KEY_COUNT);
        if raw_count > MAX_KEYS as u64 {
            return Err(NodeError::KeyCountOutOfRange(raw_count));
        }
        let key_count = raw_count as usize;

        let keys: Vec<i64> = (0..key_count)
            .map(|i| block.read_i64(offsets::KEYS + i * 8))
            .collect();
        if let Some(index) = keys.windows(2).position(|pair| pair[0] >= pair[1]) {
            return Err(NodeError::UnsortedKeys { index: index + 1 });
        }

        let values = (0..key_count)
            .map(|i| block.read_i64(offsets::VALUES + i * 8))
            .collect();

        let children: Vec<BlockId> = (0..=key_count)
            .map(|i| block.read_u64(offsets::CHILDREN + i * 8))
            .collect();
        let present = children.iter().filter(|&&c| c != NO_BLOCK).count();
        let children = if present == 0 {
            Vec::new()
        } else if present == children.len() {
            children
        } else {
            return Err(NodeError::MixedChildren { present, key_count });
        };

        Ok(Self {
            id: block.read_u64(offsets::ID),
            parent_id: block.read_u64(offsets::PARENT),
            keys,
            values,
            children,
        })
    }
}

/// Errors that can occur when decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Stored key count exceeds `MAX_KEYS`.
    KeyCountOutOfRange(u64),
    /// `keys[index]` is not greater than `keys[index - 1]`.
    UnsortedKeys { index: usize },
    /// Some but not all of the `key_count + 1` child slots are set.
    MixedChildren { present: usize, key_count: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyCountOutOfRange(count) => {
                write!(f, "key count {count} exceeds maximum of {MAX_KEYS}")
            }
            Self::UnsortedKeys { index } => write!(f, "keys not strictly increasing at {index}"),
            Self::MixedChildren { present, key_count } => write!(
                f,
                "{present} of {} child slots set for {key_count} keys",
                key_count + 1
            ),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::BLOCK_SIZE;

    fn full_leaf(id: BlockId) -> Node {
        let mut node = Node::leaf(id, 3);
        for k in 0..MAX_KEYS as i64 {
            node.insert_entry(node.key_count(), k * 2, k * 20);
        }
        node
    }

    #[test]
    fn test_layout_fills_block() {
        assert_eq!(offsets::VALUES, 176);
        assert_eq!(offsets::CHILDREN, 328);
        assert_eq!(offsets::PADDING, 488);
        assert!(offsets::PADDING <= BLOCK_SIZE);
    }

    #[test]
    fn test_leaf_roundtrip() {
        let mut node = Node::leaf(7, 2);
        node.insert_entry(0, 10, 100);
        node.insert_entry(0, -5, -50);

        let decoded = Node::from_block(&node.to_block()).expect("decode");
        assert_eq!(decoded, node);
        assert!(decoded.is_leaf());
    }

    #[test]
    fn test_full_internal_roundtrip() {
        let mut node = full_leaf(4);
        node.children = (100..100 + MAX_CHILDREN as u64).collect();

        let block = node.to_block();
        assert_eq!(block.read_u64(offsets::CHILDREN + (MAX_CHILDREN - 1) * 8), 119);
        assert!(block.is_zeroed(offsets::PADDING, BLOCK_SIZE - offsets::PADDING));

        let decoded = Node::from_block(&block).expect("decode");
        assert_eq!(decoded, node);
        assert!(decoded.is_full());
    }

    #[test]
    fn test_empty_root_roundtrip() {
        let node = Node::leaf(1, NO_BLOCK);
        let decoded = Node::from_block(&node.to_block()).expect("decode");
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_encode_layout() {
        let mut node = Node::leaf(9, 1);
        node.insert_entry(0, -1, 42);
        let block = node.to_block();

        assert_eq!(block.read_u64(0), 9);
        assert_eq!(block.read_u64(8), 1);
        assert_eq!(block.read_u64(16), 1);
        assert_eq!(block.read_bytes(24, 8), &[0xFF; 8]);
        assert_eq!(block.read_i64(176), 42);
        assert!(block.is_zeroed(32, 176 - 32));
        assert!(block.is_zeroed(184, BLOCK_SIZE - 184));
    }

    #[test]
    fn test_decode_ignores_unused_slots() {
        let mut node = Node::leaf(2, 0);
        node.insert_entry(0, 5, 50);
        let mut block = node.to_block();
        block.write_i64(offsets::KEYS + 8, 999);
        block.write_i64(offsets::VALUES + 8, 999);
        block.write_u64(offsets::CHILDREN + 2 * 8, 999);

        assert_eq!(Node::from_block(&block).expect("decode"), node);
    }

    #[test]
    fn test_decode_rejects_bad_key_count() {
        let mut block = Node::leaf(2, 0).to_block();
        block.write_u64(offsets::KEY_COUNT, 20);
        assert_eq!(
            Node::from_block(&block),
            Err(NodeError::KeyCountOutOfRange(20))
        );
    }

    #[test]
    fn test_decode_rejects_unsorted_keys() {
        let mut node = Node::leaf(2, 0);
        node.keys = vec![1, 3, 3];
        node.values = vec![0, 0, 0];
        assert_eq!(
            Node::from_block(&node.to_block()),
            Err(NodeError::UnsortedKeys { index: 2 })
        );
    }

    #[test]
    fn test_decode_rejects_mixed_children() {
        let mut node = Node::leaf(2, 0);
        node.insert_entry(0, 1, 1);
        node.children = vec![5, NO_BLOCK];
        assert!(matches!(
            Node::from_block(&node.to_block()),
            Err(NodeError::MixedChildren { present: 1, .. })
        ));
    }

    #[test]
    fn test_find() {
        let node = full_leaf(1);
        assert_eq!(node.find(4), Ok(2));
        assert_eq!(node.find(5), Err(3));
        assert_eq!(node.find(-1), Err(0));
        assert_eq!(node.find(1000), Err(MAX_KEYS));
    }

    #[test]
    fn test_split_leaf() {
        let (key, value, left, right) = full_leaf(1).split(10, 11);

        assert_eq!((key, value), (18, 180));
        assert_eq!(left.key_count(), T - 1);
        assert_eq!(right.key_count(), T - 1);
        assert_eq!(left.keys.last(), Some(&16));
        assert_eq!(right.keys.first(), Some(&20));
        assert_eq!((left.id, right.id), (10, 11));
        assert_eq!((left.parent_id, right.parent_id), (3, 3));
        assert!(left.is_leaf() && right.is_leaf());
    }

    #[test]
    fn test_split_internal() {
        let mut node = full_leaf(1);
        node.children = (100..100 + MAX_CHILDREN as u64).collect();

        let (_, _, left, right) = node.split(10, 11);
        assert_eq!(left.children, (100..110).collect::<Vec<_>>());
        assert_eq!(right.children, (110..120).collect::<Vec<_>>());
    }
}
