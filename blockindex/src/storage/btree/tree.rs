//! B-tree engine: search, insert with top-down splitting, and verification.
//!
//! The engine owns no state of its own beyond a borrow of the block store.
//! The root id and the allocator counter live in the store's header, which is
//! persisted whenever either changes.

use std::collections::HashSet;

use crate::storage::block::{BlockId, NO_BLOCK};
use crate::storage::btree::cursor::Cursor;
use crate::storage::btree::node::Node;
use crate::storage::btree::{MAX_DEPTH, MIN_KEYS};
use crate::storage::io::{BlockStore, StoreError};

/// A B-tree backed by a block store.
pub struct BTree<'a, S: BlockStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: BlockStore + ?Sized> BTree<'a, S> {
    /// Wrap a block store. The tree's root is whatever the header names.
    pub const fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Get the root block id, `NO_BLOCK` for an empty tree.
    #[must_use]
    pub fn root(&self) -> BlockId {
        self.store.header().root
    }

    /// Look up the value stored under `key`.
    pub fn search(&mut self, key: i64) -> Result<Option<i64>, BTreeError> {
        let mut block_id = self.root();
        if block_id == NO_BLOCK {
            return Ok(None);
        }

        for _ in 0..MAX_DEPTH {
            let node = read_node(&mut *self.store, block_id)?;
            match node.find(key) {
                Ok(i) => return Ok(Some(node.values[i])),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(i) => block_id = node.children[i],
            }
        }

        Err(BTreeError::depth_exceeded(block_id))
    }

    /// Insert a new key.
    ///
    /// Fails with `DuplicateKey` before writing anything if the key is already
    /// present. Otherwise every node touched is written before returning.
    pub fn insert(&mut self, key: i64, value: i64) -> Result<(), BTreeError> {
        if self.search(key)?.is_some() {
            return Err(BTreeError::DuplicateKey(key));
        }

        let root_id = self.root();
        if root_id == NO_BLOCK {
            let block_id = self.store.allocate()?;
            let mut leaf = Node::leaf(block_id, NO_BLOCK);
            leaf.insert_entry(0, key, value);
            self.write_node(&leaf)?;
            self.store.set_root(block_id)?;
            tracing::debug!(root = block_id, "created root leaf");
            return Ok(());
        }

        let mut node = read_node(&mut *self.store, root_id)?;
        if node.is_full() {
            node = self.split_root(node, key)?;
        }

        for _ in 0..MAX_DEPTH {
            let pos = match node.find(key) {
                Ok(_) => return Err(BTreeError::DuplicateKey(key)),
                Err(pos) => pos,
            };

            if node.is_leaf() {
                node.insert_entry(pos, key, value);
                return self.write_node(&node);
            }

            let child = read_node(&mut *self.store, node.children[pos])?;
            node = if child.is_full() {
                let (left, right) = self.split_child(&mut node, pos, child)?;
                if key > node.keys[pos] { right } else { left }
            } else {
                child
            };
        }

        Err(BTreeError::depth_exceeded(node.id))
    }

    /// Lazily iterate over all entries in ascending key order.
    ///
    /// Each call starts a fresh walk from the current root.
    pub fn iter(&mut self) -> Cursor<'_, S> {
        Cursor::new(&mut *self.store)
    }

    /// Walk the whole tree and check every structural invariant.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let root_id = self.root();
        let mut stats = TreeStats::default();
        if root_id == NO_BLOCK {
            return Ok(stats);
        }

        let mut visited = HashSet::new();
        let mut leaf_depth: Option<usize> = None;
        let mut stack = vec![Frame {
            block_id: root_id,
            parent_id: NO_BLOCK,
            depth: 1,
            lower: None,
            upper: None,
        }];

        while let Some(frame) = stack.pop() {
            let block_id = frame.block_id;
            let corrupt = |reason: String| BTreeError::Corrupt { block_id, reason };

            if frame.depth > MAX_DEPTH {
                return Err(BTreeError::depth_exceeded(block_id));
            }
            if !visited.insert(block_id) {
                return Err(corrupt("block reached twice".to_string()));
            }

            let node = read_node(&mut *self.store, block_id)?;

            if node.parent_id != frame.parent_id {
                return Err(corrupt(format!(
                    "parent id {} does not match owner {}",
                    node.parent_id, frame.parent_id
                )));
            }

            let is_root = frame.parent_id == NO_BLOCK;
            if node.key_count() == 0 || (!is_root && node.key_count() < MIN_KEYS) {
                return Err(corrupt(format!("underfull node with {} keys", node.key_count())));
            }

            let (Some(&first), Some(&last)) = (node.keys.first(), node.keys.last()) else {
                return Err(corrupt("node has no keys".to_string()));
            };
            if frame.lower.is_some_and(|lower| first <= lower)
                || frame.upper.is_some_and(|upper| last >= upper)
            {
                return Err(corrupt("keys outside parent separator range".to_string()));
            }

            stats.nodes += 1;
            stats.entries += node.key_count();

            if node.is_leaf() {
                match leaf_depth {
                    None => leaf_depth = Some(frame.depth),
                    Some(depth) if depth != frame.depth => {
                        return Err(corrupt(format!(
                            "leaf at depth {} but other leaves at depth {depth}",
                            frame.depth
                        )));
                    }
                    Some(_) => {}
                }
                continue;
            }

            for (i, &child) in node.children.iter().enumerate() {
                stack.push(Frame {
                    block_id: child,
                    parent_id: block_id,
                    depth: frame.depth + 1,
                    lower: if i == 0 { frame.lower } else { Some(node.keys[i - 1]) },
                    upper: node.keys.get(i).copied().or(frame.upper),
                });
            }
        }

        stats.depth = leaf_depth.unwrap_or_default();
        Ok(stats)
    }

    /// Replace a full root with a fresh one holding only its median.
    ///
    /// The new root's block is allocated before the halves so the root id is
    /// known when the halves are written. Returns the new root.
    fn split_root(&mut self, root: Node, key: i64) -> Result<Node, BTreeError> {
        let new_root_id = self.store.allocate()?;
        let mut new_root = Node::above(new_root_id, root.id);
        self.split_child(&mut new_root, 0, root)?;
        self.store.set_root(new_root_id)?;
        tracing::debug!(root = new_root_id, key, "replaced root");
        Ok(new_root)
    }

    /// Split the full `child` sitting at `parent.children[pos]`.
    ///
    /// Both halves are written to freshly allocated blocks, then the parent
    /// gains the median and is written, then grandchildren are repointed at
    /// their new owner. Returns the two halves.
    fn split_child(
        &mut self,
        parent: &mut Node,
        pos: usize,
        child: Node,
    ) -> Result<(Node, Node), BTreeError> {
        let old_id = child.id;
        let left_id = self.store.allocate()?;
        let right_id = self.store.allocate()?;

        let (median_key, median_value, mut left, mut right) = child.split(left_id, right_id);
        left.parent_id = parent.id;
        right.parent_id = parent.id;

        self.write_node(&left)?;
        self.write_node(&right)?;

        parent.insert_entry(pos, median_key, median_value);
        parent.children[pos] = left_id;
        parent.children.insert(pos + 1, right_id);
        self.write_node(parent)?;

        // Grandchildren are repointed only after the parent is written.
        self.reparent_children(&left)?;
        self.reparent_children(&right)?;

        tracing::debug!(
            old = old_id,
            left = left_id,
            right = right_id,
            parent = parent.id,
            median = median_key,
            "split node"
        );
        Ok((left, right))
    }

    /// Point every child of `node` back at `node`.
    fn reparent_children(&mut self, node: &Node) -> Result<(), BTreeError> {
        for &child_id in &node.children {
            let mut child = read_node(&mut *self.store, child_id)?;
            child.parent_id = node.id;
            self.write_node(&child)?;
        }
        Ok(())
    }

    fn write_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        self.store.write_block(node.id, &node.to_block())?;
        Ok(())
    }
}

impl<'a, S: BlockStore + ?Sized> IntoIterator for BTree<'a, S> {
    type Item = Result<(i64, i64), BTreeError>;
    type IntoIter = Cursor<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        Cursor::new(self.store)
    }
}

/// Read and decode a node, treating anything malformed as corruption.
pub(super) fn read_node<S: BlockStore + ?Sized>(
    store: &mut S,
    block_id: BlockId,
) -> Result<Node, BTreeError> {
    let block = store.read_block(block_id).map_err(|e| match e {
        StoreError::BlockOutOfBounds { .. } => BTreeError::Corrupt {
            block_id,
            reason: e.to_string(),
        },
        other => BTreeError::Store(other),
    })?;

    let node = Node::from_block(&block).map_err(|e| BTreeError::Corrupt {
        block_id,
        reason: e.to_string(),
    })?;

    if node.id != block_id {
        return Err(BTreeError::Corrupt {
            block_id,
            reason: format!("block claims id {}", node.id),
        });
    }

    Ok(node)
}

/// Pending node in a verification walk.
struct Frame {
    block_id: BlockId,
    parent_id: BlockId,
    depth: usize,
    /// Exclusive bounds on the node's keys from its ancestors' separators.
    lower: Option<i64>,
    upper: Option<i64>,
}

/// Shape of a verified tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, 0 for an empty tree.
    pub depth: usize,
    /// Number of reachable nodes.
    pub nodes: usize,
    /// Number of stored entries.
    pub entries: usize,
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Block store error.
    Store(StoreError),
    /// The key is already present.
    DuplicateKey(i64),
    /// A block's contents contradict the tree structure.
    Corrupt { block_id: BlockId, reason: String },
}

impl BTreeError {
    fn depth_exceeded(block_id: BlockId) -> Self {
        Self::Corrupt {
            block_id,
            reason: format!("tree deeper than {MAX_DEPTH} levels"),
        }
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::DuplicateKey(key) => write!(f, "key {key} already exists"),
            Self::Corrupt { block_id, reason } => {
                write!(f, "corrupt block {block_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::DuplicateKey(_) | Self::Corrupt { .. } => None,
        }
    }
}

impl From<StoreError> for BTreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
