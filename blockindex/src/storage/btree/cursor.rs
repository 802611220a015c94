//! Lazy in-order traversal.
//!
//! The cursor keeps an explicit stack of `(node, next key index)` frames from
//! the root down to the node it is currently reading, so it never recurses and
//! holds at most one node per level in memory.

use crate::storage::block::{BlockId, NO_BLOCK};
use crate::storage::btree::node::Node;
use crate::storage::btree::tree::{BTreeError, read_node};
use crate::storage::btree::MAX_DEPTH;
use crate::storage::io::BlockStore;

/// Iterator over `(key, value)` pairs in ascending key order.
///
/// Nothing is read until the first call to `next`. After an error the cursor
/// is exhausted.
pub struct Cursor<'a, S: BlockStore + ?Sized> {
    store: &'a mut S,
    stack: Vec<(Node, usize)>,
    started: bool,
    done: bool,
}

impl<'a, S: BlockStore + ?Sized> Cursor<'a, S> {
    pub(super) const fn new(store: &'a mut S) -> Self {
        Self {
            store,
            stack: Vec::new(),
            started: false,
            done: false,
        }
    }

    /// Push `block_id` and its leftmost descendants down to a leaf.
    fn descend_leftmost(&mut self, mut block_id: BlockId) -> Result<(), BTreeError> {
        loop {
            if self.stack.len() >= MAX_DEPTH {
                return Err(BTreeError::Corrupt {
                    block_id,
                    reason: format!("tree deeper than {MAX_DEPTH} levels"),
                });
            }

            let node = read_node(&mut *self.store, block_id)?;
            let next = node.children.first().copied();
            self.stack.push((node, 0));

            match next {
                Some(child) => block_id = child,
                None => return Ok(()),
            }
        }
    }

    fn advance(&mut self) -> Result<Option<(i64, i64)>, BTreeError> {
        if !self.started {
            self.started = true;
            let root = self.store.header().root;
            if root != NO_BLOCK {
                self.descend_leftmost(root)?;
            }
        }

        loop {
            let Some((node, pos)) = self.stack.last_mut() else {
                return Ok(None);
            };

            if *pos >= node.key_count() {
                self.stack.pop();
                continue;
            }

            let entry = (node.keys[*pos], node.values[*pos]);
            *pos += 1;
            let right = node.children.get(*pos).copied();

            if let Some(child) = right {
                self.descend_leftmost(child)?;
            }
            return Ok(Some(entry));
        }
    }
}

impl<S: BlockStore + ?Sized> Iterator for Cursor<'_, S> {
    type Item = Result<(i64, i64), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: BlockStore + ?Sized> std::iter::FusedIterator for Cursor<'_, S> {}

#[cfg(test)]
mod tests {
    use crate::storage::btree::{BTree, BTreeError};
    use crate::storage::io::BlockStore;
    use crate::storage::memory::MemoryStore;

    fn filled(count: i64) -> MemoryStore {
        let mut store = MemoryStore::new(3);
        let mut tree = BTree::new(&mut store);
        for key in 0..count {
            tree.insert(key * 7 % count, key).expect("insert");
        }
        store
    }

    #[test]
    fn test_cursor_is_lazy() {
        let mut store = filled(500);
        store.reset_stats();

        let mut tree = BTree::new(&mut store);
        let first_two: Vec<_> = tree.iter().take(2).collect::<Result<_, _>>().expect("iterate");
        assert_eq!(first_two.iter().map(|e| e.0).collect::<Vec<_>>(), vec![0, 1]);

        // Only the leftmost path was read.
        assert!(store.stats().reads <= 3);
    }

    #[test]
    fn test_cursor_ascending_and_complete() {
        let mut store = filled(500);
        let mut tree = BTree::new(&mut store);

        let keys: Vec<i64> = tree
            .iter()
            .map(|entry| entry.expect("entry").0)
            .collect();
        assert_eq!(keys, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_cursor_restarts_from_root() {
        let mut store = filled(50);
        let mut tree = BTree::new(&mut store);

        assert_eq!(tree.iter().count(), 50);
        tree.insert(1000, 1).expect("insert");
        assert_eq!(tree.iter().count(), 51);
        assert_eq!(tree.iter().last().map(|e| e.expect("entry").0), Some(1000));
    }

    #[test]
    fn test_cursor_stops_after_error() {
        let mut store = filled(100);
        let root = store.header().root;
        store.header_mut().next_free = root;

        let mut cursor = BTree::new(&mut store).into_iter();
        assert!(matches!(
            cursor.next(),
            Some(Err(BTreeError::Corrupt { .. }))
        ));
        assert!(cursor.next().is_none());
    }
}
