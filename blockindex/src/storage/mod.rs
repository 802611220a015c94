//! Block-structured index storage.
//!
//! A single-file B-tree index mapping `i64` keys to `i64` values.
//!
//! # File Format
//!
//! The index is stored in a single file of 512-byte blocks. All integers are
//! big-endian.
//!
//! - Block 0: header (magic `"4337PRJ3"`, root block id, next free block id)
//! - Blocks 1-N: B-tree nodes, one per block, in allocation order
//!
//! Block ids are handed out by a monotonic counter in the header and never
//! reused.
//!
//! # Crash Behavior
//!
//! Each block write is atomic on its own, but there is no journal. A crash in
//! the middle of a split can leave freshly written halves that nothing points
//! to, or (if the parent was written but the header was not) a header still
//! naming the old root. The old root is never overwritten by a split, so the
//! file stays readable as of the previous insert in that case.
//!
//! A write that fails with an I/O error mid-split leaves the same state as a
//! crash at that point. The halves and their parent are written before any
//! grandchild is repointed, so lookups and iteration stay correct, but some
//! grandchildren may keep a parent id that `verify` reports as corrupt.
//!
//! # Usage
//!
//! ```no_run
//! use blockindex::storage::{Durability, Index};
//! use std::path::Path;
//!
//! let mut index = Index::create(Path::new("data.idx"), Durability::Sync)?;
//! index.insert(1, 10)?;
//! assert_eq!(index.search(1)?, Some(10));
//! for entry in index.iter() {
//!     let (key, value) = entry?;
//!     println!("{key} -> {value}");
//! }
//! index.close()?;
//! # Ok::<(), blockindex::storage::IndexError>(())
//! ```

mod block;
mod btree;
mod file;
mod header;
mod index;
mod io;
mod memory;

pub use block::{BLOCK_SIZE, Block, BlockId, NO_BLOCK};
pub use btree::{BTree, BTreeError, Cursor, MAX_KEYS, MIN_KEYS, Node, NodeError, T, TreeStats};
pub use file::{Durability, FileError, IndexFile};
pub use header::{Header, HeaderError, MAGIC};
pub use index::{Index, IndexError};
pub use io::{BlockStore, StoreError};
pub use memory::{FaultConfig, MemoryStore, MemoryStoreStats};
