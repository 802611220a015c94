//! The index: a B-tree over one block store, behind a small typed API.
//!
//! `Index` owns its store for the lifetime of one open session. Every mutation
//! is written through before the call returns, so dropping an `Index` at any
//! point between calls leaves a consistent file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{BlockId, NO_BLOCK};
use crate::storage::btree::{BTree, BTreeError, TreeStats};
use crate::storage::file::{Durability, FileError, IndexFile};
use crate::storage::header::HeaderError;
use crate::storage::io::{BlockStore, StoreError};

/// A key-value index backed by a block store.
pub struct Index<S: BlockStore = IndexFile> {
    store: S,
}

impl Index<IndexFile> {
    /// Create a new, empty index file.
    ///
    /// Fails with `AlreadyExists` if something is already at `path`.
    pub fn create(path: &Path, durability: Durability) -> Result<Self, IndexError> {
        let file = IndexFile::create(path, durability)?;
        tracing::info!(path = %path.display(), "created index");
        Ok(Self::with_store(file))
    }

    /// Create a new, empty index file, replacing whatever is at `path`.
    pub fn create_truncate(path: &Path, durability: Durability) -> Result<Self, IndexError> {
        let file = IndexFile::create_truncate(path, durability)?;
        tracing::info!(path = %path.display(), "created index, replacing existing file");
        Ok(Self::with_store(file))
    }

    /// Open an existing index file.
    ///
    /// Fails with `Format` if the file does not start with a valid header.
    pub fn open(path: &Path, durability: Durability) -> Result<Self, IndexError> {
        let file = IndexFile::open(path, durability)?;
        tracing::info!(
            path = %path.display(),
            root = file.header().root,
            next_free = file.header().next_free,
            "opened index"
        );
        Ok(Self::with_store(file))
    }

    /// Path of the open file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Flush and close the file.
    ///
    /// The file is closed even if the final flush fails.
    pub fn close(self) -> Result<(), IndexError> {
        let result = self.store.sync();
        tracing::info!(path = %self.path().display(), "closed index");
        result.map_err(IndexError::from)
    }
}

impl<S: BlockStore> Index<S> {
    /// Wrap an already initialized block store.
    pub const fn with_store(store: S) -> Self {
        Self { store }
    }

    /// Insert a new key. Existing keys are never updated.
    pub fn insert(&mut self, key: i64, value: i64) -> Result<(), IndexError> {
        self.tree().insert(key, value).map_err(report)
    }

    /// Look up a key, `None` if absent.
    pub fn search(&mut self, key: i64) -> Result<Option<i64>, IndexError> {
        self.tree().search(key).map_err(report)
    }

    /// Look up a key, failing with `KeyNotFound` if absent.
    pub fn lookup(&mut self, key: i64) -> Result<i64, IndexError> {
        self.search(key)?.ok_or(IndexError::KeyNotFound(key))
    }

    /// Lazily iterate over all entries in ascending key order.
    pub fn iter(&mut self) -> impl Iterator<Item = Result<(i64, i64), IndexError>> + '_ {
        BTree::new(&mut self.store).into_iter().map(|entry| entry.map_err(report))
    }

    /// Count entries by walking the tree.
    pub fn len(&mut self) -> Result<usize, IndexError> {
        self.iter().try_fold(0, |count, entry| entry.map(|_| count + 1))
    }

    /// True if nothing has ever been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.header().root == NO_BLOCK
    }

    /// Check every structural invariant of the tree.
    pub fn verify(&mut self) -> Result<TreeStats, IndexError> {
        self.tree().verify().map_err(report)
    }

    /// Write every entry as a `key,value` line in ascending key order.
    ///
    /// Returns the number of lines written.
    pub fn export_to<W: Write>(&mut self, out: &mut W) -> Result<usize, IndexError> {
        let mut count = 0;
        for entry in self.iter() {
            let (key, value) = entry?;
            writeln!(out, "{key},{value}")?;
            count += 1;
        }
        out.flush()?;
        Ok(count)
    }

    /// Export to a file, creating or truncating it.
    pub fn extract(&mut self, path: &Path) -> Result<usize, IndexError> {
        let mut out = BufWriter::new(File::create(path)?);
        let count = self.export_to(&mut out)?;
        tracing::info!(path = %path.display(), entries = count, "extracted index");
        Ok(count)
    }

    fn tree(&mut self) -> BTree<'_, S> {
        BTree::new(&mut self.store)
    }
}

/// Convert an engine error, logging corruption as it surfaces.
fn report(e: BTreeError) -> IndexError {
    if let BTreeError::Corrupt { block_id, reason } = &e {
        tracing::warn!(block_id, reason = %reason, "index corruption detected");
    }
    IndexError::from(e)
}

/// Errors that can occur during index operations.
#[derive(Debug)]
pub enum IndexError {
    /// The file is not an index file (bad magic or malformed header).
    Format(HeaderError),
    /// The key is already present.
    DuplicateKey(i64),
    /// The key is not present.
    KeyNotFound(i64),
    /// Underlying read, write or seek failure.
    Io(std::io::Error),
    /// Block contents contradict the tree structure.
    Corrupt { block_id: BlockId, reason: String },
    /// Refused to create over an existing file.
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(e) => write!(f, "not an index file: {e}"),
            Self::DuplicateKey(key) => write!(f, "key {key} already exists"),
            Self::KeyNotFound(key) => write!(f, "key {key} not found"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt { block_id, reason } => {
                write!(f, "index corrupt at block {block_id}: {reason}")
            }
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::DuplicateKey(_)
            | Self::KeyNotFound(_)
            | Self::Corrupt { .. }
            | Self::AlreadyExists(_) => None,
        }
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FileError> for IndexError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::AlreadyExists(path) => Self::AlreadyExists(path),
            FileError::Header(e) => Self::Format(e),
            FileError::BlockOutOfBounds { block_id, .. } => Self::Corrupt {
                block_id,
                reason: e.to_string(),
            },
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(io_err) => Self::Io(io_err),
            StoreError::Header(e) => Self::Format(e),
            StoreError::BlockOutOfBounds { block_id, .. } => Self::Corrupt {
                block_id,
                reason: e.to_string(),
            },
            StoreError::InjectedFault(msg) => Self::Io(std::io::Error::other(msg)),
        }
    }
}

impl From<BTreeError> for IndexError {
    fn from(e: BTreeError) -> Self {
        match e {
            BTreeError::Store(e) => Self::from(e),
            BTreeError::DuplicateKey(key) => Self::DuplicateKey(key),
            BTreeError::Corrupt { block_id, reason } => Self::Corrupt { block_id, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::BLOCK_SIZE;
    use crate::storage::header::Header;
    use crate::storage::memory::{FaultConfig, MemoryStore};
    use tempfile::tempdir;

    #[test]
    fn test_create_close_open_is_empty() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.idx");

        let index = Index::create(&path, Durability::Sync).expect("create");
        index.close().expect("close");

        let mut index = Index::open(&path, Durability::Sync).expect("open");
        assert!(index.is_empty());
        assert_eq!(index.iter().count(), 0);
        assert_eq!(index.len().expect("len"), 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("data.idx");

        let mut index = Index::create(&path, Durability::Flush).expect("create");
        for key in (0..300).rev() {
            index.insert(key, key * 10).expect("insert");
        }
        index.close().expect("close");

        let mut index = Index::open(&path, Durability::Flush).expect("open");
        assert_eq!(index.len().expect("len"), 300);
        assert_eq!(index.lookup(123).expect("lookup"), 1230);
        assert_eq!(index.verify().expect("verify").entries, 300);
    }

    #[test]
    fn test_open_bad_magic_is_format_error() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, [b'X'; BLOCK_SIZE]).expect("write");

        assert!(matches!(
            Index::open(&path, Durability::Sync),
            Err(IndexError::Format(HeaderError::InvalidMagic(_)))
        ));
    }

    #[test]
    fn test_open_missing_is_io_error() {
        let dir = tempdir().expect("create temp dir");
        let result = Index::open(&dir.path().join("nope.idx"), Durability::Sync);
        assert!(matches!(result, Err(IndexError::Io(_))));
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.idx");
        std::fs::write(&path, b"keep me").expect("write");

        assert!(matches!(
            Index::create(&path, Durability::Sync),
            Err(IndexError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read(&path).expect("read"), b"keep me");
    }

    #[test]
    fn test_create_truncate_replaces() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.idx");

        let mut index = Index::create(&path, Durability::Sync).expect("create");
        index.insert(1, 1).expect("insert");
        index.close().expect("close");

        let mut index = Index::create_truncate(&path, Durability::Sync).expect("truncate");
        assert!(index.is_empty());
        assert_eq!(index.search(1).expect("search"), None);
    }

    #[test]
    fn test_lookup_and_duplicates() {
        let mut index = Index::with_store(MemoryStore::new(1));
        index.insert(5, 50).expect("insert");

        assert_eq!(index.lookup(5).expect("lookup"), 50);
        assert!(matches!(index.lookup(6), Err(IndexError::KeyNotFound(6))));
        assert!(matches!(
            index.insert(5, 51),
            Err(IndexError::DuplicateKey(5))
        ));
        assert_eq!(index.lookup(5).expect("lookup"), 50);
    }

    #[test]
    fn test_export_format() {
        let mut index = Index::with_store(MemoryStore::new(1));
        for (key, value) in [(3, 30), (-1, 7), (2, -20)] {
            index.insert(key, value).expect("insert");
        }

        let mut out = Vec::new();
        let count = index.export_to(&mut out).expect("export");
        assert_eq!(count, 3);
        assert_eq!(String::from_utf8(out).expect("utf8"), "-1,7\n2,-20\n3,30\n");
    }

    #[test]
    fn test_extract_to_file() {
        let dir = tempdir().expect("create temp dir");
        let out = dir.path().join("out.csv");
        std::fs::write(&out, "stale contents that are longer\n").expect("write");

        let mut index = Index::with_store(MemoryStore::new(1));
        index.insert(1, 10).expect("insert");
        index.insert(2, 20).expect("insert");

        assert_eq!(index.extract(&out).expect("extract"), 2);
        assert_eq!(std::fs::read_to_string(&out).expect("read"), "1,10\n2,20\n");
    }

    #[test]
    fn test_injected_fault_is_io_error() {
        let mut index = Index::with_store(MemoryStore::with_config(
            1,
            FaultConfig::crash_after(0),
        ));
        assert!(matches!(index.insert(1, 1), Err(IndexError::Io(_))));
    }

    #[test]
    fn test_truncated_node_block_is_io_error() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.idx");

        let mut index = Index::create(&path, Durability::Sync).expect("create");
        index.insert(1, 1).expect("insert");
        index.close().expect("close");

        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open raw");
        file.set_len(BLOCK_SIZE as u64 + 100).expect("truncate");
        drop(file);

        let mut index = Index::open(&path, Durability::Sync).expect("open");
        assert!(matches!(index.search(1), Err(IndexError::Io(_))));
    }

    #[test]
    fn test_huge_next_free_fails_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.idx");

        for (root, next_free) in [(1 << 60, 1 << 61), (0, u64::MAX)] {
            let header = Header { root, next_free }.to_block();
            std::fs::write(&path, header.as_bytes()).expect("write");

            assert!(matches!(
                Index::open(&path, Durability::Sync),
                Err(IndexError::Format(HeaderError::NextFreeOutOfRange(_)))
            ));
        }
    }

    #[test]
    fn test_exhausted_allocator_is_corrupt() {
        let mut store = MemoryStore::new(1);
        store.header_mut().next_free = u64::MAX;
        let mut index = Index::with_store(store);

        assert!(matches!(
            index.insert(1, 1),
            Err(IndexError::Corrupt { .. })
        ));
        assert_eq!(index.search(1).expect("search"), None);
    }
}
