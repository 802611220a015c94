//! Index file I/O operations.
//!
//! This module handles reading and writing blocks to the index file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{BLOCK_SIZE, BLOCK_SIZE_U64, Block, BlockId, block_offset};
use crate::storage::header::{Header, HeaderError};
use crate::storage::io::{BlockStore, StoreError};

/// How hard a write pushes data toward the disk before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Hand the bytes to the OS (`write_all`) and return.
    Flush,
    /// Also wait for the data to reach the device (`sync_data`).
    #[default]
    Sync,
}

/// An index file handle with low-level block I/O operations.
///
/// Owns the file exclusively; dropping the handle closes the file.
pub struct IndexFile {
    file: File,
    path: PathBuf,
    header: Header,
    durability: Durability,
}

impl IndexFile {
    /// Create a new index file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, durability: Durability) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        Self::initialize(file, path, durability)
    }

    /// Create an index file, replacing whatever is at `path`.
    pub fn create_truncate(path: &Path, durability: Durability) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(FileError::Io)?;

        Self::initialize(file, path, durability)
    }

    fn initialize(file: File, path: &Path, durability: Durability) -> Result<Self, FileError> {
        let mut index_file = Self {
            file,
            path: path.to_path_buf(),
            header: Header::new(),
            durability,
        };
        index_file.write_header()?;
        index_file.sync()?;
        Ok(index_file)
    }

    /// Open an existing index file.
    ///
    /// Reads block 0 once and validates it; nothing else is read when the magic
    /// identifier is wrong.
    pub fn open(path: &Path, durability: Durability) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let header = Self::read_header(&mut file)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            durability,
        })
    }

    /// Read and validate block 0 from the start of `reader`.
    ///
    /// Consumes at most one block.
    fn read_header<R: Read>(reader: &mut R) -> Result<Header, FileError> {
        let mut prefix = Vec::with_capacity(BLOCK_SIZE);
        reader
            .take(BLOCK_SIZE_U64)
            .read_to_end(&mut prefix)
            .map_err(FileError::Io)?;

        Header::from_prefix(&prefix).map_err(FileError::Header)
    }

    /// Path this file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the header.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Get a mutable reference to the header.
    pub const fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Read a node block from the file.
    ///
    /// Returns an error if the block is not allocated.
    pub fn read_block(&mut self, block_id: BlockId) -> Result<Block, FileError> {
        let offset = self.locate(block_id)?;

        let mut block = Block::new();
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(block.as_bytes_mut())
            .map_err(FileError::Io)?;

        Ok(block)
    }

    /// Write a node block to the file.
    pub fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), FileError> {
        let offset = self.locate(block_id)?;
        self.write_at(offset, block)
    }

    /// Write the header to block 0.
    pub fn write_header(&mut self) -> Result<(), FileError> {
        let block = self.header.to_block();
        self.write_at(0, &block)
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    fn write_at(&mut self, offset: u64, block: &Block) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;
        self.file
            .write_all(block.as_bytes())
            .map_err(FileError::Io)?;

        if self.durability == Durability::Sync {
            self.file.sync_data().map_err(FileError::Io)?;
        }

        Ok(())
    }

    /// Byte offset of an allocated node block.
    const fn locate(&self, block_id: BlockId) -> Result<u64, FileError> {
        let next_free = self.header.next_free;
        match block_offset(block_id) {
            Some(offset) if block_id != 0 && block_id < next_free => Ok(offset),
            _ => Err(FileError::BlockOutOfBounds {
                block_id,
                next_free,
            }),
        }
    }
}

impl std::fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFile")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("durability", &self.durability)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Header error.
    Header(HeaderError),
    /// Block id out of bounds.
    BlockOutOfBounds { block_id: BlockId, next_free: BlockId },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::BlockOutOfBounds {
                block_id,
                next_free,
            } => {
                write!(
                    f,
                    "block {block_id} out of bounds (next free block: {next_free})"
                )
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::AlreadyExists(_) | Self::BlockOutOfBounds { .. } => None,
        }
    }
}

impl From<FileError> for StoreError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::BlockOutOfBounds {
                block_id,
                next_free,
            } => Self::BlockOutOfBounds {
                block_id,
                next_free,
            },
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Header(e) => Self::Header(e),
        }
    }
}

impl BlockStore for IndexFile {
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError> {
        Self::read_block(self, block_id).map_err(StoreError::from)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError> {
        Self::write_block(self, block_id, block).map_err(StoreError::from)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        Self::sync(self).map_err(StoreError::from)
    }

    fn header(&self) -> &Header {
        Self::header(self)
    }

    fn header_mut(&mut self) -> &mut Header {
        Self::header_mut(self)
    }

    fn write_header(&mut self) -> Result<(), StoreError> {
        Self::write_header(self).map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        {
            let file = IndexFile::create(&path, Durability::Flush).expect("create index");
            assert_eq!(*file.header(), Header::new());
        }

        assert_eq!(
            fs::metadata(&path).expect("metadata").len(),
            BLOCK_SIZE_U64
        );

        {
            let file = IndexFile::open(&path, Durability::Flush).expect("open index");
            assert_eq!(file.header().root, 0);
            assert_eq!(file.header().next_free, 1);
        }
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        fs::write(&path, b"existing").expect("write file");

        let result = IndexFile::create(&path, Durability::Flush);
        assert!(matches!(result, Err(FileError::AlreadyExists(_))));
        assert_eq!(fs::read(&path).expect("read"), b"existing");
    }

    #[test]
    fn test_create_truncate_replaces_contents() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        fs::write(&path, vec![0xAB; 4096]).expect("write file");

        let file = IndexFile::create_truncate(&path, Durability::Flush).expect("create");
        assert_eq!(*file.header(), Header::new());
        assert_eq!(
            fs::metadata(&path).expect("metadata").len(),
            BLOCK_SIZE_U64
        );
    }

    #[test]
    fn test_open_bad_magic() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        fs::write(&path, b"NOTANIDXFILE").expect("write file");

        let result = IndexFile::open(&path, Durability::Flush);
        assert!(matches!(
            result,
            Err(FileError::Header(HeaderError::InvalidMagic(_)))
        ));
    }

    #[test]
    fn test_open_empty_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        fs::write(&path, b"").expect("write file");

        let result = IndexFile::open(&path, Durability::Flush);
        assert!(matches!(
            result,
            Err(FileError::Header(HeaderError::InvalidMagic(_)))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("missing.idx");

        let result = IndexFile::open(&path, Durability::Flush);
        assert!(matches!(result, Err(FileError::Io(_))));
    }

    #[test]
    fn test_allocate_and_write_blocks() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let mut file = IndexFile::create(&path, Durability::Flush).expect("create index");

        let first = file.allocate().expect("allocate");
        let second = file.allocate().expect("allocate");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(file.header().next_free, 3);

        let mut block = Block::new();
        block.write_bytes(0, b"hello world");
        file.write_block(2, &block).expect("write block");

        let read = file.read_block(2).expect("read block");
        assert_eq!(read.read_bytes(0, 11), b"hello world");
        assert_eq!(
            fs::metadata(&path).expect("metadata").len(),
            3 * BLOCK_SIZE_U64
        );
    }

    #[test]
    fn test_block_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let mut file = IndexFile::create(&path, Durability::Flush).expect("create index");

        let result = file.read_block(100);
        assert!(matches!(result, Err(FileError::BlockOutOfBounds { .. })));

        let result = file.write_block(0, &Block::new());
        assert!(matches!(result, Err(FileError::BlockOutOfBounds { .. })));
    }

    #[test]
    fn test_header_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        {
            let mut file = IndexFile::create(&path, Durability::Sync).expect("create index");
            file.allocate().expect("allocate");
            file.allocate().expect("allocate");
            file.set_root(2).expect("set root");
        }

        {
            let file = IndexFile::open(&path, Durability::Sync).expect("open index");
            assert_eq!(file.header().root, 2);
            assert_eq!(file.header().next_free, 3);
        }
    }

    #[test]
    fn test_truncated_block_is_io_error() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        {
            let mut file = IndexFile::create(&path, Durability::Flush).expect("create index");
            // Allocated but never written: the file ends at block 0.
            file.allocate().expect("allocate");
        }

        let mut file = IndexFile::open(&path, Durability::Flush).expect("open index");
        let result = file.read_block(1);
        assert!(matches!(result, Err(FileError::Io(_))));
    }

    #[test]
    fn test_bad_magic_reads_only_first_block() {
        let mut bytes = vec![0u8; 4 * BLOCK_SIZE];
        bytes[..8].copy_from_slice(b"NOTMAGIC");
        let mut reader = std::io::Cursor::new(bytes);

        let result = IndexFile::read_header(&mut reader);
        assert!(matches!(
            result,
            Err(FileError::Header(HeaderError::InvalidMagic(_)))
        ));
        assert!(reader.position() <= BLOCK_SIZE_U64);
    }

    #[test]
    fn test_open_rejects_out_of_range_next_free() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        for (root, next_free) in [(1 << 60, 1 << 61), (0, u64::MAX)] {
            let header = Header { root, next_free }.to_block();
            fs::write(&path, header.as_bytes()).expect("write file");

            let result = IndexFile::open(&path, Durability::Flush);
            assert!(matches!(
                result,
                Err(FileError::Header(HeaderError::NextFreeOutOfRange(_)))
            ));
        }
    }

    #[test]
    fn test_huge_block_id_is_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let mut file = IndexFile::create(&path, Durability::Flush).expect("create index");
        file.header_mut().next_free = u64::MAX;

        let result = file.read_block(1 << 60);
        assert!(matches!(result, Err(FileError::BlockOutOfBounds { .. })));

        let result = file.write_block(u64::MAX - 1, &Block::new());
        assert!(matches!(result, Err(FileError::BlockOutOfBounds { .. })));
        assert_eq!(
            fs::metadata(&path).expect("metadata").len(),
            BLOCK_SIZE_U64
        );
    }
}
