//! File header structure and serialization.
//!
//! The header occupies block 0 and carries the root of the tree and the block
//! allocator counter.

use crate::storage::block::{BLOCK_SIZE, Block, BlockId, MAX_NEXT_FREE, NO_BLOCK};

/// Magic identifier at the start of every index file: "4337PRJ3"
pub const MAGIC: [u8; 8] = *b"4337PRJ3";

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const ROOT: usize = 8;
    pub const NEXT_FREE: usize = 16;
    // 24-511: zero
}

/// The header contains all metadata about the index file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    /// Block id of the root node, or `NO_BLOCK` for an empty tree.
    pub root: BlockId,
    /// Next block id the allocator will hand out. Never decreases.
    pub next_free: BlockId,
}

impl Header {
    /// Create a header for a fresh, empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: NO_BLOCK,
            next_free: 1,
        }
    }

    /// Serialize the header to a block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut block = Block::new();
        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u64(offsets::ROOT, self.root);
        block.write_u64(offsets::NEXT_FREE, self.next_free);
        block
    }

    /// Validate the magic identifier at the start of `bytes`.
    ///
    /// Accepts a prefix shorter than a block so a truncated file can still be
    /// rejected on its magic alone.
    pub fn check_magic(bytes: &[u8]) -> Result<(), HeaderError> {
        let mut magic = [0u8; 8];
        let len = bytes.len().min(MAGIC.len());
        magic[..len].copy_from_slice(&bytes[..len]);
        if len < MAGIC.len() || magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }
        Ok(())
    }

    /// Deserialize a header from a block.
    pub fn from_block(block: &Block) -> Result<Self, HeaderError> {
        Self::check_magic(block.read_bytes(offsets::MAGIC, MAGIC.len()))?;

        let header = Self {
            root: block.read_u64(offsets::ROOT),
            next_free: block.read_u64(offsets::NEXT_FREE),
        };

        if header.next_free == 0 || header.root >= header.next_free {
            return Err(HeaderError::Inconsistent {
                root: header.root,
                next_free: header.next_free,
            });
        }
        if header.next_free > MAX_NEXT_FREE {
            return Err(HeaderError::NextFreeOutOfRange(header.next_free));
        }

        Ok(header)
    }

    /// Deserialize a header from a possibly short read of block 0.
    pub fn from_prefix(bytes: &[u8]) -> Result<Self, HeaderError> {
        Self::check_magic(bytes)?;
        if bytes.len() < BLOCK_SIZE {
            return Err(HeaderError::Truncated(bytes.len()));
        }
        let mut buf = [0u8; BLOCK_SIZE];
        buf.copy_from_slice(&bytes[..BLOCK_SIZE]);
        Self::from_block(&Block::from_bytes(buf))
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Missing or wrong magic identifier.
    InvalidMagic([u8; 8]),
    /// The file ends before the header block does.
    Truncated(usize),
    /// Root and allocator counter contradict each other.
    Inconsistent { root: BlockId, next_free: BlockId },
    /// The allocator counter lies past the largest addressable block.
    NextFreeOutOfRange(BlockId),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic identifier: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::Truncated(len) => {
                write!(f, "header truncated: {len} of {BLOCK_SIZE} bytes")
            }
            Self::Inconsistent { root, next_free } => {
                write!(f, "root block {root} is not below next free block {next_free}")
            }
            Self::NextFreeOutOfRange(next_free) => {
                write!(f, "next free block {next_free} is past the end of any file")
            }
        }
    }
}

impl std::error::Error for HeaderError {}
