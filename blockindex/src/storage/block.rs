//! Block buffers and constants for the index file.
//!
//! The index file is a flat array of 512-byte blocks. Block `k` starts at byte
//! offset `k * BLOCK_SIZE`. All multi-byte integers are stored big-endian.

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Block size as u64 for offset calculations.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// A block identifier (0-indexed block number).
///
/// Block 0 always holds the file header, so 0 doubles as "no block" inside
/// node fields (empty root, absent parent, absent child).
pub type BlockId = u64;

/// The reserved "no block" id.
pub const NO_BLOCK: BlockId = 0;

/// A raw block buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Create a new zeroed block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    /// Create a block from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self {
            data: Box::new(bytes),
        }
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Get mutable access to the raw block data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u64 (big-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_be_bytes(buf)
    }

    /// Write a u64 (big-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }

    /// Read an i64 (big-endian, two's complement) at the given offset.
    #[must_use]
    pub fn read_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_be_bytes(buf)
    }

    /// Write an i64 (big-endian, two's complement) at the given offset.
    pub fn write_i64(&mut self, offset: usize, value: i64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }

    /// True if every byte in `offset..offset + len` is zero.
    #[must_use]
    pub fn is_zeroed(&self, offset: usize, len: usize) -> bool {
        self.data[offset..offset + len].iter().all(|&b| b == 0)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("first_24_bytes", &&self.data[..24])
            .finish_non_exhaustive()
    }
}

/// Largest allocator counter a header may carry. Every id below it has a byte
/// offset, and a block end, that fits in a `u64`.
pub const MAX_NEXT_FREE: BlockId = u64::MAX / BLOCK_SIZE_U64;

/// Byte offset of a block within the file, `None` if it does not fit in a `u64`.
#[must_use]
pub const fn block_offset(block_id: BlockId) -> Option<u64> {
    block_id.checked_mul(BLOCK_SIZE_U64)
}
