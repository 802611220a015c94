//! Block store abstraction.
//!
//! The B-tree engine talks to storage only through the `BlockStore` trait, so
//! the same engine runs over a real file in production and over an in-memory
//! store with fault injection in tests.

use crate::storage::block::{Block, BlockId, MAX_NEXT_FREE, NO_BLOCK};
use crate::storage::header::{Header, HeaderError};

/// Errors that can occur during block store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// Block id is the header block or not yet allocated.
    BlockOutOfBounds { block_id: BlockId, next_free: BlockId },
    /// Header error.
    Header(HeaderError),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfBounds {
                block_id,
                next_free,
            } => write!(
                f,
                "block {block_id} out of bounds (next free block: {next_free})"
            ),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::BlockOutOfBounds { .. } | Self::InjectedFault(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StoreError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

/// Fixed-size block storage with a cached header.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_block` returns the last written content for a block
/// - `write_block` and `write_header` reach the backing store before returning
///   (no buffering across engine operations)
/// - node blocks are addressed `1..next_free`; block 0 is only reachable
///   through the header methods
pub trait BlockStore {
    // ========== Block Operations ==========

    /// Read a node block.
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError>;

    /// Write a node block.
    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError>;

    /// Flush everything written so far to durable storage.
    fn sync(&mut self) -> Result<(), StoreError>;

    // ========== Header Operations ==========

    /// Get the cached header.
    fn header(&self) -> &Header;

    /// Get mutable access to the cached header.
    ///
    /// Changes are not persisted until `write_header` is called.
    fn header_mut(&mut self) -> &mut Header;

    /// Write the cached header to block 0.
    fn write_header(&mut self) -> Result<(), StoreError>;

    // ========== Provided ==========

    /// Hand out a fresh block id.
    ///
    /// The counter is persisted before the id is returned, so an id is never
    /// handed out twice even across a crash. Fails with `BlockOutOfBounds`
    /// once the counter would pass `MAX_NEXT_FREE`.
    fn allocate(&mut self) -> Result<BlockId, StoreError> {
        let block_id = self.header().next_free;
        let next_free = block_id
            .checked_add(1)
            .filter(|&next| next <= MAX_NEXT_FREE)
            .ok_or(StoreError::BlockOutOfBounds {
                block_id,
                next_free: block_id,
            })?;
        self.header_mut().next_free = next_free;
        self.write_header()?;
        tracing::trace!(block_id, "allocated block");
        Ok(block_id)
    }

    /// Point the header at a new root and persist it.
    fn set_root(&mut self, root: BlockId) -> Result<(), StoreError> {
        self.header_mut().root = root;
        self.write_header()
    }

    /// Fail unless `block_id` names an allocated node block.
    fn check_bounds(&self, block_id: BlockId) -> Result<(), StoreError> {
        let next_free = self.header().next_free;
        if block_id == NO_BLOCK || block_id >= next_free {
            return Err(StoreError::BlockOutOfBounds {
                block_id,
                next_free,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let e = StoreError::BlockOutOfBounds {
            block_id: 10,
            next_free: 5,
        };
        assert!(e.to_string().contains("block 10"));
        assert!(e.to_string().contains("next free block: 5"));

        let e = StoreError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }

    #[test]
    fn test_store_error_source() {
        use std::error::Error;

        let e = StoreError::from(std::io::Error::other("disk full"));
        assert!(e.source().is_some());

        let e = StoreError::Header(HeaderError::Truncated(3));
        assert!(e.source().is_some());
    }
}
