//! In-memory block store for deterministic testing.
//!
//! This module provides an in-memory implementation of the `BlockStore` trait
//! with support for fault injection:
//! - Block-level read/write errors
//! - Byte-level corruption (bit flips) on read
//! - A hard write budget, after which every write fails (a simulated crash)

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::block::{BLOCK_SIZE, Block, BlockId};
use crate::storage::header::Header;
use crate::storage::io::{BlockStore, StoreError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of block corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
    /// Number of writes (blocks and header) allowed before every write fails.
    pub write_budget: Option<u64>,
}

impl FaultConfig {
    /// Create a fault config with no faults.
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Allow exactly `writes` successful writes, then fail.
    #[must_use]
    pub fn crash_after(writes: u64) -> Self {
        Self {
            write_budget: Some(writes),
            ..Self::default()
        }
    }
}

/// Statistics about in-memory store operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Number of block reads.
    pub reads: u64,
    /// Number of block writes (header writes excluded).
    pub writes: u64,
    /// Number of header writes.
    pub header_writes: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of corrupted blocks returned.
    pub corrupted_reads: u64,
}

/// In-memory block store.
///
/// Not thread-safe; tests drive it from a single thread.
pub struct MemoryStore {
    /// Written node blocks.
    blocks: HashMap<BlockId, Block>,
    /// The cached header.
    header: Header,
    /// The header as last persisted.
    persisted_header: Header,
    /// Fault injection configuration.
    fault_config: FaultConfig,
    /// Random number generator for fault injection.
    rng: StdRng,
    /// Statistics for tracking.
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create a fault-free store with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a store with custom fault configuration.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            header: Header::new(),
            persisted_header: Header::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats = MemoryStoreStats::default();
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// The header as it would be found on disk after a crash.
    #[must_use]
    pub const fn persisted_header(&self) -> &Header {
        &self.persisted_header
    }

    /// Overwrite a stored block directly, bypassing bounds checks and faults.
    pub fn poke_block(&mut self, block_id: BlockId, block: Block) {
        self.blocks.insert(block_id, block);
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Corrupt a block by flipping random bits.
    fn corrupt_block(&mut self, block: &mut Block) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..BLOCK_SIZE);
            let bit = self.rng.random_range(0..8u8);
            block.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }

    /// Consume one unit of write budget, or fail if a fault is due.
    fn admit_write(&mut self) -> Result<(), StoreError> {
        if let Some(budget) = self.fault_config.write_budget.as_mut() {
            if *budget == 0 {
                self.stats.injected_write_errors += 1;
                return Err(StoreError::InjectedFault(
                    "write budget exhausted".to_string(),
                ));
            }
            *budget -= 1;
        }

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        Ok(())
    }
}

impl BlockStore for MemoryStore {
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError> {
        self.stats.reads += 1;
        self.check_bounds(block_id)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let mut block = self.blocks.get(&block_id).cloned().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("block {block_id} was never written"),
            ))
        })?;

        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt_block(&mut block);
        }

        Ok(block)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError> {
        self.check_bounds(block_id)?;
        self.admit_write()?;
        self.stats.writes += 1;
        self.blocks.insert(block_id, block.clone());
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn write_header(&mut self) -> Result<(), StoreError> {
        self.admit_write()?;
        self.stats.header_writes += 1;
        self.persisted_header = self.header;
        Ok(())
    }
}
