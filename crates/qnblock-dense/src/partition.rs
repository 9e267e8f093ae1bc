//! Partition of one array leg into consecutive blocks.

use std::ops::Range;

/// Partition of a leg into blocks.
///
/// A leg of dimension 10 split into sectors of sizes `[3, 4, 3]` has
/// offsets `[0, 3, 7, 10]`. A partition with no blocks describes a
/// zero-dimensional leg.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegPartition {
    block_sizes: Vec<usize>,
    /// Cumulative offsets: `[0, s0, s0+s1, ..., total_dim]`.
    offsets: Vec<usize>,
}

impl LegPartition {
    /// Create a new partition from block sizes.
    pub fn new(block_sizes: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(block_sizes.len() + 1);
        offsets.push(0);
        let mut cumsum = 0;
        for &size in &block_sizes {
            cumsum += size;
            offsets.push(cumsum);
        }
        Self {
            block_sizes,
            offsets,
        }
    }

    /// Single block containing the entire leg.
    pub fn trivial(total_dim: usize) -> Self {
        Self::new(vec![total_dim])
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.block_sizes.len()
    }

    /// Sum of all block sizes.
    #[inline]
    pub fn total_dim(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    #[inline]
    pub fn block_size(&self, block_idx: usize) -> usize {
        self.block_sizes[block_idx]
    }

    /// Element range covered by a block.
    #[inline]
    pub fn block_range(&self, block_idx: usize) -> Range<usize> {
        self.offsets[block_idx]..self.offsets[block_idx + 1]
    }

    #[inline]
    pub fn block_offset(&self, block_idx: usize) -> usize {
        self.offsets[block_idx]
    }

    #[inline]
    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    /// Block containing element `pos`, with the position local to that block.
    pub fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        if pos >= self.total_dim() {
            return None;
        }
        let block = self.offsets.partition_point(|&o| o <= pos) - 1;
        Some((block, pos - self.offsets[block]))
    }
}
