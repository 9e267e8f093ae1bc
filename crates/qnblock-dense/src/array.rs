//! Sparse grid of dense blocks.

use std::collections::btree_map::{self, BTreeMap};

use crate::block::DenseBlock;
use crate::error::{DenseError, Result};
use crate::extents::{linear_index, multi_index, try_linear_index, Extents};
use crate::partition::LegPartition;
use crate::scalar::Scalar;

/// An N-dimensional grid of dense blocks.
///
/// Each leg is split by a [`LegPartition`]; the block at grid coordinate
/// `(b1, .., bN)` has extents `(size(b1), .., size(bN))`. Only stored blocks
/// occupy memory. Blocks are keyed by their row-major linear grid index, so
/// iteration is in ascending lexicographic coordinate order.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray<T: Scalar> {
    partitions: Vec<LegPartition>,
    grid: Extents,
    blocks: BTreeMap<usize, DenseBlock<T>>,
}

impl<T: Scalar> DenseArray<T> {
    /// Empty array (no stored blocks) over the given leg partitions.
    pub fn new(partitions: Vec<LegPartition>) -> Self {
        let grid = partitions.iter().map(LegPartition::num_blocks).collect();
        Self {
            partitions,
            grid,
            blocks: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn partitions(&self) -> &[LegPartition] {
        &self.partitions
    }

    /// Number of blocks along every leg.
    #[inline]
    pub fn grid(&self) -> &[usize] {
        &self.grid
    }

    /// Full element extents.
    pub fn shape(&self) -> Extents {
        self.partitions.iter().map(LegPartition::total_dim).collect()
    }

    /// Extents of the block at `coords`.
    pub fn block_extents(&self, coords: &[usize]) -> Extents {
        self.partitions
            .iter()
            .zip(coords)
            .map(|(p, &c)| p.block_size(c))
            .collect()
    }

    /// Number of stored blocks.
    #[inline]
    pub fn num_stored(&self) -> usize {
        self.blocks.len()
    }

    /// Check that `coords` addresses a block of the grid.
    pub fn check_coords(&self, coords: &[usize]) -> Result<usize> {
        try_linear_index(coords, &self.grid)
    }

    pub fn contains(&self, coords: &[usize]) -> bool {
        self.check_coords(coords)
            .map(|key| self.blocks.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn get(&self, coords: &[usize]) -> Option<&DenseBlock<T>> {
        let key = self.check_coords(coords).ok()?;
        self.blocks.get(&key)
    }

    pub fn get_mut(&mut self, coords: &[usize]) -> Option<&mut DenseBlock<T>> {
        let key = self.check_coords(coords).ok()?;
        self.blocks.get_mut(&key)
    }

    /// Store `block` at `coords`, returning the block it replaces.
    pub fn insert(&mut self, coords: &[usize], block: DenseBlock<T>) -> Result<Option<DenseBlock<T>>> {
        let key = self.check_coords(coords)?;
        let expected = self.block_extents(coords);
        if block.extents() != expected.as_slice() {
            return Err(DenseError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: block.extents().to_vec(),
            });
        }
        Ok(self.blocks.insert(key, block))
    }

    /// Block at `coords`, materialising a zero block if absent.
    ///
    /// On allocation failure the array is unchanged.
    pub fn get_or_try_insert_zeros(&mut self, coords: &[usize]) -> Result<&mut DenseBlock<T>> {
        let key = self.check_coords(coords)?;
        match self.blocks.entry(key) {
            btree_map::Entry::Occupied(e) => Ok(e.into_mut()),
            btree_map::Entry::Vacant(e) => {
                let extents: Extents = self
                    .partitions
                    .iter()
                    .zip(coords)
                    .map(|(p, &c)| p.block_size(c))
                    .collect();
                let block = DenseBlock::try_zeros(&extents)?;
                Ok(e.insert(block))
            }
        }
    }

    pub fn remove(&mut self, coords: &[usize]) -> Option<DenseBlock<T>> {
        let key = self.check_coords(coords).ok()?;
        self.blocks.remove(&key)
    }

    /// Stored blocks in ascending lexicographic coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (Extents, &DenseBlock<T>)> + '_ {
        self.blocks
            .iter()
            .map(move |(&key, block)| (multi_index(key, &self.grid), block))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Extents, &mut DenseBlock<T>)> + '_ {
        let grid = &self.grid;
        self.blocks
            .iter_mut()
            .map(move |(&key, block)| (multi_index(key, grid), block))
    }

    /// Keep only the blocks for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&[usize], &DenseBlock<T>) -> bool) {
        let grid = &self.grid;
        self.blocks
            .retain(|&key, block| keep(&multi_index(key, grid)[..], block));
    }

    /// Drop every stored block.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Assemble the full dense tensor (row-major), absent blocks read as zero.
    pub fn to_dense(&self) -> Result<DenseBlock<T>> {
        let shape = self.shape();
        let mut out = DenseBlock::try_zeros(&shape)?;
        for (coords, block) in self.iter() {
            let offsets: Extents = self
                .partitions
                .iter()
                .zip(coords.iter())
                .map(|(p, &c)| p.block_offset(c))
                .collect();
            out.insert_region(&offsets, block)?;
        }
        Ok(out)
    }

    /// Linear key of `coords`. Panics on invalid coordinates.
    pub fn key_of(&self, coords: &[usize]) -> usize {
        linear_index(coords, &self.grid)
    }
}
