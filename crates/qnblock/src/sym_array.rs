//! Quantum-number symmetric block-sparse arrays.

use std::sync::Arc;

use log::debug;
use qnblock_dense::{DenseArray, DenseBlock, Extents, IndexedLoop, LegPartition, Scalar};
use rand::Rng;

use crate::error::{QnError, Result};
use crate::qshape::{composite, Leg, QuantumShape};
use crate::quantum::QuantumLabel;

/// A block-sparse array whose stored blocks obey a conservation rule.
///
/// A block at sector coordinate `(i1, .., iN)` may exist only when the
/// signed labels of its sectors compose to [`target`](Self::target). The
/// sparsity pattern is fully determined by the legs and the target; it is
/// never tracked separately.
///
/// Cloning is cheap: blocks share their buffers copy-on-write.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricArray<T: Scalar, Q: QuantumLabel> {
    legs: Vec<Leg<Q>>,
    target: Q,
    data: DenseArray<T>,
}

impl<T: Scalar, Q: QuantumLabel> SymmetricArray<T, Q> {
    /// Array with no stored blocks.
    pub fn new(legs: Vec<Leg<Q>>, target: Q) -> Self {
        let partitions = legs
            .iter()
            .map(|leg| leg.shape().partition().clone())
            .collect::<Vec<LegPartition>>();
        Self {
            legs,
            target,
            data: DenseArray::new(partitions),
        }
    }

    /// Array with every conserving block materialised as zeros.
    pub fn zeros(legs: Vec<Leg<Q>>, target: Q) -> Result<Self> {
        let mut array = Self::new(legs, target);
        for coords in array.conserving_coords() {
            array.allocate(&coords)?;
        }
        Ok(array)
    }

    /// Array with every conserving block filled with standard-normal samples.
    pub fn random<R: Rng + ?Sized>(legs: Vec<Leg<Q>>, target: Q, rng: &mut R) -> Result<Self> {
        let mut array = Self::new(legs, target);
        for coords in array.conserving_coords() {
            let block = DenseBlock::random(&array.block_extents(&coords), rng);
            array.data.insert(&coords, block)?;
        }
        Ok(array)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.legs.len()
    }

    #[inline]
    pub fn legs(&self) -> &[Leg<Q>] {
        &self.legs
    }

    #[inline]
    pub fn leg(&self, axis: usize) -> &Leg<Q> {
        &self.legs[axis]
    }

    #[inline]
    pub fn target(&self) -> &Q {
        &self.target
    }

    /// Full element extents.
    pub fn shape(&self) -> Extents {
        self.data.shape()
    }

    /// Number of sectors along every leg.
    pub fn grid(&self) -> &[usize] {
        self.data.grid()
    }

    pub fn block_extents(&self, coords: &[usize]) -> Extents {
        self.data.block_extents(coords)
    }

    /// Number of stored blocks.
    pub fn num_blocks(&self) -> usize {
        self.data.num_stored()
    }

    /// Underlying dense block grid.
    pub fn dense(&self) -> &DenseArray<T> {
        &self.data
    }

    /// Composite label of the block at `coords`.
    pub fn composite_of(&self, coords: &[usize]) -> Q {
        composite(&self.legs, coords)
    }

    /// True when `coords` satisfies the conservation rule.
    pub fn is_conserving(&self, coords: &[usize]) -> bool {
        self.composite_of(coords) == self.target
    }

    /// Every conserving coordinate, in ascending lexicographic order.
    ///
    /// The last leg is resolved by binary search, so the cost is linear in
    /// the sector combinations of the leading legs.
    pub fn conserving_coords(&self) -> Vec<Extents> {
        let Some((last, leading)) = self.legs.split_last() else {
            return if self.target.is_identity() {
                vec![Extents::new()]
            } else {
                Vec::new()
            };
        };
        let mut out = Vec::new();
        for prefix in IndexedLoop::new(&self.grid()[..leading.len()]) {
            let partial = composite(leading, &prefix);
            let needed = last.sign().apply(&partial.invert().compose(&self.target));
            if let Some(pos) = last.shape().position(&needed) {
                let mut coords = prefix;
                coords.push(pos);
                out.push(coords);
            }
        }
        out
    }

    /// Validate that `coords` addresses a conserving block.
    pub fn check_block(&self, coords: &[usize]) -> Result<()> {
        if self.data.check_coords(coords).is_err() {
            return Err(QnError::BlockOutOfRange {
                coords: coords.to_vec(),
                grid: self.grid().to_vec(),
            });
        }
        let composite = self.composite_of(coords);
        if composite != self.target {
            return Err(QnError::NonConservingBlock {
                coords: coords.to_vec(),
                composite: composite.to_string(),
                target: self.target.to_string(),
            });
        }
        Ok(())
    }

    /// Stored block at `coords`, or `None` when absent.
    ///
    /// Absent blocks are implicit zeros; no dummy block is returned.
    pub fn at(&self, coords: &[usize]) -> Option<&DenseBlock<T>> {
        self.data.get(coords)
    }

    pub fn at_mut(&mut self, coords: &[usize]) -> Option<&mut DenseBlock<T>> {
        self.data.get_mut(coords)
    }

    /// Materialise a zero block at `coords` and return it.
    ///
    /// An already stored block is returned unchanged, so concurrent producers
    /// that serialise through this call see first-writer-creates semantics.
    ///
    /// # Errors
    /// - `NonConservingBlock` / `BlockOutOfRange` for an illegal coordinate
    /// - `ResourceExhaustion` when the buffer cannot be allocated; the
    ///   array is unchanged
    pub fn allocate(&mut self, coords: &[usize]) -> Result<&mut DenseBlock<T>> {
        self.check_block(coords)?;
        Ok(self.data.get_or_try_insert_zeros(coords)?)
    }

    /// Store `block` at a conserving coordinate, returning the replaced block.
    pub fn insert_block(&mut self, coords: &[usize], block: DenseBlock<T>) -> Result<Option<DenseBlock<T>>> {
        self.check_block(coords)?;
        Ok(self.data.insert(coords, block)?)
    }

    pub fn remove_block(&mut self, coords: &[usize]) -> Option<DenseBlock<T>> {
        self.data.remove(coords)
    }

    /// Visit stored blocks in ascending lexicographic coordinate order.
    pub fn for_each_block(&self, mut visitor: impl FnMut(&[usize], &DenseBlock<T>)) {
        for (coords, block) in self.data.iter() {
            visitor(&coords, block);
        }
    }

    /// Mutable variant of [`for_each_block`](Self::for_each_block).
    pub fn for_each_block_mut(&mut self, mut visitor: impl FnMut(&[usize], &mut DenseBlock<T>)) {
        for (coords, block) in self.data.iter_mut() {
            visitor(&coords, block);
        }
    }

    /// Stored blocks with their coordinates, in lexicographic order.
    pub fn blocks(&self) -> impl Iterator<Item = (Extents, &DenseBlock<T>)> + '_ {
        self.data.iter()
    }

    /// Remove blocks whose content is exactly zero. Returns how many were removed.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.data.num_stored();
        self.data.retain(|_, block| !block.is_zero());
        let removed = before - self.data.num_stored();
        if removed > 0 {
            debug!(removed, kept = self.data.num_stored(); "pruned zero blocks");
        }
        removed
    }

    /// Remove blocks whose largest element modulus is at most `tol`.
    pub fn prune_below(&mut self, tol: f64) -> usize {
        let before = self.data.num_stored();
        self.data.retain(|_, block| block.max_abs() > tol);
        before - self.data.num_stored()
    }

    /// Assemble the full dense tensor; absent blocks read as zero.
    pub fn to_dense(&self) -> Result<DenseBlock<T>> {
        Ok(self.data.to_dense()?)
    }

    /// Complex conjugate: values conjugated, every sign flipped, target inverted.
    ///
    /// The result is again conserving and contracts against `self` on any leg.
    pub fn conj(&self) -> Result<Self> {
        let legs = self.legs.iter().map(Leg::flipped).collect();
        let mut out = Self::new(legs, self.target.invert());
        for (coords, block) in self.data.iter() {
            out.data.insert(&coords, block.conj())?;
        }
        Ok(out)
    }

    /// Drop sectors that carry no stored block on some leg.
    ///
    /// Shapes are rebuilt, so the result no longer shares legs with arrays
    /// it was computed from.
    pub fn compact_sectors(&self) -> Result<Self> {
        let mut used: Vec<Vec<bool>> = self.grid().iter().map(|&n| vec![false; n]).collect();
        for (coords, _) in self.data.iter() {
            for (axis, &c) in coords.iter().enumerate() {
                used[axis][c] = true;
            }
        }
        if used.iter().all(|u| u.iter().all(|&x| x)) {
            return Ok(self.clone());
        }
        let remap: Vec<Vec<usize>> = used
            .iter()
            .map(|u| {
                let mut next = 0;
                u.iter()
                    .map(|&x| {
                        let idx = next;
                        if x {
                            next += 1;
                        }
                        idx
                    })
                    .collect()
            })
            .collect();
        let legs = self
            .legs
            .iter()
            .zip(&used)
            .map(|(leg, u)| Leg::new(Arc::new(leg.shape().restricted(|i| u[i])), leg.sign()))
            .collect();
        let mut out = Self::new(legs, self.target.clone());
        for (coords, block) in self.data.iter() {
            let new_coords: Extents = coords
                .iter()
                .enumerate()
                .map(|(axis, &c)| remap[axis][c])
                .collect();
            out.data.insert(&new_coords, block.share())?;
        }
        Ok(out)
    }

    /// Verify that every stored block conserves and has the right extents.
    pub fn check_invariants(&self) -> Result<()> {
        for (coords, block) in self.data.iter() {
            self.check_block(&coords)?;
            let expected = self.block_extents(&coords);
            if block.extents() != expected.as_slice() {
                return Err(QnError::Dense(qnblock_dense::DenseError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: block.extents().to_vec(),
                }));
            }
        }
        Ok(())
    }

    /// Same legs and target, and all blocks equal within `tol`.
    ///
    /// A block stored on one side only must be within `tol` of zero.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        if self.legs != other.legs || self.target != other.target {
            return false;
        }
        let close_to_zero = |b: &DenseBlock<T>| b.max_abs() <= tol;
        self.data.iter().all(|(coords, block)| match other.at(&coords) {
            Some(rhs) => block.approx_eq(rhs, tol),
            None => close_to_zero(block),
        }) && other
            .data
            .iter()
            .all(|(coords, block)| self.at(&coords).is_some() || close_to_zero(block))
    }

    /// Squared Frobenius norm.
    pub fn norm_sqr(&self) -> f64 {
        self.data.iter().map(|(_, b)| b.norm_sqr()).sum()
    }

    /// Replace legs without touching data; shapes must have the same partitions.
    pub(crate) fn with_legs(mut self, legs: Vec<Leg<Q>>, target: Q) -> Self {
        debug_assert!(legs
            .iter()
            .zip(&self.legs)
            .all(|(a, b)| a.shape().partition() == b.shape().partition()));
        self.legs = legs;
        self.target = target;
        self
    }

    pub(crate) fn dense_mut(&mut self) -> &mut DenseArray<T> {
        &mut self.data
    }
}

/// Convenience: shared shape from `(label, size)` pairs.
pub fn shape_of<Q: QuantumLabel>(pairs: impl IntoIterator<Item = (Q, usize)>) -> Result<Arc<QuantumShape<Q>>> {
    Ok(Arc::new(QuantumShape::from_pairs(pairs)?))
}
