//! Runtime-rank extents and row-major index arithmetic.

use smallvec::SmallVec;

use crate::error::{DenseError, Result};

/// Extents (or coordinates) of a runtime-rank array.
///
/// Inline storage covers the ranks that occur in practice; larger ranks
/// spill to the heap transparently.
pub type Extents = SmallVec<[usize; 8]>;

/// Number of elements described by `extents` (1 for rank 0).
#[inline]
pub fn volume(extents: &[usize]) -> usize {
    extents.iter().product()
}

/// Row-major strides for `extents`.
pub fn row_major_strides(extents: &[usize]) -> Extents {
    let mut strides: Extents = smallvec::smallvec![0; extents.len()];
    let mut stride = 1;
    for axis in (0..extents.len()).rev() {
        strides[axis] = stride;
        stride *= extents[axis];
    }
    strides
}

/// Linear row-major offset of `index` inside `extents`.
///
/// Panics if the rank differs or any component is out of range.
pub fn linear_index(index: &[usize], extents: &[usize]) -> usize {
    assert_eq!(index.len(), extents.len(), "Index rank mismatch");
    let mut linear = 0;
    for (&i, &n) in index.iter().zip(extents) {
        assert!(i < n, "Index {index:?} out of bounds for extents {extents:?}");
        linear = linear * n + i;
    }
    linear
}

/// Inverse of [`linear_index`].
pub fn multi_index(mut linear: usize, extents: &[usize]) -> Extents {
    let mut idx: Extents = smallvec::smallvec![0; extents.len()];
    for axis in (0..extents.len()).rev() {
        let n = extents[axis];
        idx[axis] = linear % n;
        linear /= n;
    }
    idx
}

/// Checked variant of [`linear_index`].
pub fn try_linear_index(index: &[usize], extents: &[usize]) -> Result<usize> {
    if index.len() != extents.len() {
        return Err(DenseError::RankMismatch {
            expected: extents.len(),
            actual: index.len(),
        });
    }
    if index.iter().zip(extents).any(|(&i, &n)| i >= n) {
        return Err(DenseError::IndexOutOfBounds {
            index: index.to_vec(),
            extents: extents.to_vec(),
        });
    }
    Ok(linear_index(index, extents))
}

/// Validate that `perm` is a permutation of `0..rank`.
pub fn check_permutation(perm: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    let ok = perm.len() == rank
        && perm.iter().all(|&p| {
            if p >= rank || seen[p] {
                false
            } else {
                seen[p] = true;
                true
            }
        });
    if ok {
        Ok(())
    } else {
        Err(DenseError::InvalidPermutation {
            perm: perm.to_vec(),
            rank,
        })
    }
}

/// Apply `perm` to `values`: `out[i] = values[perm[i]]`.
pub fn permuted(values: &[usize], perm: &[usize]) -> Extents {
    perm.iter().map(|&p| values[p]).collect()
}
