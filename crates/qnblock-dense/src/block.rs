//! Dense numeric blocks with shared, copy-on-write buffers.

use std::sync::Arc;

use rand::Rng;

use crate::error::{DenseError, Result};
use crate::extents::{check_permutation, linear_index, permuted, row_major_strides, volume, Extents};
use crate::indexed_loop::IndexedLoop;
use crate::scalar::Scalar;

/// A contiguous row-major block of scalars with its own extents.
///
/// The buffer is reference counted. `clone()` is an explicit zero-copy
/// *view* that shares the buffer with the original; every mutating method
/// goes through copy-on-write, so a write through one handle never becomes
/// visible through another.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseBlock<T: Scalar> {
    extents: Extents,
    data: Arc<Vec<T>>,
}

impl<T: Scalar> DenseBlock<T> {
    /// Zero-filled block.
    pub fn zeros(extents: &[usize]) -> Self {
        Self {
            extents: extents.iter().copied().collect(),
            data: Arc::new(vec![T::zero(); volume(extents)]),
        }
    }

    /// Zero-filled block, reporting allocator failure instead of aborting.
    pub fn try_zeros(extents: &[usize]) -> Result<Self> {
        let elements = volume(extents);
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|_| DenseError::AllocationFailed { elements })?;
        data.resize(elements, T::zero());
        Ok(Self {
            extents: extents.iter().copied().collect(),
            data: Arc::new(data),
        })
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(extents: &[usize], data: Vec<T>) -> Result<Self> {
        if data.len() != volume(extents) {
            return Err(DenseError::LengthMismatch {
                len: data.len(),
                extents: extents.to_vec(),
            });
        }
        Ok(Self {
            extents: extents.iter().copied().collect(),
            data: Arc::new(data),
        })
    }

    /// Build a block by evaluating `f` at every coordinate.
    pub fn from_fn(extents: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let data = IndexedLoop::new(extents).map(|idx| f(&idx[..])).collect();
        Self {
            extents: extents.iter().copied().collect(),
            data: Arc::new(data),
        }
    }

    /// Block filled with standard-normal samples.
    pub fn random<R: Rng + ?Sized>(extents: &[usize], rng: &mut R) -> Self {
        let data = (0..volume(extents)).map(|_| T::sample_normal(rng)).collect();
        Self {
            extents: extents.iter().copied().collect(),
            data: Arc::new(data),
        }
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access; detaches from any other view first.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Take the buffer, copying only when it is shared.
    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Zero-copy view sharing this block's buffer.
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// True when another handle views the same buffer.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Element at `index`. Panics when out of range.
    pub fn get(&self, index: &[usize]) -> T {
        self.data[linear_index(index, &self.extents)]
    }

    /// Overwrite the element at `index`. Panics when out of range.
    pub fn set(&mut self, index: &[usize], value: T) {
        let pos = linear_index(index, &self.extents);
        self.as_mut_slice()[pos] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.as_mut_slice().iter_mut().for_each(|x| *x = value);
    }

    /// Element-wise complex conjugate.
    pub fn conj(&self) -> Self {
        if !T::is_complex_type() {
            return self.clone();
        }
        Self {
            extents: self.extents.clone(),
            data: Arc::new(self.data.iter().map(|x| x.conjugate()).collect()),
        }
    }

    /// True when every element is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|x| *x == T::zero())
    }

    /// Largest element modulus (0 for an empty block).
    pub fn max_abs(&self) -> f64 {
        self.data.iter().map(|x| x.modulus()).fold(0.0, f64::max)
    }

    pub fn norm_sqr(&self) -> f64 {
        self.data.iter().map(|x| x.modulus().powi(2)).sum()
    }

    /// Reorder axes: axis `i` of the result is axis `perm[i]` of `self`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        check_permutation(perm, self.rank())?;
        if perm.iter().enumerate().all(|(i, &p)| i == p) {
            return Ok(self.clone());
        }
        let src_strides = row_major_strides(&self.extents);
        let strides = permuted(&src_strides, perm);
        let extents = permuted(&self.extents, perm);
        let data = IndexedLoop::new(&extents)
            .map(|idx| {
                let pos: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
                self.data[pos]
            })
            .collect();
        Ok(Self {
            extents,
            data: Arc::new(data),
        })
    }

    /// Reinterpret the buffer with new extents of equal volume (zero-copy).
    pub fn reshape(&self, extents: &[usize]) -> Result<Self> {
        if volume(extents) != self.len() {
            return Err(DenseError::LengthMismatch {
                len: self.len(),
                extents: extents.to_vec(),
            });
        }
        Ok(Self {
            extents: extents.iter().copied().collect(),
            data: Arc::clone(&self.data),
        })
    }

    /// Copy out the sub-block starting at `offsets` with `extents`.
    pub fn extract_region(&self, offsets: &[usize], extents: &[usize]) -> Result<Self> {
        check_region(&self.extents, offsets, extents)?;
        let mut out = Self::try_zeros(extents)?;
        let zero: Extents = smallvec::smallvec![0; extents.len()];
        copy_region(
            &self.data,
            &self.extents,
            offsets,
            Arc::make_mut(&mut out.data).as_mut_slice(),
            extents,
            &zero,
            extents,
        );
        Ok(out)
    }

    /// Overwrite the sub-block starting at `offsets` with `src`.
    pub fn insert_region(&mut self, offsets: &[usize], src: &Self) -> Result<()> {
        check_region(&self.extents, offsets, src.extents())?;
        let zero: Extents = smallvec::smallvec![0; src.rank()];
        let extents = self.extents.clone();
        copy_region(
            &src.data,
            src.extents(),
            &zero,
            Arc::make_mut(&mut self.data).as_mut_slice(),
            &extents,
            offsets,
            src.extents(),
        );
        Ok(())
    }

    /// Element-wise comparison with absolute tolerance `tol`.
    pub fn approx_eq(&self, other: &Self, tol: f64) -> bool {
        self.extents == other.extents
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (*a - *b).modulus() <= tol)
    }
}

fn check_region(outer: &[usize], offsets: &[usize], extents: &[usize]) -> Result<()> {
    if offsets.len() != outer.len() || extents.len() != outer.len() {
        return Err(DenseError::RankMismatch {
            expected: outer.len(),
            actual: extents.len(),
        });
    }
    let fits = offsets
        .iter()
        .zip(extents)
        .zip(outer)
        .all(|((&o, &e), &n)| o + e <= n);
    if !fits {
        return Err(DenseError::IndexOutOfBounds {
            index: offsets.iter().zip(extents).map(|(o, e)| o + e).collect(),
            extents: outer.to_vec(),
        });
    }
    Ok(())
}

/// Copy a rectangular region between two row-major buffers, one contiguous
/// run of the last axis at a time.
fn copy_region<T: Copy>(
    src: &[T],
    src_extents: &[usize],
    src_offsets: &[usize],
    dst: &mut [T],
    dst_extents: &[usize],
    dst_offsets: &[usize],
    region: &[usize],
) {
    let rank = region.len();
    if rank == 0 {
        dst[0] = src[0];
        return;
    }
    let run = region[rank - 1];
    if run == 0 {
        return;
    }
    let src_strides = row_major_strides(src_extents);
    let dst_strides = row_major_strides(dst_extents);
    for outer in IndexedLoop::new(&region[..rank - 1]) {
        let mut s = src_offsets[rank - 1];
        let mut d = dst_offsets[rank - 1];
        for axis in 0..rank - 1 {
            s += (outer[axis] + src_offsets[axis]) * src_strides[axis];
            d += (outer[axis] + dst_offsets[axis]) * dst_strides[axis];
        }
        dst[d..d + run].copy_from_slice(&src[s..s + run]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn iota(extents: &[usize]) -> DenseBlock<f64> {
        let n = volume(extents);
        DenseBlock::from_vec(extents, (0..n).map(|x| x as f64).collect()).unwrap()
    }

    #[test]
    fn test_zeros_and_set() {
        let mut b = DenseBlock::<f64>::zeros(&[2, 3]);
        assert!(b.is_zero());
        b.set(&[1, 2], 5.0);
        assert_eq!(b.get(&[1, 2]), 5.0);
        assert_eq!(b.as_slice()[5], 5.0);
        assert!(!b.is_zero());
    }

    #[test]
    fn test_from_vec_length_check() {
        let err = DenseBlock::<f64>::from_vec(&[2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, DenseError::LengthMismatch { len: 3, .. }));
    }

    #[test]
    fn test_shared_view_copy_on_write() {
        let a = iota(&[2, 2]);
        let mut view = a.share();
        assert!(a.is_shared());
        view.set(&[0, 0], 100.0);
        assert_eq!(a.get(&[0, 0]), 0.0);
        assert_eq!(view.get(&[0, 0]), 100.0);
        assert!(!a.is_shared());
    }

    #[test]
    fn test_permute() {
        let a = iota(&[2, 3, 4]);
        let p = a.permute(&[2, 0, 1]).unwrap();
        assert_eq!(p.extents(), &[4, 2, 3]);
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    assert_eq!(p.get(&[k, i, j]), a.get(&[i, j, k]));
                }
            }
        }
        assert!(a.permute(&[0, 0, 1]).is_err());
    }

    #[test]
    fn test_reshape_shares_buffer() {
        let a = iota(&[2, 3]);
        let r = a.reshape(&[3, 2]).unwrap();
        assert!(a.is_shared());
        assert_eq!(r.as_slice(), a.as_slice());
        assert!(a.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_region_round_trip() {
        let a = iota(&[4, 5]);
        let sub = a.extract_region(&[1, 2], &[2, 3]).unwrap();
        assert_eq!(sub.as_slice(), &[7.0, 8.0, 9.0, 12.0, 13.0, 14.0]);

        let mut z = DenseBlock::<f64>::zeros(&[4, 5]);
        z.insert_region(&[1, 2], &sub).unwrap();
        assert_eq!(z.get(&[2, 4]), 14.0);
        assert_eq!(z.get(&[0, 0]), 0.0);
        assert!(z.insert_region(&[3, 3], &sub).is_err());
    }

    #[test]
    fn test_conj_complex() {
        let a = DenseBlock::from_vec(&[2], vec![Complex64::new(1.0, 2.0), Complex64::new(0.0, -1.0)])
            .unwrap();
        let c = a.conj();
        assert_eq!(c.as_slice()[0], Complex64::new(1.0, -2.0));
        assert_eq!(c.as_slice()[1], Complex64::new(0.0, 1.0));
    }

    #[test]
    fn test_rank_zero_block() {
        let mut s = DenseBlock::<f64>::zeros(&[]);
        assert_eq!(s.len(), 1);
        s.set(&[], 3.0);
        let copy = s.extract_region(&[], &[]).unwrap();
        assert_eq!(copy.get(&[]), 3.0);
    }
}
