//! Rank-polymorphic coordinate iteration.
//!
//! [`IndexedLoop`] walks every coordinate of a runtime-rank shape. It replaces
//! hand-written nests of `for` loops wherever block coordinates have to be
//! enumerated: sparsity checks, merge maps, block-wise copy and permute.

use crate::extents::{volume, Extents};

/// Traversal order of an [`IndexedLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopOrder {
    /// Last axis varies fastest (lexicographic order).
    #[default]
    RowMajor,
    /// First axis varies fastest.
    ColumnMajor,
}

/// Iterator over all coordinates of a shape.
///
/// - rank 0 yields exactly one empty coordinate
/// - any zero extent yields nothing
/// - the loop is restartable through [`IndexedLoop::reset`] and cloning
///   produces an independent traversal
///
/// ```
/// use qnblock_dense::IndexedLoop;
///
/// let coords: Vec<Vec<usize>> = IndexedLoop::new(&[2, 2]).map(|c| c.to_vec()).collect();
/// assert_eq!(coords, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
/// ```
#[derive(Debug, Clone)]
pub struct IndexedLoop {
    extents: Extents,
    order: LoopOrder,
    current: Extents,
    remaining: usize,
}

impl IndexedLoop {
    /// Row-major loop over `extents`.
    pub fn new(extents: &[usize]) -> Self {
        Self::with_order(extents, LoopOrder::RowMajor)
    }

    /// Loop over `extents` in the given order.
    pub fn with_order(extents: &[usize], order: LoopOrder) -> Self {
        let extents: Extents = extents.iter().copied().collect();
        let current = smallvec::smallvec![0; extents.len()];
        let remaining = volume(&extents);
        Self {
            extents,
            order,
            current,
            remaining,
        }
    }

    /// Restart the traversal from the first coordinate.
    pub fn reset(&mut self) {
        self.current.iter_mut().for_each(|c| *c = 0);
        self.remaining = volume(&self.extents);
    }

    /// Extents being traversed.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Traversal order.
    pub fn order(&self) -> LoopOrder {
        self.order
    }

    fn advance(&mut self) {
        if self.extents.len() == 1 {
            self.current[0] += 1;
            return;
        }
        match self.order {
            LoopOrder::RowMajor => {
                for axis in (0..self.extents.len()).rev() {
                    self.current[axis] += 1;
                    if self.current[axis] < self.extents[axis] {
                        return;
                    }
                    self.current[axis] = 0;
                }
            }
            LoopOrder::ColumnMajor => {
                for axis in 0..self.extents.len() {
                    self.current[axis] += 1;
                    if self.current[axis] < self.extents[axis] {
                        return;
                    }
                    self.current[axis] = 0;
                }
            }
        }
    }
}

impl Iterator for IndexedLoop {
    type Item = Extents;

    fn next(&mut self) -> Option<Extents> {
        if self.remaining == 0 {
            return None;
        }
        let out = self.current.clone();
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for IndexedLoop {}

impl std::iter::FusedIterator for IndexedLoop {}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(lp: IndexedLoop) -> Vec<Vec<usize>> {
        lp.map(|c| c.to_vec()).collect()
    }

    #[test]
    fn test_row_major_order() {
        let coords = collect(IndexedLoop::new(&[2, 3]));
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], vec![0, 0]);
        assert_eq!(coords[1], vec![0, 1]);
        assert_eq!(coords[3], vec![1, 0]);
        assert_eq!(coords[5], vec![1, 2]);
    }

    #[test]
    fn test_column_major_order() {
        let coords = collect(IndexedLoop::with_order(&[2, 3], LoopOrder::ColumnMajor));
        assert_eq!(coords[0], vec![0, 0]);
        assert_eq!(coords[1], vec![1, 0]);
        assert_eq!(coords[2], vec![0, 1]);
        assert_eq!(coords[5], vec![1, 2]);
    }

    #[test]
    fn test_rank_one_and_zero() {
        assert_eq!(collect(IndexedLoop::new(&[3])), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(collect(IndexedLoop::new(&[])), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_zero_extent_is_empty() {
        assert_eq!(IndexedLoop::new(&[3, 0, 2]).count(), 0);
        assert_eq!(IndexedLoop::new(&[0]).count(), 0);
    }

    #[test]
    fn test_reset_and_independent_clones() {
        let mut lp = IndexedLoop::new(&[2, 2]);
        lp.next();
        let fork = lp.clone();
        assert_eq!(lp.by_ref().count(), 3);
        assert_eq!(lp.next(), None);
        lp.reset();
        assert_eq!(lp.len(), 4);
        assert_eq!(fork.count(), 3);
    }
}
