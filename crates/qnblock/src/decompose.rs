//! Blockwise factorisations: singular value decomposition, Hermitian
//! eigendecomposition and linear solves.
//!
//! The array is merged into a matrix (legs `..split` as rows, the rest as
//! columns). Every stored merged block is factorised on its own; the bond
//! leg gets one sector per block, labelled by the row sector's label.

use std::sync::Arc;

use log::debug;
use qnblock_dense::{DenseBlock, Extents, Scalar};

use crate::arglist::{ArgList, Request, SolveKind};
use crate::config::{retained_rank, ContractOptions, SvdOptions};
use crate::contract::contract;
use crate::error::{QnError, Result};
use crate::kernel::{KernelFailure, KernelStatus, LinalgKernel, Outcome, SINGULAR};
use crate::merge::{merge_matrix, split_matrix, MergeInfo};
use crate::ops::run;
use crate::qshape::{Leg, QuantumShape};
use crate::quantum::QuantumLabel;
use crate::sym_array::SymmetricArray;

/// Real values grouped by bond sector.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum<Q: QuantumLabel> {
    bond: Arc<QuantumShape<Q>>,
    values: Vec<Vec<f64>>,
}

/// Singular values, descending within each sector.
pub type SingularValues<Q> = Spectrum<Q>;

/// Eigenvalues, ascending within each sector.
pub type Eigenvalues<Q> = Spectrum<Q>;

impl<Q: QuantumLabel> Spectrum<Q> {
    pub fn bond(&self) -> &Arc<QuantumShape<Q>> {
        &self.bond
    }

    /// Values of bond sector `index`.
    pub fn sector(&self, index: usize) -> &[f64] {
        &self.values[index]
    }

    /// Values of the sector labelled `label`, if the bond has one.
    pub fn get(&self, label: &Q) -> Option<&[f64]> {
        self.bond.position(label).map(|b| self.values[b].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Q, &[f64])> + '_ {
        self.bond.labels().zip(self.values.iter().map(Vec::as_slice))
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diagonal array over `[bond(+), bond(-)]` with identity target.
    pub fn to_array<T: Scalar>(&self) -> Result<SymmetricArray<T, Q>> {
        let legs = vec![Leg::plus(Arc::clone(&self.bond)), Leg::minus(Arc::clone(&self.bond))];
        let mut out = SymmetricArray::new(legs, Q::identity());
        for (b, values) in self.values.iter().enumerate() {
            let n = values.len();
            let block = DenseBlock::from_fn(&[n, n], |idx| {
                if idx[0] == idx[1] {
                    T::from_f64(values[idx[0]])
                } else {
                    T::zero()
                }
            });
            out.insert_block(&[b, b], block)?;
        }
        Ok(out)
    }
}

/// `a = u · diag(s) · vt`, possibly truncated.
#[derive(Debug, Clone)]
pub struct SvdFactors<T: Scalar, Q: QuantumLabel> {
    /// Legs `rows ++ [bond(-)]`, identity target.
    pub u: SymmetricArray<T, Q>,
    pub s: SingularValues<Q>,
    /// Legs `[bond(+)] ++ cols`, target of the decomposed array.
    pub vt: SymmetricArray<T, Q>,
    pub bond: Arc<QuantumShape<Q>>,
    /// Sum of squares of the discarded singular values.
    pub discarded_weight: f64,
}

/// Two-factor split `a ≈ left · right` with `right = diag(s) · vt`.
#[derive(Debug, Clone)]
pub struct Factorization<T: Scalar, Q: QuantumLabel> {
    pub left: SymmetricArray<T, Q>,
    pub right: SymmetricArray<T, Q>,
    /// Kept weight over total weight, `1.0` for an untruncated split.
    pub weight: f64,
}

/// Factors of one merged block.
struct BlockSvd<T: Scalar> {
    row: usize,
    col: usize,
    u: DenseBlock<T>,
    s: Vec<f64>,
    vt: DenseBlock<T>,
}

/// Truncated SVD of `a` with legs `0..split` as rows.
///
/// The truncation criterion is applied to the singular values of all
/// sectors together, and at least one value is kept when any exists.
/// Blocks whose factorisation fails are reported and contribute nothing.
///
/// # Errors
/// `InvalidSplit` unless `0 < split < rank`.
pub fn svd<T, Q, K>(
    a: &SymmetricArray<T, Q>,
    split: usize,
    kernel: &K,
    options: &SvdOptions,
) -> Result<Outcome<SvdFactors<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    if split == 0 || split >= a.rank() {
        return Err(QnError::InvalidSplit {
            split,
            rank: a.rank(),
        });
    }
    let row_axes: Vec<usize> = (0..split).collect();
    let col_axes: Vec<usize> = (split..a.rank()).collect();
    let rows = MergeInfo::for_array(a, &row_axes)?;
    let cols = MergeInfo::for_array(a, &col_axes)?;
    let matrix = merge_matrix(a, &rows, &cols)?;

    let mut failures = Vec::new();
    let mut factors = Vec::new();
    for (coords, block) in matrix.blocks() {
        let (m, n) = (block.extents()[0], block.extents()[1]);
        let k = m.min(n);
        let mut u = DenseBlock::try_zeros(&[m, k])?;
        let mut vt = DenseBlock::try_zeros(&[k, n])?;
        let mut s = vec![0.0; k];
        let args = ArgList::build(Request::Svd {
            a: block,
            split: 1,
            u: &mut u,
            s: s.as_mut_slice(),
            vt: &mut vt,
        })?;
        if run(args, kernel, &coords, &mut failures) {
            factors.push(BlockSvd {
                row: coords[0],
                col: coords[1],
                u,
                s,
                vt,
            });
        }
    }

    let mut ranked: Vec<(f64, usize)> = factors
        .iter()
        .enumerate()
        .flat_map(|(i, f)| f.s.iter().map(move |&v| (v, i)))
        .collect();
    ranked.sort_by(|x, y| y.0.total_cmp(&x.0));
    let sorted: Vec<f64> = ranked.iter().map(|&(v, _)| v).collect();
    let (rtol, max_rank) = options.truncation.effective();
    let keep = retained_rank(&sorted, rtol).min(max_rank.max(1));
    let mut kept = vec![0usize; factors.len()];
    for &(_, i) in &ranked[..keep] {
        kept[i] += 1;
    }
    let discarded_weight: f64 = sorted[keep..].iter().map(|v| v * v).sum();

    let row_shape = rows.merged_shape();
    let bond = Arc::new(QuantumShape::from_pairs(
        factors
            .iter()
            .zip(&kept)
            .filter(|(_, &k)| k > 0)
            .map(|(f, &k)| (row_shape.label(f.row).clone(), k)),
    )?);

    let mut u_legs = rows.legs().to_vec();
    u_legs.push(Leg::minus(Arc::clone(&bond)));
    let mut u = SymmetricArray::new(u_legs, Q::identity());
    let vt_legs = std::iter::once(Leg::plus(Arc::clone(&bond)))
        .chain(cols.legs().iter().cloned())
        .collect();
    let mut vt = SymmetricArray::new(vt_legs, a.target().clone());
    let mut values = vec![Vec::new(); bond.num_sectors()];

    for (f, &k) in factors.iter().zip(&kept) {
        let Some(b) = bond.position(row_shape.label(f.row)).filter(|_| k > 0) else {
            continue;
        };
        values[b] = f.s[..k].to_vec();
        for re in rows.entries_in(f.row) {
            let piece = f.u.extract_region(&[re.offset, 0], &[re.extent, k])?;
            if piece.is_zero() {
                continue;
            }
            let mut extents = rows.block_extents(re);
            extents.push(k);
            let mut coords = re.sectors.clone();
            coords.push(b);
            u.insert_block(&coords, piece.reshape(&extents)?)?;
        }
        for ce in cols.entries_in(f.col) {
            let piece = f.vt.extract_region(&[0, ce.offset], &[k, ce.extent])?;
            if piece.is_zero() {
                continue;
            }
            let extents: Extents = std::iter::once(k).chain(cols.block_extents(ce)).collect();
            let coords: Extents = std::iter::once(b).chain(ce.sectors.iter().copied()).collect();
            vt.insert_block(&coords, piece.reshape(&extents)?)?;
        }
    }
    debug!(blocks = factors.len(), kept = keep, total = sorted.len(), discarded = discarded_weight; "symmetric svd");

    Ok(Outcome::new(
        SvdFactors {
            u,
            s: Spectrum {
                bond: Arc::clone(&bond),
                values,
            },
            vt,
            bond,
            discarded_weight,
        },
        failures,
    ))
}

/// Split `a` into a left-orthonormal factor and `diag(s) · vt`.
pub fn decompose<T, Q, K>(
    a: &SymmetricArray<T, Q>,
    split: usize,
    kernel: &K,
    options: &SvdOptions,
) -> Result<Outcome<Factorization<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let Outcome {
        value: factors,
        mut failures,
    } = svd(a, split, kernel, options)?;
    let s = factors.s.to_array::<T>()?;
    let right = contract(T::one(), &s, &[1], &factors.vt, &[0], kernel, &ContractOptions::sequential())?;
    failures.extend(right.failures);

    let kept: f64 = factors.s.iter().flat_map(|(_, v)| v.iter()).map(|v| v * v).sum();
    let total = kept + factors.discarded_weight;
    let weight = if total > 0.0 { kept / total } else { 1.0 };
    Ok(Outcome::new(
        Factorization {
            left: factors.u,
            right: right.value,
            weight,
        },
        failures,
    ))
}

/// `a = vectors · diag(values) · vectors†` for a Hermitian `a`.
#[derive(Debug, Clone)]
pub struct EigFactors<T: Scalar, Q: QuantumLabel> {
    /// Legs `rows ++ [bond(-)]`, identity target.
    pub vectors: SymmetricArray<T, Q>,
    pub values: Eigenvalues<Q>,
    pub bond: Arc<QuantumShape<Q>>,
}

/// Hermitian eigendecomposition of `a` with legs `0..split` as rows.
///
/// Leg `split + i` must be the dual of leg `i` and the target must be the
/// identity, so every stored merged block is square and maps a sector onto
/// itself. Only the lower triangle of each block is read. Sectors without a
/// stored block are zero and get no bond sector; blocks whose kernel call
/// fails are reported and dropped the same way.
///
/// # Errors
/// `InvalidSplit` unless `0 < split < rank`, `RankMismatch` unless
/// `rank == 2 * split`, `LegMismatch` for a column leg that is not the dual
/// of its row leg and `TargetMismatch` for a charged array.
pub fn eigh<T, Q, K>(a: &SymmetricArray<T, Q>, split: usize, kernel: &K) -> Result<Outcome<EigFactors<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    if split == 0 || split >= a.rank() {
        return Err(QnError::InvalidSplit {
            split,
            rank: a.rank(),
        });
    }
    if a.rank() != 2 * split {
        return Err(QnError::RankMismatch {
            expected: 2 * split,
            actual: a.rank(),
        });
    }
    for i in 0..split {
        if !a.leg(split + i).is_dual_of(a.leg(i)) {
            return Err(QnError::LegMismatch {
                left: i,
                right: split + i,
                reason: "column leg must be the dual of its row leg".into(),
            });
        }
    }
    if !a.target().is_identity() {
        return Err(QnError::TargetMismatch {
            left: a.target().to_string(),
            right: Q::identity().to_string(),
        });
    }

    let row_axes: Vec<usize> = (0..split).collect();
    let col_axes: Vec<usize> = (split..a.rank()).collect();
    let rows = MergeInfo::for_array(a, &row_axes)?;
    let cols = MergeInfo::for_array(a, &col_axes)?;
    let matrix = merge_matrix(a, &rows, &cols)?;

    let mut failures = Vec::new();
    let mut solved: Vec<(usize, Vec<f64>, DenseBlock<T>)> = Vec::new();
    for (coords, block) in matrix.blocks() {
        let n = block.extents()[0];
        let mut w = vec![0.0; n];
        let mut z = DenseBlock::try_zeros(&[n, n])?;
        let args = ArgList::build(Request::Eig {
            a: block,
            split: 1,
            w: w.as_mut_slice(),
            z: &mut z,
        })?;
        if run(args, kernel, &coords, &mut failures) {
            solved.push((coords[0], w, z));
        }
    }

    let row_shape = rows.merged_shape();
    let bond = Arc::new(QuantumShape::from_pairs(
        solved.iter().map(|(row, w, _)| (row_shape.label(*row).clone(), w.len())),
    )?);
    let mut legs = rows.legs().to_vec();
    legs.push(Leg::minus(Arc::clone(&bond)));
    let mut vectors = SymmetricArray::new(legs, Q::identity());
    let mut values = vec![Vec::new(); bond.num_sectors()];
    for (row, w, z) in solved {
        let Some(b) = bond.position(row_shape.label(row)) else {
            continue;
        };
        let n = w.len();
        values[b] = w;
        for re in rows.entries_in(row) {
            let piece = z.extract_region(&[re.offset, 0], &[re.extent, n])?;
            if piece.is_zero() {
                continue;
            }
            let mut extents = rows.block_extents(re);
            extents.push(n);
            let mut coords = re.sectors.clone();
            coords.push(b);
            vectors.insert_block(&coords, piece.reshape(&extents)?)?;
        }
    }
    debug!(sectors = bond.num_sectors(), dim = bond.total_dim(), failures = failures.len(); "symmetric eigendecomposition");

    Ok(Outcome::new(
        EigFactors {
            vectors,
            values: Spectrum {
                bond: Arc::clone(&bond),
                values,
            },
            bond,
        },
        failures,
    ))
}

/// Solve `a · x = b` blockwise, with legs `0..split` of `a` as rows.
///
/// The first `split` legs of `b` must equal the row legs of `a`; its other
/// legs index the right-hand sides. `x` has the duals of the column legs of
/// `a` followed by the right-hand-side legs of `b`, and target
/// `a.target()⁻¹ ∘ b.target()`, so that `contract(a, cols, x, ..)` gives
/// back `b`. Every merged block of `a` that meets a block of `b` must be
/// square. A row sector of `b` with no stored block of `a` is singular and
/// is reported like a failed kernel call.
///
/// # Errors
/// `InvalidSplit` unless `0 < split < a.rank()` and `split <= b.rank()`;
/// `LegMismatch` when the row legs differ; `ExtentMismatch` for a
/// non-square block.
pub fn solve<T, Q, K>(
    a: &SymmetricArray<T, Q>,
    split: usize,
    b: &SymmetricArray<T, Q>,
    kind: SolveKind,
    kernel: &K,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    if split == 0 || split >= a.rank() || split > b.rank() {
        return Err(QnError::InvalidSplit {
            split,
            rank: a.rank(),
        });
    }
    for i in 0..split {
        if a.leg(i) != b.leg(i) {
            return Err(QnError::LegMismatch {
                left: i,
                right: i,
                reason: "right-hand side rows must match the matrix rows".into(),
            });
        }
    }

    let row_axes: Vec<usize> = (0..split).collect();
    let a_col_axes: Vec<usize> = (split..a.rank()).collect();
    let b_col_axes: Vec<usize> = (split..b.rank()).collect();
    let rows = MergeInfo::build(a.legs(), &row_axes)?;
    let a_cols = MergeInfo::build(a.legs(), &a_col_axes)?;
    let b_cols = MergeInfo::build(b.legs(), &b_col_axes)?;
    let am = merge_matrix(a, &rows, &a_cols)?;
    let bm = merge_matrix(b, &rows, &b_cols)?;

    let x_legs: Vec<Leg<Q>> = a.legs()[split..]
        .iter()
        .map(Leg::flipped)
        .chain(b.legs()[split..].iter().cloned())
        .collect();
    let nc = a.rank() - split;
    let x_row_axes: Vec<usize> = (0..nc).collect();
    let x_col_axes: Vec<usize> = (nc..x_legs.len()).collect();
    let x_rows = MergeInfo::build(&x_legs, &x_row_axes)?;
    let x_cols = MergeInfo::build(&x_legs, &x_col_axes)?;
    let target = a.target().invert().compose(b.target());
    let mut xm = SymmetricArray::new(vec![x_rows.merged_leg(), x_cols.merged_leg()], target);

    let routine = kind.routine();
    let mut failures = Vec::new();
    for (coords, rhs) in bm.blocks() {
        // the only column sector of `a` that conserves against this row
        let col_label = rows.merged_shape().label(coords[0]).invert().compose(a.target());
        let lhs = a_cols
            .merged_shape()
            .position(&col_label)
            .and_then(|c| am.at(&[coords[0], c]));
        let (Some(lhs), Some(x_row)) = (lhs, x_rows.merged_shape().position(&col_label.invert())) else {
            failures.push(KernelFailure::new(
                coords.as_slice(),
                KernelStatus::new(routine, SINGULAR, "no stored block in this row sector"),
            ));
            continue;
        };
        let mut x = rhs.clone();
        let args = ArgList::build(Request::Solve {
            kind,
            a: lhs,
            split: 1,
            b: &mut x,
            rhs_split: 1,
        })?;
        if run(args, kernel, &coords, &mut failures) {
            xm.insert_block(&[x_row, coords[1]], x)?;
        }
    }
    debug!(blocks = xm.num_blocks(), failures = failures.len(), routine = routine.name(); "blockwise solve");
    Ok(Outcome::new(split_matrix(&xm, &x_rows, &x_cols)?, failures))
}
