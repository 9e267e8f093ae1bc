//! Block-sparse contraction of symmetric arrays.
//!
//! Both operands are merged into rank-2 symmetric matrices (free legs against
//! contracted legs), block pairs with inverse contracted labels are turned
//! into three-operand arg lists, the products are reduced into a merged
//! output matrix and that matrix is split back into per-leg blocks.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};
use qnblock_dense::{DenseBlock, Scalar};
use rayon::prelude::*;

use crate::arglist::{ArgList, Layout, RankSignature, Request};
use crate::config::ContractOptions;
use crate::error::{QnError, Result};
use crate::kernel::{KernelFailure, KernelResult, LinalgKernel, Outcome};
use crate::merge::{merge_matrix, split_matrix_with, MergeCache, MergeInfo};
use crate::ops::{self, check_same_space, run};
use crate::quantum::QuantumLabel;
use crate::sym_array::SymmetricArray;

/// Merge maps of one contraction.
struct Plan<Q: QuantumLabel> {
    free_a: Arc<MergeInfo<Q>>,
    ctr_a: Arc<MergeInfo<Q>>,
    ctr_b: Arc<MergeInfo<Q>>,
    free_b: Arc<MergeInfo<Q>>,
}

/// Axes of `rank` not listed in `axes`, after checking that `axes` are
/// distinct and in range.
fn free_axes(rank: usize, axes: &[usize], operand: &str) -> Result<Vec<usize>> {
    let mut seen = vec![false; rank];
    for &axis in axes {
        if axis >= rank || seen[axis] {
            return Err(QnError::InvalidAxes(format!(
                "{operand} axes {axes:?} must be distinct and below rank {rank}"
            )));
        }
        seen[axis] = true;
    }
    Ok((0..rank).filter(|&axis| !seen[axis]).collect())
}

fn plan<T: Scalar, Q: QuantumLabel>(
    a: &SymmetricArray<T, Q>,
    axes_a: &[usize],
    b: &SymmetricArray<T, Q>,
    axes_b: &[usize],
    cache: Option<&MergeCache<Q>>,
) -> Result<Plan<Q>> {
    if axes_a.len() != axes_b.len() {
        return Err(QnError::InvalidAxes(format!(
            "{} axes on the left but {} on the right",
            axes_a.len(),
            axes_b.len()
        )));
    }
    let rest_a = free_axes(a.rank(), axes_a, "left")?;
    let rest_b = free_axes(b.rank(), axes_b, "right")?;
    for (&i, &j) in axes_a.iter().zip(axes_b) {
        let (la, lb) = (a.leg(i), b.leg(j));
        if !la.is_dual_of(lb) {
            let reason = if la.shape() != lb.shape() {
                format!("shapes differ: {} vs {}", la.shape(), lb.shape())
            } else {
                format!("signs must be opposite, both are {}", la.sign())
            };
            return Err(QnError::LegMismatch {
                left: i,
                right: j,
                reason,
            });
        }
    }

    let plan = match cache {
        Some(cache) => Plan {
            free_a: cache.for_legs(a.legs(), a.target(), &rest_a)?,
            ctr_a: cache.unfiltered(a.legs(), axes_a)?,
            ctr_b: cache.unfiltered(b.legs(), axes_b)?,
            free_b: cache.for_legs(b.legs(), b.target(), &rest_b)?,
        },
        None => Plan {
            free_a: Arc::new(MergeInfo::for_legs(a.legs(), a.target(), &rest_a)?),
            ctr_a: Arc::new(MergeInfo::build(a.legs(), axes_a)?),
            ctr_b: Arc::new(MergeInfo::build(b.legs(), axes_b)?),
            free_b: Arc::new(MergeInfo::for_legs(b.legs(), b.target(), &rest_b)?),
        },
    };
    Ok(plan)
}

/// One block-pair product: `a` (`f x k`) times `b` (`k x g`) lands in merged
/// output block `out`.
struct Pair<'a, T: Scalar> {
    out: [usize; 2],
    a: &'a DenseBlock<T>,
    b: &'a DenseBlock<T>,
}

/// `alpha * A · B`, contracting `axes_a` of `a` with `axes_b` of `b`.
///
/// The result carries the free legs of `a` followed by the free legs of `b`
/// (each in their original order) and target `target(a) ∘ target(b)`.
/// Contracted leg pairs must be duals: equal shapes and opposite signs.
///
/// Kernel failures are reported per merged output block (row sector of the
/// merged free legs of `a`, column sector of those of `b`); the products of
/// failing pairs are left out of the result.
///
/// # Errors
/// `InvalidAxes` for malformed axis lists, `LegMismatch` for incompatible
/// leg pairs, `ExtentMismatch` if an arg list cannot be built and
/// `ResourceExhaustion` if a buffer cannot be allocated.
pub fn contract<T, Q, K>(
    alpha: T,
    a: &SymmetricArray<T, Q>,
    axes_a: &[usize],
    b: &SymmetricArray<T, Q>,
    axes_b: &[usize],
    kernel: &K,
    options: &ContractOptions,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let plan = plan(a, axes_a, b, axes_b, None)?;
    execute(alpha, a, b, &plan, kernel, options)
}

/// [`contract`] with merge maps drawn from (and added to) `cache`.
#[allow(clippy::too_many_arguments)]
pub fn contract_with_cache<T, Q, K>(
    alpha: T,
    a: &SymmetricArray<T, Q>,
    axes_a: &[usize],
    b: &SymmetricArray<T, Q>,
    axes_b: &[usize],
    kernel: &K,
    options: &ContractOptions,
    cache: &MergeCache<Q>,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let plan = plan(a, axes_a, b, axes_b, Some(cache))?;
    execute(alpha, a, b, &plan, kernel, options)
}

fn execute<T, Q, K>(
    alpha: T,
    a: &SymmetricArray<T, Q>,
    b: &SymmetricArray<T, Q>,
    plan: &Plan<Q>,
    kernel: &K,
    options: &ContractOptions,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let ma = merge_matrix(a, &plan.free_a, &plan.ctr_a)?;
    let mb = merge_matrix(b, &plan.ctr_b, &plan.free_b)?;

    let mut rows_of_b: BTreeMap<usize, Vec<(usize, &DenseBlock<T>)>> = BTreeMap::new();
    for (coords, block) in mb.dense().iter() {
        rows_of_b.entry(coords[0]).or_default().push((coords[1], block));
    }
    let ctr_a_shape = plan.ctr_a.merged_shape();
    let ctr_b_shape = plan.ctr_b.merged_shape();
    let mut pairs = Vec::new();
    for (coords, block_a) in ma.dense().iter() {
        let wanted = ctr_a_shape.label(coords[1]).invert();
        let Some(kb) = ctr_b_shape.position(&wanted) else {
            continue;
        };
        for &(g, block_b) in rows_of_b.get(&kb).into_iter().flatten() {
            pairs.push(Pair {
                out: [coords[0], g],
                a: block_a,
                b: block_b,
            });
        }
    }

    // All buffers and arg lists exist before the first kernel call.
    let mut buffers: Vec<DenseBlock<T>> = pairs
        .iter()
        .map(|p| DenseBlock::try_zeros(&[p.a.extents()[0], p.b.extents()[1]]))
        .collect::<std::result::Result<_, _>>()?;
    let signature = RankSignature::new(plan.free_a.subset().len(), plan.ctr_a.subset().len(), plan.free_b.subset().len());
    let mut calls = pairs
        .iter()
        .zip(buffers.iter_mut())
        .enumerate()
        .map(|(i, (pair, c))| {
            let args = ArgList::build(Request::Contract {
                alpha,
                a: pair.a,
                a_layout: Layout::ContractedLast,
                conj_a: false,
                b: pair.b,
                b_layout: Layout::ContractedFirst,
                conj_b: false,
                signature,
                beta: T::zero(),
                c,
            })?;
            Ok((i, args))
        })
        .collect::<Result<Vec<_>>>()?;
    calls.sort_by_key(|(_, args)| Reverse(args.flops()));
    debug!(pairs = calls.len(), routine = signature.routine().name(), parallel = options.parallel; "contracting block pairs");

    let mut statuses: Vec<(usize, KernelResult)> = if options.parallel {
        calls.into_par_iter().map(|(i, args)| (i, args.call(kernel))).collect()
    } else {
        calls.into_iter().map(|(i, args)| (i, args.call(kernel))).collect()
    };
    statuses.sort_by_key(|(i, _)| *i);

    let mut failures = Vec::new();
    let mut ok = vec![true; pairs.len()];
    for (i, status) in statuses {
        if let Err(status) = status {
            ok[i] = false;
            failures.push(KernelFailure::new(pairs[i].out.to_vec(), status));
        }
    }

    // Serial reduction in pair order keeps results independent of scheduling.
    let legs = vec![plan.free_a.merged_leg(), plan.free_b.merged_leg()];
    let mut merged = SymmetricArray::new(legs, a.target().compose(b.target()));
    for (i, pair) in pairs.iter().enumerate() {
        if !ok[i] {
            continue;
        }
        let dst = merged.allocate(&pair.out)?;
        let args = ArgList::build(Request::Axpy {
            alpha: T::one(),
            x: &buffers[i],
            conj: false,
            y: dst,
        })?;
        run(args, kernel, &pair.out, &mut failures);
    }
    trace!(blocks = merged.num_blocks(); "reduced partial products");

    let mut out = split_matrix_with(&merged, &plan.free_a, &plan.free_b, options.prune_zeros)?;
    if options.compact_sectors {
        out = out.compact_sectors()?;
    }
    debug!(blocks = out.num_blocks(), failures = failures.len(); "contraction done");
    Ok(Outcome::new(out, failures))
}

/// `c <- alpha * A · B + beta * c`.
///
/// `c` must have the legs and target [`contract`] would produce. The update
/// is staged on a copy-on-write clone of `c` and swapped in only when every
/// kernel call succeeded; otherwise `c` is unchanged and the failures are
/// returned. With `beta == 0` the old content of `c` is not read.
#[allow(clippy::too_many_arguments)]
pub fn contract_into<T, Q, K>(
    alpha: T,
    a: &SymmetricArray<T, Q>,
    axes_a: &[usize],
    b: &SymmetricArray<T, Q>,
    axes_b: &[usize],
    beta: T,
    c: &mut SymmetricArray<T, Q>,
    kernel: &K,
    options: &ContractOptions,
) -> Result<Outcome<()>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let options = options.with_compact_sectors(false);
    let product = contract(alpha, a, axes_a, b, axes_b, kernel, &options)?;
    if !product.is_clean() {
        return Ok(Outcome::new((), product.failures));
    }
    let product = product.value;
    check_same_space(&product, c)?;

    let mut staged = if beta == T::zero() {
        SymmetricArray::new(c.legs().to_vec(), c.target().clone())
    } else {
        c.clone()
    };
    let mut failures = Vec::new();
    if beta != T::zero() && beta != T::one() {
        failures.extend(ops::scale(beta, &mut staged, kernel)?.failures);
    }
    failures.extend(ops::axpy(T::one(), &product, &mut staged, kernel)?.failures);
    if failures.is_empty() {
        if options.prune_zeros {
            staged.prune_empty();
        }
        *c = staged;
    }
    Ok(Outcome::new((), failures))
}

/// Contraction by leg labels, einsum style.
///
/// Each character of `labels_a`/`labels_b` names one leg. Labels shared by
/// both operands are contracted; `labels_c` lists the remaining labels in
/// the order the result should have.
///
/// ```
/// use qnblock::{contract_indexed, shape_of, ContractOptions, FaerKernel, Leg, SymmetricArray, U1};
///
/// let s = shape_of([(U1(0), 2), (U1(1), 1)]).unwrap();
/// let mut a = SymmetricArray::<f64, U1>::zeros(vec![Leg::plus(s.clone()), Leg::minus(s.clone())], U1(0)).unwrap();
/// a.for_each_block_mut(|_, block| block.fill(1.0));
/// let b = a.conj().unwrap();
/// let c = contract_indexed(1.0, &a, "ij", &b, "kj", "ki", &FaerKernel, &ContractOptions::default())
///     .unwrap()
///     .into_result()
///     .unwrap();
/// assert_eq!(c.rank(), 2);
/// ```
#[allow(clippy::too_many_arguments)]
pub fn contract_indexed<T, Q, K>(
    alpha: T,
    a: &SymmetricArray<T, Q>,
    labels_a: &str,
    b: &SymmetricArray<T, Q>,
    labels_b: &str,
    labels_c: &str,
    kernel: &K,
    options: &ContractOptions,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let la = distinct_labels(labels_a, a.rank(), "left")?;
    let lb = distinct_labels(labels_b, b.rank(), "right")?;
    let lc = distinct_labels(labels_c, labels_c.chars().count(), "output")?;

    let mut axes_a = Vec::new();
    let mut axes_b = Vec::new();
    for (i, ch) in la.iter().enumerate() {
        if let Some(j) = lb.iter().position(|x| x == ch) {
            axes_a.push(i);
            axes_b.push(j);
        }
    }
    let natural: Vec<char> = la
        .iter()
        .filter(|ch| !lb.contains(ch))
        .chain(lb.iter().filter(|ch| !la.contains(ch)))
        .copied()
        .collect();
    if lc.len() != natural.len() || lc.iter().any(|ch| !natural.contains(ch)) {
        return Err(QnError::InvalidAxes(format!(
            "output labels {labels_c:?} must be a permutation of the free labels {:?}",
            natural.iter().collect::<String>()
        )));
    }
    let perm: Vec<usize> = lc
        .iter()
        .filter_map(|ch| natural.iter().position(|x| x == ch))
        .collect();

    let product = contract(alpha, a, &axes_a, b, &axes_b, kernel, options)?;
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return Ok(product);
    }
    let Outcome { value, mut failures } = product;
    let permuted = ops::permute(&value, &perm, kernel)?;
    failures.extend(permuted.failures);
    Ok(Outcome::new(permuted.value, failures))
}

fn distinct_labels(labels: &str, rank: usize, operand: &str) -> Result<Vec<char>> {
    let chars: Vec<char> = labels.chars().collect();
    if chars.len() != rank {
        return Err(QnError::InvalidAxes(format!(
            "{operand} labels {labels:?} do not match rank {rank}"
        )));
    }
    for (i, ch) in chars.iter().enumerate() {
        if chars[..i].contains(ch) {
            return Err(QnError::InvalidAxes(format!("{operand} label {ch:?} repeated")));
        }
    }
    Ok(chars)
}
