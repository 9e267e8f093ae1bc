//! Blockwise BLAS-level operations on symmetric arrays.
//!
//! Every numerical step is an [`ArgList`] handed to the supplied kernel.
//! In-place operations work on a copy-on-write stage and replace the
//! destination only when every kernel call succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use qnblock_dense::{extents, DenseBlock, Extents, Scalar};

use crate::arglist::{ArgList, Layout, RankSignature, Request};
use crate::error::{QnError, Result};
use crate::kernel::{KernelFailure, LinalgKernel, Outcome};
use crate::qshape::{Leg, QuantumShape};
use crate::quantum::QuantumLabel;
use crate::sym_array::SymmetricArray;

/// Call `args`, recording a failure against `block`. Returns true on success.
pub(crate) fn run<T: Scalar, K: LinalgKernel<T> + ?Sized>(
    args: ArgList<'_, T>,
    kernel: &K,
    block: &[usize],
    failures: &mut Vec<KernelFailure>,
) -> bool {
    match args.call(kernel) {
        Ok(()) => true,
        Err(status) => {
            failures.push(KernelFailure::new(block, status));
            false
        }
    }
}

/// Both arrays live in the same space: equal legs and equal targets.
pub(crate) fn check_same_space<T: Scalar, Q: QuantumLabel>(
    x: &SymmetricArray<T, Q>,
    y: &SymmetricArray<T, Q>,
) -> Result<()> {
    if x.rank() != y.rank() {
        return Err(QnError::RankMismatch {
            expected: x.rank(),
            actual: y.rank(),
        });
    }
    for (axis, (l, r)) in x.legs().iter().zip(y.legs()).enumerate() {
        if l != r {
            return Err(QnError::LegMismatch {
                left: axis,
                right: axis,
                reason: format!("{}{} vs {}{}", l.sign(), l.shape(), r.sign(), r.shape()),
            });
        }
    }
    if x.target() != y.target() {
        return Err(QnError::TargetMismatch {
            left: x.target().to_string(),
            right: y.target().to_string(),
        });
    }
    Ok(())
}

/// `x <- alpha * x`
pub fn scale<T, Q, K>(alpha: T, x: &mut SymmetricArray<T, Q>, kernel: &K) -> Result<Outcome<()>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let mut staged = x.clone();
    let mut failures = Vec::new();
    for (coords, block) in staged.dense_mut().iter_mut() {
        let args = ArgList::build(Request::Scale { alpha, x: block })?;
        run(args, kernel, &coords, &mut failures);
    }
    if failures.is_empty() {
        *x = staged;
    }
    Ok(Outcome::new((), failures))
}

/// Deep copy of `x` through the kernel's copy routine.
///
/// Blocks whose copy failed are absent from the result.
pub fn copy<T, Q, K>(x: &SymmetricArray<T, Q>, kernel: &K) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let mut y = SymmetricArray::new(x.legs().to_vec(), x.target().clone());
    let mut failures = Vec::new();
    for (coords, block) in x.blocks() {
        let dst = y.allocate(&coords)?;
        let args = ArgList::build(Request::Copy {
            x: block,
            conj: false,
            y: dst,
        })?;
        if !run(args, kernel, &coords, &mut failures) {
            y.remove_block(&coords);
        }
    }
    Ok(Outcome::new(y, failures))
}

/// `y <- alpha * x + y`
///
/// Blocks stored in `x` but not in `y` are allocated in `y` first.
///
/// # Errors
/// `RankMismatch`, `LegMismatch` or `TargetMismatch` when the arrays live in
/// different spaces; `ResourceExhaustion` when a block cannot be allocated.
/// `y` is unchanged on error.
pub fn axpy<T, Q, K>(
    alpha: T,
    x: &SymmetricArray<T, Q>,
    y: &mut SymmetricArray<T, Q>,
    kernel: &K,
) -> Result<Outcome<()>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    check_same_space(x, y)?;
    let mut staged = y.clone();
    let mut failures = Vec::new();
    for (coords, block) in x.blocks() {
        let dst = staged.allocate(&coords)?;
        let args = ArgList::build(Request::Axpy {
            alpha,
            x: block,
            conj: false,
            y: dst,
        })?;
        run(args, kernel, &coords, &mut failures);
    }
    if failures.is_empty() {
        *y = staged;
    }
    Ok(Outcome::new((), failures))
}

/// `<x|y>`, conjugating `x`.
///
/// Only blocks stored in both arrays contribute.
pub fn dot<T, Q, K>(x: &SymmetricArray<T, Q>, y: &SymmetricArray<T, Q>, kernel: &K) -> Result<Outcome<T>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    check_same_space(x, y)?;
    let mut acc = DenseBlock::<T>::zeros(&[]);
    let mut failures = Vec::new();
    let signature = RankSignature::new(0, x.rank(), 0);
    for (coords, a) in x.blocks() {
        let Some(b) = y.at(&coords) else {
            continue;
        };
        let args = ArgList::build(Request::Contract {
            alpha: T::one(),
            a,
            a_layout: Layout::ContractedLast,
            conj_a: true,
            b,
            b_layout: Layout::ContractedFirst,
            conj_b: false,
            signature,
            beta: T::one(),
            c: &mut acc,
        })?;
        run(args, kernel, &coords, &mut failures);
    }
    Ok(Outcome::new(acc.get(&[]), failures))
}

/// Frobenius norm.
pub fn norm<T, Q, K>(x: &SymmetricArray<T, Q>, kernel: &K) -> Result<Outcome<f64>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    Ok(dot(x, x, kernel)?.map(|v| v.real_f64().max(0.0).sqrt()))
}

/// `x <- x / |x|`, returning the norm `x` had before.
///
/// A zero array is left as it is. `x` is unchanged when a kernel call fails.
pub fn normalize<T, Q, K>(x: &mut SymmetricArray<T, Q>, kernel: &K) -> Result<Outcome<f64>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let Outcome { value: n, mut failures } = norm(x, kernel)?;
    if !failures.is_empty() || n == 0.0 {
        return Ok(Outcome::new(n, failures));
    }
    failures.extend(scale(T::from_f64(n.recip()), x, kernel)?.failures);
    Ok(Outcome::new(n, failures))
}

/// Remove the component of `x` along `basis`:
/// `x <- x - (<basis|x> / <basis|basis>) * basis`.
///
/// Returns the coefficient that was removed; a zero `basis` removes nothing.
/// `x` is unchanged when a kernel call fails.
pub fn orthogonalize<T, Q, K>(
    basis: &SymmetricArray<T, Q>,
    x: &mut SymmetricArray<T, Q>,
    kernel: &K,
) -> Result<Outcome<T>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    let Outcome { value: overlap, mut failures } = dot(basis, x, kernel)?;
    let Outcome { value: weight, failures: more } = dot(basis, basis, kernel)?;
    failures.extend(more);
    let weight = weight.real_f64();
    if !failures.is_empty() || weight == 0.0 {
        return Ok(Outcome::new(T::zero(), failures));
    }
    let coef = overlap * T::from_f64(weight.recip());
    failures.extend(axpy(-coef, basis, x, kernel)?.failures);
    Ok(Outcome::new(coef, failures))
}

/// Direct sum of `x` and `y`.
///
/// Axes listed in `shared` must carry equal legs and are kept as they are.
/// On every other axis the sectors of both legs are joined: a label present
/// in either leg gets the sizes of both, `x` first. Blocks of `x` sit at the
/// start of each joined sector and blocks of `y` after the `x` part, so the
/// dense result is block-diagonal in the summed axes.
///
/// # Errors
/// `RankMismatch`, `TargetMismatch` or `LegMismatch` (different signs, or a
/// shared leg that differs); `InvalidAxes` for a bad `shared` list.
pub fn dsum<T, Q, K>(
    x: &SymmetricArray<T, Q>,
    y: &SymmetricArray<T, Q>,
    shared: &[usize],
    kernel: &K,
) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    if x.rank() != y.rank() {
        return Err(QnError::RankMismatch {
            expected: x.rank(),
            actual: y.rank(),
        });
    }
    if x.target() != y.target() {
        return Err(QnError::TargetMismatch {
            left: x.target().to_string(),
            right: y.target().to_string(),
        });
    }
    for (i, &axis) in shared.iter().enumerate() {
        if axis >= x.rank() || shared[..i].contains(&axis) {
            return Err(QnError::InvalidAxes(format!(
                "shared axes {shared:?} are not distinct axes below {}",
                x.rank()
            )));
        }
    }

    let mut legs = Vec::with_capacity(x.rank());
    for (axis, (l, r)) in x.legs().iter().zip(y.legs()).enumerate() {
        let mismatch = |reason: &str| QnError::LegMismatch {
            left: axis,
            right: axis,
            reason: format!("{reason}: {}{} vs {}{}", l.sign(), l.shape(), r.sign(), r.shape()),
        };
        if l.sign() != r.sign() {
            return Err(mismatch("signs differ"));
        }
        if shared.contains(&axis) {
            if l != r {
                return Err(mismatch("shared legs differ"));
            }
            legs.push(l.clone());
            continue;
        }
        let mut sizes: BTreeMap<Q, usize> = BTreeMap::new();
        for sector in l.shape().sectors().iter().chain(r.shape().sectors()) {
            *sizes.entry(sector.label.clone()).or_default() += sector.size;
        }
        legs.push(Leg::new(Arc::new(QuantumShape::from_size_map(sizes)), l.sign()));
    }

    let mut z = SymmetricArray::new(legs, x.target().clone());
    let mut failures = Vec::new();
    place_summand(x, &mut z, |_, _| 0, kernel, &mut failures)?;
    place_summand(
        y,
        &mut z,
        |axis, label| {
            if shared.contains(&axis) {
                return 0;
            }
            let leg = x.leg(axis);
            leg.shape().position(label).map_or(0, |i| leg.size(i))
        },
        kernel,
        &mut failures,
    )?;
    debug!(blocks = z.num_blocks(), shared = shared.len(); "direct sum");
    Ok(Outcome::new(z, failures))
}

/// Copy every block of `src` into `z` at the offsets `offset(axis, label)`
/// within the matching sectors of `z`.
fn place_summand<T, Q, K>(
    src: &SymmetricArray<T, Q>,
    z: &mut SymmetricArray<T, Q>,
    offset: impl Fn(usize, &Q) -> usize,
    kernel: &K,
    failures: &mut Vec<KernelFailure>,
) -> Result<()>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    for (coords, block) in src.blocks() {
        let mut dst_coords = Extents::new();
        let mut offsets = Extents::new();
        for (axis, &c) in coords.iter().enumerate() {
            let label = src.leg(axis).shape().label(c);
            let position = z.leg(axis).shape().position(label).ok_or_else(|| {
                QnError::MergeMismatch(format!("sector {label} missing from the summed leg {axis}"))
            })?;
            dst_coords.push(position);
            offsets.push(offset(axis, label));
        }
        let mut piece = DenseBlock::try_zeros(block.extents())?;
        let args = ArgList::build(Request::Copy {
            x: block,
            conj: false,
            y: &mut piece,
        })?;
        if run(args, kernel, &dst_coords, failures) {
            z.allocate(&dst_coords)?.insert_region(&offsets, &piece)?;
        }
    }
    Ok(())
}

/// Reorder legs: leg `i` of the result is leg `perm[i]` of `x`.
///
/// Conservation is unaffected because label composition is commutative.
pub fn permute<T, Q, K>(x: &SymmetricArray<T, Q>, perm: &[usize], kernel: &K) -> Result<Outcome<SymmetricArray<T, Q>>>
where
    T: Scalar,
    Q: QuantumLabel,
    K: LinalgKernel<T> + ?Sized,
{
    extents::check_permutation(perm, x.rank())
        .map_err(|_| QnError::InvalidAxes(format!("{perm:?} is not a permutation of rank {}", x.rank())))?;
    let legs = perm.iter().map(|&p| x.leg(p).clone()).collect();
    let mut y = SymmetricArray::new(legs, x.target().clone());
    let mut failures = Vec::new();
    for (coords, block) in x.blocks() {
        let moved = extents::permuted(&coords, perm);
        let dst = y.allocate(&moved)?;
        let args = ArgList::build(Request::Permute { x: block, perm, y: dst })?;
        if !run(args, kernel, &coords, &mut failures) {
            y.remove_block(&moved);
        }
    }
    debug!(blocks = y.num_blocks(), rank = perm.len(); "permuted array");
    Ok(Outcome::new(y, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FaerKernel;
    use crate::qshape::Leg;
    use crate::quantum::U1;
    use crate::sym_array::shape_of;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn legs3() -> Vec<Leg<U1>> {
        let a = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
        let b = shape_of([(U1(-1), 1), (U1(0), 2), (U1(1), 2)]).unwrap();
        vec![Leg::plus(a.clone()), Leg::plus(b), Leg::minus(a)]
    }

    fn random(seed: u64) -> SymmetricArray<f64, U1> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        SymmetricArray::random(legs3(), U1(0), &mut rng).unwrap()
    }

    #[test]
    fn test_scale_and_norm() {
        let mut x = random(1);
        let n0 = norm(&x, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(n0, x.norm_sqr().sqrt(), epsilon = 1e-12);
        scale(-2.0, &mut x, &FaerKernel).unwrap().into_result().unwrap();
        let n1 = norm(&x, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(n1, 2.0 * n0, epsilon = 1e-12);
    }

    #[test]
    fn test_copy_is_deep() {
        let x = random(2);
        let y = copy(&x, &FaerKernel).unwrap().into_result().unwrap();
        assert!(y.approx_eq(&x, 0.0));
        for (_, block) in y.blocks() {
            assert!(!block.is_shared());
        }
    }

    #[test]
    fn test_axpy_allocates_missing_blocks() {
        let x = random(3);
        let mut y = SymmetricArray::new(legs3(), U1(0));
        axpy(3.0, &x, &mut y, &FaerKernel).unwrap().into_result().unwrap();
        assert_eq!(y.num_blocks(), x.num_blocks());
        let dense_x = x.to_dense().unwrap();
        let dense_y = y.to_dense().unwrap();
        for (a, b) in dense_x.as_slice().iter().zip(dense_y.as_slice()) {
            assert_abs_diff_eq!(3.0 * a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_axpy_rejects_other_space() {
        let x = random(4);
        let mut y = SymmetricArray::new(legs3(), U1(1));
        assert!(matches!(
            axpy(1.0, &x, &mut y, &FaerKernel),
            Err(QnError::TargetMismatch { .. })
        ));
        let mut legs = legs3();
        legs[0] = legs[0].flipped();
        let mut z = SymmetricArray::new(legs, U1(0));
        assert!(matches!(
            axpy(1.0, &x, &mut z, &FaerKernel),
            Err(QnError::LegMismatch { left: 0, .. })
        ));
        assert_eq!(z.num_blocks(), 0);
    }

    #[test]
    fn test_dot_conjugates_left() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let x: SymmetricArray<Complex64, U1> = SymmetricArray::random(legs3(), U1(0), &mut rng).unwrap();
        let y: SymmetricArray<Complex64, U1> = SymmetricArray::random(legs3(), U1(0), &mut rng).unwrap();
        let xy = dot(&x, &y, &FaerKernel).unwrap().into_result().unwrap();
        let yx = dot(&y, &x, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(xy.re, yx.re, epsilon = 1e-12);
        assert_abs_diff_eq!(xy.im, -yx.im, epsilon = 1e-12);

        let dx = x.to_dense().unwrap();
        let dy = y.to_dense().unwrap();
        let expected: Complex64 = dx.as_slice().iter().zip(dy.as_slice()).map(|(a, b)| a.conj() * b).sum();
        assert_abs_diff_eq!(xy.re, expected.re, epsilon = 1e-10);
        assert_abs_diff_eq!(xy.im, expected.im, epsilon = 1e-10);
    }

    #[test]
    fn test_permute_matches_dense() {
        let x = random(6);
        let perm = [2, 0, 1];
        let y = permute(&x, &perm, &FaerKernel).unwrap().into_result().unwrap();
        y.check_invariants().unwrap();
        assert_eq!(y.leg(0), x.leg(2));
        let expected = x.to_dense().unwrap().permute(&perm).unwrap();
        assert!(y.to_dense().unwrap().approx_eq(&expected, 0.0));
    }

    #[test]
    fn test_normalize_and_orthogonalize() {
        let mut x = random(8);
        let n0 = x.norm_sqr().sqrt();
        let n = normalize(&mut x, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(n, n0, epsilon = 1e-12);
        assert_abs_diff_eq!(x.norm_sqr(), 1.0, epsilon = 1e-12);

        let mut y = random(9);
        let before = dot(&x, &y, &FaerKernel).unwrap().into_result().unwrap();
        let coef = orthogonalize(&x, &mut y, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(coef, before, epsilon = 1e-12);
        let after = dot(&x, &y, &FaerKernel).unwrap().into_result().unwrap();
        assert_abs_diff_eq!(after, 0.0, epsilon = 1e-12);

        let mut zero = SymmetricArray::<f64, U1>::new(legs3(), U1(0));
        assert_eq!(normalize(&mut zero, &FaerKernel).unwrap().into_result().unwrap(), 0.0);
        let untouched = y.clone();
        let coef = orthogonalize(&zero, &mut y, &FaerKernel).unwrap().into_result().unwrap();
        assert_eq!(coef, 0.0);
        assert!(y.approx_eq(&untouched, 0.0));
    }

    #[test]
    fn test_dsum_places_summands_diagonally() {
        let x = random(10);
        let small = vec![
            Leg::plus(shape_of([(U1(1), 1), (U1(2), 2)]).unwrap()),
            Leg::plus(shape_of([(U1(0), 1)]).unwrap()),
            Leg::minus(shape_of([(U1(1), 1), (U1(2), 1)]).unwrap()),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let y = SymmetricArray::<f64, U1>::random(small, U1(0), &mut rng).unwrap();

        let z = dsum(&x, &y, &[], &FaerKernel).unwrap().into_result().unwrap();
        z.check_invariants().unwrap();
        let labels: Vec<_> = z.leg(0).shape().labels().copied().collect();
        assert_eq!(labels, vec![U1(0), U1(1), U1(2)]);
        assert_eq!(z.leg(0).shape().size(1), 4);

        let dz = z.to_dense().unwrap();
        let dx = x.to_dense().unwrap();
        let dy = y.to_dense().unwrap();
        assert_eq!(dz.extents(), &[dx.extents()[0] + dy.extents()[0], 6, 7]);
        // each summand reads back from its own slots of every joined sector
        for (src, dense, second) in [(&x, &dx, false), (&y, &dy, true)] {
            let map: Vec<Vec<usize>> = (0..3)
                .map(|axis| {
                    let leg = src.leg(axis);
                    (0..leg.num_sectors())
                        .flat_map(|c| {
                            let label = leg.shape().label(c);
                            let zi = z.leg(axis).shape().position(label).unwrap();
                            let skip = if second {
                                x.leg(axis).shape().position(label).map_or(0, |i| x.leg(axis).size(i))
                            } else {
                                0
                            };
                            let start = z.leg(axis).shape().offset(zi) + skip;
                            start..start + leg.size(c)
                        })
                        .collect()
                })
                .collect();
            for idx in qnblock_dense::IndexedLoop::new(dense.extents()) {
                let at: Vec<usize> = idx.iter().enumerate().map(|(axis, &i)| map[axis][i]).collect();
                assert_eq!(dz.get(&at), dense.get(&idx));
            }
        }
        let total = x.norm_sqr() + y.norm_sqr();
        assert_abs_diff_eq!(z.norm_sqr(), total, epsilon = 1e-12);
    }

    #[test]
    fn test_dsum_shared_axes() {
        let x = random(12);
        let y = random(13);
        let z = dsum(&x, &y, &[1], &FaerKernel).unwrap().into_result().unwrap();
        assert_eq!(z.leg(1), x.leg(1));
        assert_eq!(z.leg(0).dim(), 2 * x.leg(0).dim());

        let other = SymmetricArray::<f64, U1>::new(legs3(), U1(1));
        assert!(matches!(dsum(&x, &other, &[], &FaerKernel), Err(QnError::TargetMismatch { .. })));
        let mut legs = legs3();
        legs[1] = Leg::plus(shape_of([(U1(0), 1)]).unwrap());
        let narrow = SymmetricArray::<f64, U1>::new(legs, U1(0));
        assert!(matches!(dsum(&x, &narrow, &[1], &FaerKernel), Err(QnError::LegMismatch { left: 1, .. })));
        assert!(matches!(dsum(&x, &y, &[1, 1], &FaerKernel), Err(QnError::InvalidAxes(_))));
    }

    #[test]
    fn test_permute_rejects_bad_perm() {
        let x = random(7);
        assert!(matches!(
            permute(&x, &[0, 0, 1], &FaerKernel),
            Err(QnError::InvalidAxes(_))
        ));
    }
}
