//! Linear-algebra kernel interface and the faer-backed implementation.

use std::borrow::Cow;

use faer::linalg::matmul::matmul as faer_matmul;
use faer::linalg::solvers::Solve;
use faer::{Accum, Par, Side};
use log::trace;
use mdarray::{DSlice, DTensor};
use mdarray_linalg::svd::SVD;
use mdarray_linalg_faer::Faer;
use qnblock_dense::{IndexedLoop, Scalar};
use thiserror::Error;

use crate::arglist::{
    AxpyArgs, CopyArgs, DotArgs, EigArgs, GemmArgs, GemvArgs, GerArgs, MatMut, MatRef, PermuteArgs, Routine,
    ScaleArgs, SolveArgs, SolveKind, SvdArgs, VecRef,
};

/// Diagnostic returned by a kernel routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{routine} returned status {code}: {message}")]
pub struct KernelStatus {
    pub routine: Routine,
    pub code: i32,
    pub message: String,
}

impl KernelStatus {
    pub fn new(routine: Routine, code: i32, message: impl Into<String>) -> Self {
        Self {
            routine,
            code,
            message: message.into(),
        }
    }
}

/// A kernel failure attributed to the block it was computing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block {block:?}: {status}")]
pub struct KernelFailure {
    pub routine: Routine,
    /// Block coordinate (of the output, or of the merged block being factorised).
    pub block: Vec<usize>,
    pub status: KernelStatus,
}

pub type KernelResult = std::result::Result<(), KernelStatus>;

impl KernelFailure {
    pub fn new(block: impl Into<Vec<usize>>, status: KernelStatus) -> Self {
        Self {
            routine: status.routine,
            block: block.into(),
            status,
        }
    }
}

/// Result of an operation that keeps going past kernel failures.
///
/// Blocks whose kernel call failed are missing from (or unchanged in)
/// `value`; every other block is fully computed.
#[derive(Debug, Clone)]
#[must_use]
pub struct Outcome<R> {
    pub value: R,
    pub failures: Vec<KernelFailure>,
}

impl<R> Outcome<R> {
    pub fn new(value: R, failures: Vec<KernelFailure>) -> Self {
        Self { value, failures }
    }

    pub fn clean(value: R) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> Outcome<U> {
        Outcome::new(f(self.value), self.failures)
    }

    /// The value, or [`KernelFailures`](crate::QnError::KernelFailures) if any kernel call failed.
    pub fn into_result(self) -> crate::error::Result<R> {
        if self.failures.is_empty() {
            Ok(self.value)
        } else {
            Err(crate::error::QnError::KernelFailures(self.failures))
        }
    }
}

/// Fixed-signature linear-algebra routines.
///
/// One method per routine family. Implementations must not retain the
/// borrowed operands beyond the call.
pub trait LinalgKernel<T: Scalar>: Send + Sync {
    fn copy(&self, args: CopyArgs<'_, T>) -> KernelResult;
    fn scale(&self, args: ScaleArgs<'_, T>) -> KernelResult;
    fn axpy(&self, args: AxpyArgs<'_, T>) -> KernelResult;
    fn permute(&self, args: PermuteArgs<'_, T>) -> KernelResult;
    fn gemm(&self, args: GemmArgs<'_, T>) -> KernelResult;
    fn gemv(&self, args: GemvArgs<'_, T>) -> KernelResult;
    fn ger(&self, args: GerArgs<'_, T>) -> KernelResult;
    fn dot(&self, args: DotArgs<'_, T>) -> KernelResult;
    fn svd(&self, args: SvdArgs<'_, T>) -> KernelResult;
    fn eig(&self, args: EigArgs<'_, T>) -> KernelResult;
    fn solve(&self, args: SolveArgs<'_, T>) -> KernelResult;
}

/// Kernel backed by faer (matrix products, eigensolver and linear solves)
/// and mdarray-linalg-faer (SVD).
///
/// Each call runs sequentially; parallelism is applied across blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerKernel;

const BAD_OPERAND: i32 = -1;
const BAD_SHAPE: i32 = -2;
const NO_CONVERGENCE: i32 = 1;
pub(crate) const SINGULAR: i32 = 2;

fn check(routine: Routine, ok: bool, what: &str) -> KernelResult {
    if ok {
        Ok(())
    } else {
        Err(KernelStatus::new(routine, BAD_OPERAND, format!("{what} does not fit its buffer")))
    }
}

/// Operand data with any requested conjugation applied.
fn conjugated<'a, T: Scalar>(data: &'a [T], conj: bool) -> Cow<'a, [T]> {
    if conj && T::is_complex_type() {
        Cow::Owned(data.iter().map(|x| x.conjugate()).collect())
    } else {
        Cow::Borrowed(data)
    }
}

/// faer view of `op(A)` without its conjugation (see [`conjugated`]).
///
/// # Safety
/// `data` must cover the footprint described by `a` (checked with `fits`).
unsafe fn op_view<'a, T: Scalar>(data: &'a [T], a: &MatRef<'_, T>) -> faer::MatRef<'a, T> {
    let ld = a.ld as isize;
    if a.op.is_trans() {
        faer::MatRef::from_raw_parts(data.as_ptr(), a.cols, a.rows, 1, ld)
    } else {
        faer::MatRef::from_raw_parts(data.as_ptr(), a.rows, a.cols, ld, 1)
    }
}

/// Apply `beta` to the destination and pick the matching accumulation mode.
fn prepare_output<T: Scalar>(c: &mut MatMut<'_, T>, beta: T) -> Accum {
    if beta == T::zero() {
        return Accum::Replace;
    }
    if beta != T::one() {
        for i in 0..c.rows {
            for x in &mut c.data[i * c.ld..i * c.ld + c.cols] {
                *x = *x * beta;
            }
        }
    }
    Accum::Add
}

impl<T: Scalar> LinalgKernel<T> for FaerKernel {
    fn copy(&self, args: CopyArgs<'_, T>) -> KernelResult {
        let CopyArgs { x, y } = args;
        check(Routine::Copy, x.fits() && y.fits() && x.len == y.len, "copy operand")?;
        for i in 0..x.len {
            y.data[i * y.inc] = x.at(i);
        }
        Ok(())
    }

    fn scale(&self, args: ScaleArgs<'_, T>) -> KernelResult {
        let ScaleArgs { alpha, x } = args;
        check(Routine::Scale, x.fits(), "scal operand")?;
        for i in 0..x.len {
            let v = &mut x.data[i * x.inc];
            *v = *v * alpha;
        }
        Ok(())
    }

    fn axpy(&self, args: AxpyArgs<'_, T>) -> KernelResult {
        let AxpyArgs { alpha, x, y } = args;
        check(Routine::Axpy, x.fits() && y.fits() && x.len == y.len, "axpy operand")?;
        for i in 0..x.len {
            let v = &mut y.data[i * y.inc];
            *v = *v + alpha * x.at(i);
        }
        Ok(())
    }

    fn permute(&self, args: PermuteArgs<'_, T>) -> KernelResult {
        let PermuteArgs {
            x,
            x_strides,
            extents,
            y,
            y_strides,
        } = args;
        for idx in IndexedLoop::new(&extents) {
            let src: usize = idx.iter().zip(&x_strides).map(|(i, s)| i * s).sum();
            let dst: usize = idx.iter().zip(&y_strides).map(|(i, s)| i * s).sum();
            let (Some(&value), Some(slot)) = (x.get(src), y.get_mut(dst)) else {
                return Err(KernelStatus::new(Routine::Permute, BAD_OPERAND, "stride walks past buffer"));
            };
            *slot = value;
        }
        Ok(())
    }

    fn gemm(&self, args: GemmArgs<'_, T>) -> KernelResult {
        let GemmArgs {
            alpha,
            a,
            b,
            beta,
            mut c,
        } = args;
        check(Routine::Gemm, a.fits() && b.fits() && c.fits(), "gemm operand")?;
        let (m, k, n) = (a.op_rows(), a.op_cols(), b.op_cols());
        if b.op_rows() != k || c.rows != m || c.cols != n {
            return Err(KernelStatus::new(
                Routine::Gemm,
                BAD_SHAPE,
                format!("op(A) {m}x{k}, op(B) {}x{n}, C {}x{}", b.op_rows(), c.rows, c.cols),
            ));
        }
        if m == 0 || n == 0 {
            return Ok(());
        }
        trace!(m, n, k; "gemm");
        let accum = prepare_output(&mut c, beta);
        let a_data = conjugated(a.data, a.op.is_conj());
        let b_data = conjugated(b.data, b.op.is_conj());
        // Footprints were checked by `fits`; conjugated copies have the same length.
        let a_mat = unsafe { op_view(&a_data, &a) };
        let b_mat = unsafe { op_view(&b_data, &b) };
        let mut c_mat = unsafe { faer::MatMut::from_raw_parts_mut(c.data.as_mut_ptr(), m, n, c.ld as isize, 1) };
        faer_matmul(&mut c_mat, accum, a_mat, b_mat, alpha, Par::Seq);
        Ok(())
    }

    fn gemv(&self, args: GemvArgs<'_, T>) -> KernelResult {
        let GemvArgs {
            alpha,
            a,
            x,
            beta,
            y,
        } = args;
        check(Routine::Gemv, a.fits() && x.fits() && y.fits(), "gemv operand")?;
        let (m, k) = (a.op_rows(), a.op_cols());
        if x.len != k || y.len != m {
            return Err(KernelStatus::new(
                Routine::Gemv,
                BAD_SHAPE,
                format!("op(A) {m}x{k}, x {}, y {}", x.len, y.len),
            ));
        }
        if m == 0 {
            return Ok(());
        }
        let mut y_mat = MatMut {
            data: y.data,
            rows: m,
            cols: 1,
            ld: y.inc,
        };
        let accum = prepare_output(&mut y_mat, beta);
        let a_data = conjugated(a.data, a.op.is_conj());
        let x_data = contiguous(&x);
        let a_mat = unsafe { op_view(&a_data, &a) };
        let x_mat = unsafe { faer::MatRef::from_raw_parts(x_data.as_ptr(), k, 1, 1, 1) };
        let mut y_view = unsafe { faer::MatMut::from_raw_parts_mut(y_mat.data.as_mut_ptr(), m, 1, y_mat.ld as isize, 1) };
        faer_matmul(&mut y_view, accum, a_mat, x_mat, alpha, Par::Seq);
        Ok(())
    }

    fn ger(&self, args: GerArgs<'_, T>) -> KernelResult {
        let GerArgs {
            alpha,
            x,
            y,
            beta,
            mut a,
        } = args;
        check(Routine::Ger, x.fits() && y.fits() && a.fits(), "ger operand")?;
        let (m, n) = (x.len, y.len);
        if a.rows != m || a.cols != n {
            return Err(KernelStatus::new(
                Routine::Ger,
                BAD_SHAPE,
                format!("x {m}, y {n}, A {}x{}", a.rows, a.cols),
            ));
        }
        if m == 0 || n == 0 {
            return Ok(());
        }
        let accum = prepare_output(&mut a, beta);
        let x_data = contiguous(&x);
        let y_data = contiguous(&y);
        let x_mat = unsafe { faer::MatRef::from_raw_parts(x_data.as_ptr(), m, 1, 1, 1) };
        let y_mat = unsafe { faer::MatRef::from_raw_parts(y_data.as_ptr(), 1, n, n as isize, 1) };
        let mut a_mat = unsafe { faer::MatMut::from_raw_parts_mut(a.data.as_mut_ptr(), m, n, a.ld as isize, 1) };
        faer_matmul(&mut a_mat, accum, x_mat, y_mat, alpha, Par::Seq);
        Ok(())
    }

    fn dot(&self, args: DotArgs<'_, T>) -> KernelResult {
        let DotArgs {
            alpha,
            x,
            y,
            beta,
            out,
        } = args;
        check(Routine::Dot, x.fits() && y.fits() && x.len == y.len, "dot operand")?;
        let sum = (0..x.len).fold(T::zero(), |acc, i| acc + x.at(i) * y.at(i));
        *out = if beta == T::zero() {
            alpha * sum
        } else {
            alpha * sum + beta * *out
        };
        Ok(())
    }

    fn svd(&self, args: SvdArgs<'_, T>) -> KernelResult {
        let SvdArgs { a, u, s, vt } = args;
        check(Routine::Svd, a.fits() && u.fits() && vt.fits(), "gesvd operand")?;
        let (m, n) = (a.op_rows(), a.op_cols());
        let k = m.min(n);
        if u.rows != m || u.cols != k || vt.rows != k || vt.cols != n || s.len() != k {
            return Err(KernelStatus::new(Routine::Svd, BAD_SHAPE, format!("A {m}x{n} with k = {k}")));
        }
        if k == 0 {
            return Ok(());
        }
        trace!(m, n; "gesvd");
        let mut dense = DTensor::<T, 2>::from_fn([m, n], |idx| a.at(idx[0], idx[1]));
        let a_slice: &mut DSlice<T, 2> = dense.as_mut();
        let decomp = svd_backend(a_slice).map_err(|e| KernelStatus::new(Routine::Svd, NO_CONVERGENCE, e.to_string()))?;

        for (i, sv) in s.iter_mut().enumerate() {
            *sv = decomp.s[[0, i]].real_f64();
        }
        for i in 0..m {
            for j in 0..k {
                u.data[i * u.ld + j] = decomp.u[[i, j]];
            }
        }
        for i in 0..k {
            for j in 0..n {
                vt.data[i * vt.ld + j] = decomp.vt[[i, j]];
            }
        }
        Ok(())
    }

    fn eig(&self, args: EigArgs<'_, T>) -> KernelResult {
        let EigArgs { a, w, z } = args;
        check(Routine::Syev, a.fits() && z.fits(), "syev operand")?;
        let n = a.op_rows();
        if a.op_cols() != n || z.rows != n || z.cols != n || w.len() != n {
            return Err(KernelStatus::new(Routine::Syev, BAD_SHAPE, format!("A {n}x{}", a.op_cols())));
        }
        if n == 0 {
            return Ok(());
        }
        trace!(n; "syev");
        let (values, vectors) =
            eig_backend(&a, n).map_err(|e| KernelStatus::new(Routine::Syev, NO_CONVERGENCE, e.to_string()))?;
        w.copy_from_slice(&values);
        for i in 0..n {
            for j in 0..n {
                z.data[i * z.ld + j] = vectors[(i, j)];
            }
        }
        Ok(())
    }

    fn solve(&self, args: SolveArgs<'_, T>) -> KernelResult {
        let SolveArgs { kind, a, b } = args;
        let routine = kind.routine();
        check(routine, a.fits() && b.fits(), "solve operand")?;
        let n = a.op_rows();
        if a.op_cols() != n || b.rows != n {
            return Err(KernelStatus::new(
                routine,
                BAD_SHAPE,
                format!("A {n}x{} with B {}x{}", a.op_cols(), b.rows, b.cols),
            ));
        }
        if n == 0 || b.cols == 0 {
            return Ok(());
        }
        trace!(n, nrhs = b.cols, routine = routine.name(); "solve");
        let lhs = faer::Mat::<T>::from_fn(n, n, |i, j| a.at(i, j));
        let rhs = faer::Mat::<T>::from_fn(n, b.cols, |i, j| b.data[i * b.ld + j]);
        let x = solve_backend(kind, &lhs, &rhs).map_err(|e| KernelStatus::new(routine, SINGULAR, e.to_string()))?;
        for i in 0..n {
            for j in 0..b.cols {
                b.data[i * b.ld + j] = x[(i, j)];
            }
        }
        Ok(())
    }
}

/// Full SVD factors: `u` is m×m, `vt` is n×n and the singular values sit in
/// the first row of `s` (LAPACK convention).
struct DenseSvd<T> {
    u: DTensor<T, 2>,
    s: DTensor<T, 2>,
    vt: DTensor<T, 2>,
}

/// Compute the full SVD through mdarray-linalg's faer backend.
fn svd_backend<T: Scalar>(a: &mut DSlice<T, 2>) -> anyhow::Result<DenseSvd<T>> {
    let decomp = Faer
        .svd(a)
        .map_err(|e| anyhow::anyhow!("SVD computation failed: {}", e))?;
    Ok(DenseSvd {
        u: to_dtensor(&decomp.u),
        s: to_dtensor(&decomp.s),
        vt: to_dtensor(&decomp.vt),
    })
}

/// Eigenpairs of the Hermitian matrix `a`, eigenvalues ascending.
///
/// The values are Rayleigh quotients of the returned vectors, so they stay
/// real for complex element types.
fn eig_backend<T: Scalar>(a: &MatRef<'_, T>, n: usize) -> anyhow::Result<(Vec<f64>, faer::Mat<T>)> {
    let mat = faer::Mat::<T>::from_fn(n, n, |i, j| a.at(i, j));
    let evd = mat
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow::anyhow!("eigendecomposition failed: {e:?}"))?;
    let u = evd.U();
    let mut order: Vec<(f64, usize)> = (0..n)
        .map(|j| {
            let mut quotient = T::zero();
            for i in 0..n {
                let row = (0..n).fold(T::zero(), |acc, l| acc + mat[(i, l)] * u[(l, j)]);
                quotient += u[(i, j)].conjugate() * row;
            }
            (quotient.real_f64(), j)
        })
        .collect();
    if order.iter().any(|(w, _)| !w.is_finite()) {
        anyhow::bail!("eigenvalues are not finite");
    }
    order.sort_by(|x, y| x.0.total_cmp(&y.0));
    let vectors = faer::Mat::<T>::from_fn(n, n, |i, k| u[(i, order[k].1)]);
    Ok((order.into_iter().map(|(w, _)| w).collect(), vectors))
}

/// `lhs⁻¹ · rhs`. Pivoted LU also serves symmetric indefinite systems.
fn solve_backend<T: Scalar>(kind: SolveKind, lhs: &faer::Mat<T>, rhs: &faer::Mat<T>) -> anyhow::Result<faer::Mat<T>> {
    let x: faer::Mat<T> = match kind {
        SolveKind::General | SolveKind::Symmetric => lhs.partial_piv_lu().solve(rhs.as_ref()),
        SolveKind::PositiveDefinite => lhs
            .llt(Side::Lower)
            .map_err(|e| anyhow::anyhow!("matrix is not positive definite: {e:?}"))?
            .solve(rhs.as_ref()),
    };
    let finite = (0..x.nrows()).all(|i| (0..x.ncols()).all(|j| x[(i, j)].modulus().is_finite()));
    if !finite {
        anyhow::bail!("matrix is singular");
    }
    Ok(x)
}

fn to_dtensor<T: Clone>(tensor: &mdarray::Tensor<T, (usize, usize)>) -> DTensor<T, 2> {
    DTensor::<T, 2>::from_fn([tensor.dim(0), tensor.dim(1)], |idx| tensor[[idx[0], idx[1]]].clone())
}

/// Unit-stride copy of a vector operand with conjugation applied.
fn contiguous<'a, T: Scalar>(x: &VecRef<'a, T>) -> Cow<'a, [T]> {
    if x.inc == 1 {
        conjugated(&x.data[..x.len], x.conj)
    } else {
        Cow::Owned((0..x.len).map(|i| x.at(i)).collect())
    }
}
