//! Argument lists for fixed-signature linear-algebra routines.
//!
//! A [`Request`] describes an operation on dense blocks in tensor terms
//! (which legs are free, which are contracted, how operands are laid out).
//! [`ArgList::build`] is the single dispatch point that turns a request into
//! the exact operand set of one routine family: pointers, extents, leading
//! dimensions, transpose/conjugate selectors and scalar coefficients.
//!
//! Building never copies operand data and never calls a kernel. All
//! dimensional compatibility checks happen here, so an illegal contraction
//! is rejected before any numerical work starts.

use std::fmt;

use qnblock_dense::extents::{check_permutation, permuted, row_major_strides, volume};
use qnblock_dense::{DenseBlock, Extents, Scalar};

use crate::error::{QnError, Result};
use crate::kernel::{KernelResult, LinalgKernel};

/// Routine families of the kernel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Routine {
    Copy,
    Scale,
    Axpy,
    Permute,
    Gemm,
    Gemv,
    Ger,
    Dot,
    Svd,
    Syev,
    Gesv,
    Sysv,
    Posv,
}

impl Routine {
    /// Conventional BLAS/LAPACK-style name.
    pub fn name(self) -> &'static str {
        match self {
            Routine::Copy => "copy",
            Routine::Scale => "scal",
            Routine::Axpy => "axpy",
            Routine::Permute => "permute",
            Routine::Gemm => "gemm",
            Routine::Gemv => "gemv",
            Routine::Ger => "ger",
            Routine::Dot => "dot",
            Routine::Svd => "gesvd",
            Routine::Syev => "syev",
            Routine::Gesv => "gesv",
            Routine::Sysv => "sysv",
            Routine::Posv => "posv",
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transpose/conjugate selector of a matrix operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    NoTrans,
    Trans,
    ConjTrans,
    Conj,
}

impl Op {
    pub fn new(transpose: bool, conj: bool) -> Self {
        match (transpose, conj) {
            (false, false) => Op::NoTrans,
            (true, false) => Op::Trans,
            (true, true) => Op::ConjTrans,
            (false, true) => Op::Conj,
        }
    }

    pub fn is_trans(self) -> bool {
        matches!(self, Op::Trans | Op::ConjTrans)
    }

    pub fn is_conj(self) -> bool {
        matches!(self, Op::Conj | Op::ConjTrans)
    }

    /// Same conjugation, opposite transposition.
    #[must_use]
    pub fn transposed(self) -> Self {
        Op::new(!self.is_trans(), self.is_conj())
    }
}

/// Row-major matrix operand: element `(i, j)` of the stored matrix lives at
/// `data[i * ld + j]`; `op` says how the routine applies it.
#[derive(Debug)]
pub struct MatRef<'a, T> {
    pub data: &'a [T],
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
    pub op: Op,
}

impl<T: Scalar> MatRef<'_, T> {
    /// Rows of `op(A)`.
    pub fn op_rows(&self) -> usize {
        if self.op.is_trans() {
            self.cols
        } else {
            self.rows
        }
    }

    /// Columns of `op(A)`.
    pub fn op_cols(&self) -> usize {
        if self.op.is_trans() {
            self.rows
        } else {
            self.cols
        }
    }

    /// Element `(i, j)` of `op(A)`.
    pub fn at(&self, i: usize, j: usize) -> T {
        let (r, c) = if self.op.is_trans() { (j, i) } else { (i, j) };
        let value = self.data[r * self.ld + c];
        if self.op.is_conj() {
            value.conjugate()
        } else {
            value
        }
    }

    /// Stored footprint fits in `data`.
    pub fn fits(&self) -> bool {
        self.rows == 0 || self.cols == 0 || ((self.rows - 1) * self.ld + self.cols <= self.data.len() && self.cols <= self.ld)
    }
}

/// Mutable row-major matrix operand.
#[derive(Debug)]
pub struct MatMut<'a, T> {
    pub data: &'a mut [T],
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
}

impl<T> MatMut<'_, T> {
    pub fn fits(&self) -> bool {
        self.rows == 0 || self.cols == 0 || ((self.rows - 1) * self.ld + self.cols <= self.data.len() && self.cols <= self.ld)
    }
}

/// Strided vector operand.
#[derive(Debug)]
pub struct VecRef<'a, T> {
    pub data: &'a [T],
    pub len: usize,
    pub inc: usize,
    pub conj: bool,
}

impl<T: Scalar> VecRef<'_, T> {
    /// Element `i`, conjugated when requested.
    pub fn at(&self, i: usize) -> T {
        let value = self.data[i * self.inc];
        if self.conj {
            value.conjugate()
        } else {
            value
        }
    }

    pub fn fits(&self) -> bool {
        self.len == 0 || (self.len - 1) * self.inc < self.data.len()
    }
}

/// Mutable strided vector operand.
#[derive(Debug)]
pub struct VecMut<'a, T> {
    pub data: &'a mut [T],
    pub len: usize,
    pub inc: usize,
}

impl<T> VecMut<'_, T> {
    pub fn fits(&self) -> bool {
        self.len == 0 || (self.len - 1) * self.inc < self.data.len()
    }
}

/// `x <- alpha * x`
#[derive(Debug)]
pub struct ScaleArgs<'a, T> {
    pub alpha: T,
    pub x: VecMut<'a, T>,
}

/// `y <- op(x)`
#[derive(Debug)]
pub struct CopyArgs<'a, T> {
    pub x: VecRef<'a, T>,
    pub y: VecMut<'a, T>,
}

/// `y <- alpha * op(x) + y`
#[derive(Debug)]
pub struct AxpyArgs<'a, T> {
    pub alpha: T,
    pub x: VecRef<'a, T>,
    pub y: VecMut<'a, T>,
}

/// `y[idx] <- x[idx]` over a shared coordinate space with independent strides.
#[derive(Debug)]
pub struct PermuteArgs<'a, T> {
    pub x: &'a [T],
    pub x_strides: Extents,
    pub extents: Extents,
    pub y: &'a mut [T],
    pub y_strides: Extents,
}

/// `C <- alpha * op(A) * op(B) + beta * C`
#[derive(Debug)]
pub struct GemmArgs<'a, T> {
    pub alpha: T,
    pub a: MatRef<'a, T>,
    pub b: MatRef<'a, T>,
    pub beta: T,
    pub c: MatMut<'a, T>,
}

/// `y <- alpha * op(A) * x + beta * y`
#[derive(Debug)]
pub struct GemvArgs<'a, T> {
    pub alpha: T,
    pub a: MatRef<'a, T>,
    pub x: VecRef<'a, T>,
    pub beta: T,
    pub y: VecMut<'a, T>,
}

/// `A <- alpha * x * y^T + beta * A`
#[derive(Debug)]
pub struct GerArgs<'a, T> {
    pub alpha: T,
    pub x: VecRef<'a, T>,
    pub y: VecRef<'a, T>,
    pub beta: T,
    pub a: MatMut<'a, T>,
}

/// `out <- alpha * sum_i x_i * y_i + beta * out`
#[derive(Debug)]
pub struct DotArgs<'a, T> {
    pub alpha: T,
    pub x: VecRef<'a, T>,
    pub y: VecRef<'a, T>,
    pub beta: T,
    pub out: &'a mut T,
}

/// Thin SVD `A = U * diag(s) * Vt` with `k = min(m, n)`.
#[derive(Debug)]
pub struct SvdArgs<'a, T> {
    pub a: MatRef<'a, T>,
    /// `m x k`, row-major.
    pub u: MatMut<'a, T>,
    /// `k` singular values in descending order.
    pub s: &'a mut [f64],
    /// `k x n`, row-major.
    pub vt: MatMut<'a, T>,
}

/// Hermitian eigendecomposition `A = Z * diag(w) * Z^H` of an `n x n`
/// matrix. Only the lower triangle of `a` is read.
#[derive(Debug)]
pub struct EigArgs<'a, T> {
    pub a: MatRef<'a, T>,
    /// `n` eigenvalues in ascending order.
    pub w: &'a mut [f64],
    /// `n x n`, row-major; column `j` is the eigenvector of `w[j]`.
    pub z: MatMut<'a, T>,
}

/// Matrix structure a linear solve may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SolveKind {
    #[default]
    General,
    /// Hermitian, possibly indefinite.
    Symmetric,
    /// Hermitian positive definite.
    PositiveDefinite,
}

impl SolveKind {
    pub fn routine(self) -> Routine {
        match self {
            SolveKind::General => Routine::Gesv,
            SolveKind::Symmetric => Routine::Sysv,
            SolveKind::PositiveDefinite => Routine::Posv,
        }
    }
}

/// `A * X = B` for `n x n` `A`; `b` (`n x nrhs`) is overwritten with `X`.
#[derive(Debug)]
pub struct SolveArgs<'a, T> {
    pub kind: SolveKind,
    pub a: MatRef<'a, T>,
    pub b: MatMut<'a, T>,
}

/// A fully built call to one routine family.
#[derive(Debug)]
pub enum ArgList<'a, T> {
    Scale(ScaleArgs<'a, T>),
    Copy(CopyArgs<'a, T>),
    Axpy(AxpyArgs<'a, T>),
    Permute(PermuteArgs<'a, T>),
    Gemm(GemmArgs<'a, T>),
    Gemv(GemvArgs<'a, T>),
    Ger(GerArgs<'a, T>),
    Dot(DotArgs<'a, T>),
    Svd(SvdArgs<'a, T>),
    Eig(EigArgs<'a, T>),
    Solve(SolveArgs<'a, T>),
}

/// Which end of a block holds the contracted legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `[free.., contracted..]`
    ContractedLast,
    /// `[contracted.., free..]`
    ContractedFirst,
}

/// Leg counts of a pairwise contraction: free legs of A, contracted legs,
/// free legs of B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RankSignature {
    pub a_free: usize,
    pub contracted: usize,
    pub b_free: usize,
}

impl RankSignature {
    pub fn new(a_free: usize, contracted: usize, b_free: usize) -> Self {
        Self {
            a_free,
            contracted,
            b_free,
        }
    }

    /// Routine family implementing this contraction pattern.
    pub fn routine(&self) -> Routine {
        match (self.a_free > 0, self.contracted > 0, self.b_free > 0) {
            (true, true, true) => Routine::Gemm,
            (true, true, false) | (false, true, true) => Routine::Gemv,
            (false, _, false) => Routine::Dot,
            (_, false, _) => Routine::Ger,
        }
    }
}

impl fmt::Display for RankSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.a_free, self.contracted, self.b_free)
    }
}

/// An operation on dense blocks, before dispatch.
#[derive(Debug)]
pub enum Request<'a, T: Scalar> {
    Scale {
        alpha: T,
        x: &'a mut DenseBlock<T>,
    },
    Copy {
        x: &'a DenseBlock<T>,
        conj: bool,
        y: &'a mut DenseBlock<T>,
    },
    Axpy {
        alpha: T,
        x: &'a DenseBlock<T>,
        conj: bool,
        y: &'a mut DenseBlock<T>,
    },
    /// `y = permute(x, perm)`.
    Permute {
        x: &'a DenseBlock<T>,
        perm: &'a [usize],
        y: &'a mut DenseBlock<T>,
    },
    /// `c = alpha * contract(a, b) + beta * c`.
    ///
    /// Each operand is either laid out per leg (rank equals its free plus
    /// contracted leg count) or already merged into a matrix (rank 2).
    Contract {
        alpha: T,
        a: &'a DenseBlock<T>,
        a_layout: Layout,
        conj_a: bool,
        b: &'a DenseBlock<T>,
        b_layout: Layout,
        conj_b: bool,
        signature: RankSignature,
        beta: T,
        c: &'a mut DenseBlock<T>,
    },
    /// Thin SVD of `a` unfolded with legs `..split` as rows.
    Svd {
        a: &'a DenseBlock<T>,
        split: usize,
        u: &'a mut DenseBlock<T>,
        s: &'a mut [f64],
        vt: &'a mut DenseBlock<T>,
    },
    /// Eigendecomposition of the Hermitian matrix `a` unfolded at `split`;
    /// eigenvalues go to `w`, eigenvectors to `z`.
    Eig {
        a: &'a DenseBlock<T>,
        split: usize,
        w: &'a mut [f64],
        z: &'a mut DenseBlock<T>,
    },
    /// Solve `a * X = b` with `a` unfolded at `split` and `b` unfolded at
    /// `rhs_split`; `b` is overwritten with `X`.
    Solve {
        kind: SolveKind,
        a: &'a DenseBlock<T>,
        split: usize,
        b: &'a mut DenseBlock<T>,
        rhs_split: usize,
    },
}

fn vec_ref<T>(data: &[T], conj: bool) -> VecRef<'_, T> {
    VecRef {
        data,
        len: data.len(),
        inc: 1,
        conj,
    }
}

fn vec_mut<T>(data: &mut [T]) -> VecMut<'_, T> {
    let len = data.len();
    VecMut { data, len, inc: 1 }
}

fn mismatch(routine: Routine, dimension: &'static str, left: usize, right: usize) -> QnError {
    QnError::ExtentMismatch {
        routine: routine.name(),
        dimension,
        left,
        right,
    }
}

/// Side of the square matrix `a` unfolds into at `split`.
fn square_unfolding<T: Scalar>(routine: Routine, a: &DenseBlock<T>, split: usize) -> Result<usize> {
    if split > a.rank() {
        return Err(QnError::InvalidSplit {
            split,
            rank: a.rank(),
        });
    }
    let m = volume(&a.extents()[..split]);
    let n = volume(&a.extents()[split..]);
    if m != n {
        return Err(mismatch(routine, "n", m, n));
    }
    Ok(n)
}

/// Split `extents` into a leading and trailing group and return the products.
///
/// Per-leg operands split after `lead` legs; merged (rank 2) operands split
/// after their first leg.
fn grouped(extents: &[usize], lead: usize, trail: usize) -> Result<(usize, usize)> {
    let at = if extents.len() == lead + trail {
        lead
    } else if extents.len() == 2 {
        1
    } else {
        return Err(QnError::RankMismatch {
            expected: lead + trail,
            actual: extents.len(),
        });
    };
    Ok((volume(&extents[..at]), volume(&extents[at..])))
}

/// Stored `(rows, cols)`, `(free, contracted)` extents and transpose flag of a
/// contraction operand. `contracted_first_is_natural` is true for the right
/// operand, whose natural matrix form is `k x n`.
fn operand_dims(
    block: &DenseBlock<impl Scalar>,
    free: usize,
    contracted: usize,
    layout: Layout,
    contracted_first_is_natural: bool,
) -> Result<((usize, usize), (usize, usize), bool)> {
    let (lead, trail) = match layout {
        Layout::ContractedLast => (free, contracted),
        Layout::ContractedFirst => (contracted, free),
    };
    let (rows, cols) = grouped(block.extents(), lead, trail)?;
    let (f, k) = match layout {
        Layout::ContractedLast => (rows, cols),
        Layout::ContractedFirst => (cols, rows),
    };
    let transpose = (layout == Layout::ContractedFirst) != contracted_first_is_natural;
    Ok(((rows, cols), (f, k), transpose))
}

impl<'a, T: Scalar> ArgList<'a, T> {
    /// Dispatch a request to the routine family that implements it.
    ///
    /// # Errors
    /// `ExtentMismatch` naming the offending dimension when operand extents
    /// are incompatible, `RankMismatch`/`InvalidAxes`/`InvalidSplit` for
    /// malformed requests.
    pub fn build(request: Request<'a, T>) -> Result<Self> {
        match request {
            Request::Scale { alpha, x } => Ok(ArgList::Scale(ScaleArgs {
                alpha,
                x: vec_mut(x.as_mut_slice()),
            })),
            Request::Copy { x, conj, y } => {
                if x.len() != y.len() {
                    return Err(mismatch(Routine::Copy, "n", x.len(), y.len()));
                }
                Ok(ArgList::Copy(CopyArgs {
                    x: vec_ref(x.as_slice(), conj),
                    y: vec_mut(y.as_mut_slice()),
                }))
            }
            Request::Axpy { alpha, x, conj, y } => {
                if x.len() != y.len() {
                    return Err(mismatch(Routine::Axpy, "n", x.len(), y.len()));
                }
                Ok(ArgList::Axpy(AxpyArgs {
                    alpha,
                    x: vec_ref(x.as_slice(), conj),
                    y: vec_mut(y.as_mut_slice()),
                }))
            }
            Request::Permute { x, perm, y } => Self::build_permute(x, perm, y),
            Request::Contract {
                alpha,
                a,
                a_layout,
                conj_a,
                b,
                b_layout,
                conj_b,
                signature,
                beta,
                c,
            } => Self::build_contract(alpha, (a, a_layout, conj_a), (b, b_layout, conj_b), signature, beta, c),
            Request::Svd { a, split, u, s, vt } => Self::build_svd(a, split, u, s, vt),
            Request::Eig { a, split, w, z } => Self::build_eig(a, split, w, z),
            Request::Solve {
                kind,
                a,
                split,
                b,
                rhs_split,
            } => Self::build_solve(kind, a, split, b, rhs_split),
        }
    }

    fn build_permute(x: &'a DenseBlock<T>, perm: &'a [usize], y: &'a mut DenseBlock<T>) -> Result<Self> {
        check_permutation(perm, x.rank())
            .map_err(|_| QnError::InvalidAxes(format!("{perm:?} is not a permutation of rank {}", x.rank())))?;
        let extents = permuted(x.extents(), perm);
        if y.rank() != extents.len() {
            return Err(QnError::RankMismatch {
                expected: extents.len(),
                actual: y.rank(),
            });
        }
        if let Some((&want, &got)) = extents.iter().zip(y.extents()).find(|(w, g)| w != g) {
            return Err(mismatch(Routine::Permute, "axis", want, got));
        }
        let x_strides = permuted(&row_major_strides(x.extents()), perm);
        let y_strides = row_major_strides(&extents);
        Ok(ArgList::Permute(PermuteArgs {
            x: x.as_slice(),
            x_strides,
            extents,
            y: y.as_mut_slice(),
            y_strides,
        }))
    }

    fn build_contract(
        alpha: T,
        (a, a_layout, conj_a): (&'a DenseBlock<T>, Layout, bool),
        (b, b_layout, conj_b): (&'a DenseBlock<T>, Layout, bool),
        sig: RankSignature,
        beta: T,
        c: &'a mut DenseBlock<T>,
    ) -> Result<Self> {
        let routine = sig.routine();
        let ((a_rows, a_cols), (m, ka), a_trans) = operand_dims(a, sig.a_free, sig.contracted, a_layout, false)?;
        let ((b_rows, b_cols), (n, kb), b_trans) = operand_dims(b, sig.b_free, sig.contracted, b_layout, true)?;
        if ka != kb {
            return Err(mismatch(routine, "k", ka, kb));
        }
        let (cm, cn) = grouped(c.extents(), sig.a_free, sig.b_free)?;
        if cm != m {
            return Err(mismatch(routine, "m", m, cm));
        }
        if cn != n {
            return Err(mismatch(routine, "n", n, cn));
        }

        let a_mat = MatRef {
            data: a.as_slice(),
            rows: a_rows,
            cols: a_cols,
            ld: a_cols,
            op: Op::new(a_trans, conj_a),
        };
        let b_mat = MatRef {
            data: b.as_slice(),
            rows: b_rows,
            cols: b_cols,
            ld: b_cols,
            op: Op::new(b_trans, conj_b),
        };

        match routine {
            Routine::Gemm => Ok(ArgList::Gemm(GemmArgs {
                alpha,
                a: a_mat,
                b: b_mat,
                beta,
                c: MatMut {
                    data: c.as_mut_slice(),
                    rows: m,
                    cols: n,
                    ld: n,
                },
            })),
            Routine::Gemv if sig.b_free == 0 => {
                if n != 1 {
                    return Err(mismatch(routine, "n", n, 1));
                }
                Ok(ArgList::Gemv(GemvArgs {
                    alpha,
                    a: a_mat,
                    x: vec_ref(b.as_slice(), conj_b),
                    beta,
                    y: vec_mut(c.as_mut_slice()),
                }))
            }
            Routine::Gemv => {
                if m != 1 {
                    return Err(mismatch(routine, "m", m, 1));
                }
                Ok(ArgList::Gemv(GemvArgs {
                    alpha,
                    a: MatRef {
                        op: b_mat.op.transposed(),
                        ..b_mat
                    },
                    x: vec_ref(a.as_slice(), conj_a),
                    beta,
                    y: vec_mut(c.as_mut_slice()),
                }))
            }
            Routine::Ger => {
                if ka != 1 {
                    return Err(mismatch(routine, "k", ka, 1));
                }
                Ok(ArgList::Ger(GerArgs {
                    alpha,
                    x: vec_ref(a.as_slice(), conj_a),
                    y: vec_ref(b.as_slice(), conj_b),
                    beta,
                    a: MatMut {
                        data: c.as_mut_slice(),
                        rows: m,
                        cols: n,
                        ld: n,
                    },
                }))
            }
            _ => {
                if m != 1 || n != 1 {
                    return Err(mismatch(routine, "m", m * n, 1));
                }
                let out = c
                    .as_mut_slice()
                    .first_mut()
                    .ok_or_else(|| mismatch(routine, "out", 0, 1))?;
                Ok(ArgList::Dot(DotArgs {
                    alpha,
                    x: vec_ref(a.as_slice(), conj_a),
                    y: vec_ref(b.as_slice(), conj_b),
                    beta,
                    out,
                }))
            }
        }
    }

    fn build_svd(
        a: &'a DenseBlock<T>,
        split: usize,
        u: &'a mut DenseBlock<T>,
        s: &'a mut [f64],
        vt: &'a mut DenseBlock<T>,
    ) -> Result<Self> {
        if split > a.rank() {
            return Err(QnError::InvalidSplit {
                split,
                rank: a.rank(),
            });
        }
        let m = volume(&a.extents()[..split]);
        let n = volume(&a.extents()[split..]);
        let k = m.min(n);
        if u.len() != m * k {
            return Err(mismatch(Routine::Svd, "u", u.len(), m * k));
        }
        if s.len() != k {
            return Err(mismatch(Routine::Svd, "s", s.len(), k));
        }
        if vt.len() != k * n {
            return Err(mismatch(Routine::Svd, "vt", vt.len(), k * n));
        }
        Ok(ArgList::Svd(SvdArgs {
            a: MatRef {
                data: a.as_slice(),
                rows: m,
                cols: n,
                ld: n,
                op: Op::NoTrans,
            },
            u: MatMut {
                data: u.as_mut_slice(),
                rows: m,
                cols: k,
                ld: k,
            },
            s,
            vt: MatMut {
                data: vt.as_mut_slice(),
                rows: k,
                cols: n,
                ld: n,
            },
        }))
    }

    fn build_eig(a: &'a DenseBlock<T>, split: usize, w: &'a mut [f64], z: &'a mut DenseBlock<T>) -> Result<Self> {
        let n = square_unfolding(Routine::Syev, a, split)?;
        if w.len() != n {
            return Err(mismatch(Routine::Syev, "w", w.len(), n));
        }
        if z.len() != n * n {
            return Err(mismatch(Routine::Syev, "z", z.len(), n * n));
        }
        Ok(ArgList::Eig(EigArgs {
            a: MatRef {
                data: a.as_slice(),
                rows: n,
                cols: n,
                ld: n,
                op: Op::NoTrans,
            },
            w,
            z: MatMut {
                data: z.as_mut_slice(),
                rows: n,
                cols: n,
                ld: n,
            },
        }))
    }

    fn build_solve(
        kind: SolveKind,
        a: &'a DenseBlock<T>,
        split: usize,
        b: &'a mut DenseBlock<T>,
        rhs_split: usize,
    ) -> Result<Self> {
        let routine = kind.routine();
        let n = square_unfolding(routine, a, split)?;
        if rhs_split > b.rank() {
            return Err(QnError::InvalidSplit {
                split: rhs_split,
                rank: b.rank(),
            });
        }
        let rows = volume(&b.extents()[..rhs_split]);
        if rows != n {
            return Err(mismatch(routine, "b rows", rows, n));
        }
        let nrhs = volume(&b.extents()[rhs_split..]);
        Ok(ArgList::Solve(SolveArgs {
            kind,
            a: MatRef {
                data: a.as_slice(),
                rows: n,
                cols: n,
                ld: n,
                op: Op::NoTrans,
            },
            b: MatMut {
                data: b.as_mut_slice(),
                rows: n,
                cols: nrhs,
                ld: nrhs,
            },
        }))
    }

    pub fn routine(&self) -> Routine {
        match self {
            ArgList::Scale(_) => Routine::Scale,
            ArgList::Copy(_) => Routine::Copy,
            ArgList::Axpy(_) => Routine::Axpy,
            ArgList::Permute(_) => Routine::Permute,
            ArgList::Gemm(_) => Routine::Gemm,
            ArgList::Gemv(_) => Routine::Gemv,
            ArgList::Ger(_) => Routine::Ger,
            ArgList::Dot(_) => Routine::Dot,
            ArgList::Svd(_) => Routine::Svd,
            ArgList::Eig(_) => Routine::Syev,
            ArgList::Solve(args) => args.kind.routine(),
        }
    }

    /// Approximate floating-point operation count, used to order work.
    pub fn flops(&self) -> u64 {
        let flops = match self {
            ArgList::Scale(args) => args.x.len,
            ArgList::Copy(args) => args.y.len,
            ArgList::Axpy(args) => 2 * args.y.len,
            ArgList::Permute(args) => volume(&args.extents),
            ArgList::Gemm(args) => 2 * args.a.op_rows() * args.a.op_cols() * args.b.op_cols(),
            ArgList::Gemv(args) => 2 * args.a.rows * args.a.cols,
            ArgList::Ger(args) => 2 * args.a.rows * args.a.cols,
            ArgList::Dot(args) => 2 * args.x.len,
            ArgList::Svd(args) => {
                let (m, n) = (args.a.rows, args.a.cols);
                4 * m * n * m.min(n)
            }
            ArgList::Eig(args) => 9 * args.a.rows.pow(3),
            ArgList::Solve(args) => {
                let n = args.a.rows;
                2 * n.pow(3) / 3 + 2 * n * n * args.b.cols
            }
        };
        flops as u64
    }

    /// Hand the argument list to `kernel`.
    pub fn call<K: LinalgKernel<T> + ?Sized>(self, kernel: &K) -> KernelResult {
        match self {
            ArgList::Scale(args) => kernel.scale(args),
            ArgList::Copy(args) => kernel.copy(args),
            ArgList::Axpy(args) => kernel.axpy(args),
            ArgList::Permute(args) => kernel.permute(args),
            ArgList::Gemm(args) => kernel.gemm(args),
            ArgList::Gemv(args) => kernel.gemv(args),
            ArgList::Ger(args) => kernel.ger(args),
            ArgList::Dot(args) => kernel.dot(args),
            ArgList::Svd(args) => kernel.svd(args),
            ArgList::Eig(args) => kernel.eig(args),
            ArgList::Solve(args) => kernel.solve(args),
        }
    }
}
