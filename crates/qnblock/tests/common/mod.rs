//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use qnblock::arglist::{
    AxpyArgs, CopyArgs, DotArgs, EigArgs, GemmArgs, GemvArgs, GerArgs, PermuteArgs, ScaleArgs, SolveArgs, SvdArgs,
};
use qnblock::{
    shape_of, DenseBlock, FaerKernel, IndexedLoop, KernelResult, KernelStatus, Leg, LinalgKernel, QuantumShape,
    Routine, Scalar, U1,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Shape with 1 to 3 consecutive U(1) sectors of size 1 to 3.
pub fn random_shape(rng: &mut ChaCha8Rng) -> Arc<QuantumShape<U1>> {
    let n: i32 = rng.random_range(1..=3);
    let start: i32 = rng.random_range(-2..=0);
    let sizes: Vec<usize> = (0..n).map(|_| rng.random_range(1..=3)).collect();
    shape_of((0..n).map(|i| U1(start + i)).zip(sizes)).unwrap()
}

pub fn random_leg(rng: &mut ChaCha8Rng) -> Leg<U1> {
    let shape = random_shape(rng);
    if rng.random::<bool>() {
        Leg::plus(shape)
    } else {
        Leg::minus(shape)
    }
}

pub fn random_legs(rng: &mut ChaCha8Rng, rank: usize) -> Vec<Leg<U1>> {
    (0..rank).map(|_| random_leg(rng)).collect()
}

/// Naive dense tensordot; result legs are the free legs of `a` then of `b`.
pub fn dense_contract<T: Scalar>(a: &DenseBlock<T>, axes_a: &[usize], b: &DenseBlock<T>, axes_b: &[usize]) -> DenseBlock<T> {
    let free_a: Vec<usize> = (0..a.rank()).filter(|x| !axes_a.contains(x)).collect();
    let free_b: Vec<usize> = (0..b.rank()).filter(|x| !axes_b.contains(x)).collect();
    let out: Vec<usize> = free_a
        .iter()
        .map(|&i| a.extents()[i])
        .chain(free_b.iter().map(|&i| b.extents()[i]))
        .collect();
    let inner: Vec<usize> = axes_a.iter().map(|&i| a.extents()[i]).collect();
    DenseBlock::from_fn(&out, |idx| {
        let mut sum = T::zero();
        for k in IndexedLoop::new(&inner) {
            let mut ia = vec![0; a.rank()];
            let mut ib = vec![0; b.rank()];
            for (n, &ax) in free_a.iter().enumerate() {
                ia[ax] = idx[n];
            }
            for (n, &ax) in free_b.iter().enumerate() {
                ib[ax] = idx[free_a.len() + n];
            }
            for (n, (&x, &y)) in axes_a.iter().zip(axes_b).enumerate() {
                ia[x] = k[n];
                ib[y] = k[n];
            }
            sum = sum + a.get(&ia) * b.get(&ib);
        }
        sum
    })
}

/// Faer kernel that counts calls and can fail factorisations (SVD, eigen
/// and solve) of blocks with a given row count.
#[derive(Default)]
pub struct Instrumented {
    calls: AtomicUsize,
    pub fail_rows: Option<usize>,
}

impl Instrumented {
    pub fn failing_at(rows: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_rows: Some(rows),
        }
    }

    fn refuse(&self, routine: Routine, rows: usize) -> KernelResult {
        if self.fail_rows == Some(rows) {
            return Err(KernelStatus::new(routine, 1, "no convergence"));
        }
        Ok(())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Scalar> LinalgKernel<T> for Instrumented {
    fn copy(&self, args: CopyArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.copy(args)
    }

    fn scale(&self, args: ScaleArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.scale(args)
    }

    fn axpy(&self, args: AxpyArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.axpy(args)
    }

    fn permute(&self, args: PermuteArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.permute(args)
    }

    fn gemm(&self, args: GemmArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.gemm(args)
    }

    fn gemv(&self, args: GemvArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.gemv(args)
    }

    fn ger(&self, args: GerArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.ger(args)
    }

    fn dot(&self, args: DotArgs<'_, T>) -> KernelResult {
        self.tick();
        FaerKernel.dot(args)
    }

    fn svd(&self, args: SvdArgs<'_, T>) -> KernelResult {
        self.tick();
        self.refuse(Routine::Svd, args.a.rows)?;
        FaerKernel.svd(args)
    }

    fn eig(&self, args: EigArgs<'_, T>) -> KernelResult {
        self.tick();
        self.refuse(Routine::Syev, args.a.rows)?;
        FaerKernel.eig(args)
    }

    fn solve(&self, args: SolveArgs<'_, T>) -> KernelResult {
        self.tick();
        self.refuse(args.kind.routine(), args.a.rows)?;
        FaerKernel.solve(args)
    }
}
