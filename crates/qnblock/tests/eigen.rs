mod common;

use approx::assert_abs_diff_eq;
use common::Instrumented;
use qnblock::{
    contract, eigh, shape_of, solve, ArgList, Complex64, ContractOptions, DenseBlock, FaerKernel, Leg, Request, Routine,
    Scalar, SolveKind, SymmetricArray, U1,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Row sectors after merging legs 0 and 1: U1(0) has 4 rows, U1(1) 8 and U1(2) 3.
fn hermitian_legs() -> Vec<Leg<U1>> {
    let p = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
    let q = shape_of([(U1(-1), 1), (U1(0), 2)]).unwrap();
    vec![Leg::plus(p.clone()), Leg::minus(q.clone()), Leg::minus(p), Leg::plus(q)]
}

fn gram<T: Scalar>(seed: u64) -> SymmetricArray<T, U1> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let m: SymmetricArray<T, U1> = SymmetricArray::random(hermitian_legs(), U1(0), &mut rng).unwrap();
    contract(T::one(), &m, &[2, 3], &m.conj().unwrap(), &[2, 3], &FaerKernel, &ContractOptions::default())
        .unwrap()
        .into_result()
        .unwrap()
}

#[test]
fn test_eigh_matches_dense_spectrum() {
    let a = gram::<Complex64>(40);
    let f = eigh(&a, 2, &FaerKernel).unwrap().into_result().unwrap();
    let mut blockwise: Vec<f64> = f.values.iter().flat_map(|(_, w)| w.iter().copied()).collect();
    blockwise.sort_by(f64::total_cmp);

    let dense = a.to_dense().unwrap();
    let n = 15;
    let mut w = vec![0.0; n];
    let mut z = DenseBlock::<Complex64>::zeros(&[n, n]);
    ArgList::build(Request::Eig {
        a: &dense,
        split: 2,
        w: &mut w,
        z: &mut z,
    })
    .unwrap()
    .call(&FaerKernel)
    .unwrap();

    assert_eq!(blockwise.len(), n);
    for (x, y) in blockwise.iter().zip(&w) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
    }
}

#[test]
fn test_eigh_failure_is_attributed() {
    let a = gram::<f64>(41);
    let clean = eigh(&a, 2, &FaerKernel).unwrap().into_result().unwrap();

    let kernel = Instrumented::failing_at(8);
    let out = eigh(&a, 2, &kernel).unwrap();
    assert_eq!(kernel.calls(), 3);
    assert_eq!(out.failures.len(), 1);
    let failure = &out.failures[0];
    assert_eq!(failure.routine, Routine::Syev);
    // merged row sector U1(1) meets column sector U1(-1)
    assert_eq!(failure.block, vec![1, 1]);
    assert_eq!(failure.status.routine, Routine::Syev);

    let f = out.value;
    assert!(f.bond.position(&U1(1)).is_none());
    assert_eq!(f.bond.total_dim(), 7);
    f.vectors.check_invariants().unwrap();
    for label in [U1(0), U1(2)] {
        assert_eq!(f.values.get(&label), clean.values.get(&label));
    }
}

#[test]
fn test_solve_failure_is_attributed() {
    let a = gram::<f64>(42);
    let mut rng = ChaCha8Rng::seed_from_u64(43);
    let r = shape_of([(U1(0), 2), (U1(1), 1)]).unwrap();
    let b_legs = vec![a.leg(0).clone(), a.leg(1).clone(), Leg::minus(r)];
    let b: SymmetricArray<f64, U1> = SymmetricArray::random(b_legs, U1(0), &mut rng).unwrap();
    let clean = solve(&a, 2, &b, SolveKind::PositiveDefinite, &FaerKernel)
        .unwrap()
        .into_result()
        .unwrap();

    let kernel = Instrumented::failing_at(8);
    let out = solve(&a, 2, &b, SolveKind::PositiveDefinite, &kernel).unwrap();
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].routine, Routine::Posv);
    assert_eq!(out.failures[0].block[0], 1);

    let x = out.value;
    x.check_invariants().unwrap();
    assert!(x.num_blocks() > 0);
    assert!(x.num_blocks() < clean.num_blocks());
    for (coords, block) in x.blocks() {
        let reference = clean.at(&coords).unwrap();
        for (u, v) in block.as_slice().iter().zip(reference.as_slice()) {
            assert_abs_diff_eq!(*u, *v, epsilon = 1e-12);
        }
    }
}
