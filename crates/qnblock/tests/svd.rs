mod common;

use common::random_legs;
use qnblock::{
    contract, decompose, svd, Complex64, ContractOptions, FaerKernel, QuantumLabel, Scalar, SvdFactors, SvdOptions,
    SymmetricArray, U1,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn rebuild<T: Scalar>(f: &SvdFactors<T, U1>, split: usize) -> SymmetricArray<T, U1> {
    let opts = ContractOptions::default();
    let s = f.s.to_array::<T>().unwrap();
    let svt = contract(T::one(), &s, &[1], &f.vt, &[0], &FaerKernel, &opts)
        .unwrap()
        .into_result()
        .unwrap();
    contract(T::one(), &f.u, &[split], &svt, &[0], &FaerKernel, &opts)
        .unwrap()
        .into_result()
        .unwrap()
}

#[test]
fn test_svd_reconstructs_random_arrays() {
    for seed in 0..16 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let rank = rng.random_range(2..=4);
        let split = rng.random_range(1..rank);
        let legs = random_legs(&mut rng, rank);
        let a: SymmetricArray<f64, U1> = SymmetricArray::random(legs, U1(rng.random_range(-1..=1)), &mut rng).unwrap();

        let f = svd(&a, split, &FaerKernel, &SvdOptions::exact())
            .unwrap()
            .into_result()
            .unwrap();
        f.u.check_invariants().unwrap();
        f.vt.check_invariants().unwrap();
        // U carries no charge; the target moves to Vt
        assert_eq!(*f.u.target(), U1::identity());
        assert_eq!(f.vt.target(), a.target());
        assert!(rebuild(&f, split).approx_eq(&a, 1e-10), "seed {seed}");
    }
}

#[test]
fn test_complex_svd_reconstructs() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let legs = random_legs(&mut rng, 3);
    let a: SymmetricArray<Complex64, U1> = SymmetricArray::random(legs, U1(0), &mut rng).unwrap();
    let f = svd(&a, 2, &FaerKernel, &SvdOptions::exact())
        .unwrap()
        .into_result()
        .unwrap();
    assert!(rebuild(&f, 2).approx_eq(&a, 1e-10));
}

#[test]
fn test_max_rank_bounds_the_bond() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let legs = random_legs(&mut rng, 4);
    let a: SymmetricArray<f64, U1> = SymmetricArray::random(legs, U1(0), &mut rng).unwrap();
    let full = svd(&a, 2, &FaerKernel, &SvdOptions::exact())
        .unwrap()
        .into_result()
        .unwrap();

    for max_rank in 1..=full.bond.total_dim() {
        let f = svd(&a, 2, &FaerKernel, &SvdOptions::with_max_rank(max_rank))
            .unwrap()
            .into_result()
            .unwrap();
        assert!(f.bond.total_dim() <= max_rank);
        // discarded weight equals the squared reconstruction error
        let diff = rebuild(&f, 2);
        let err: f64 = a
            .to_dense()
            .unwrap()
            .as_slice()
            .iter()
            .zip(diff.to_dense().unwrap().as_slice())
            .map(|(x, y)| (x - y).powi(2))
            .sum();
        approx::assert_abs_diff_eq!(err, f.discarded_weight, epsilon = 1e-9);
    }
}

#[test]
fn test_decompose_keeps_the_norm() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let legs = random_legs(&mut rng, 3);
    let a: SymmetricArray<f64, U1> = SymmetricArray::random(legs, U1(0), &mut rng).unwrap();
    let f = decompose(&a, 1, &FaerKernel, &SvdOptions::exact())
        .unwrap()
        .into_result()
        .unwrap();
    approx::assert_abs_diff_eq!(f.weight, 1.0, epsilon = 1e-12);
    approx::assert_relative_eq!(f.right.norm_sqr(), a.norm_sqr(), max_relative = 1e-10);
}
