//! Engine-wide settings. Kept in its own test binary because it mutates
//! process-wide state.

use qnblock::{defaults, shape_of, svd, ContractOptions, FaerKernel, Leg, SvdOptions, SymmetricArray, U1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn test_settings_reach_default_options() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let s = shape_of([(U1(0), 2), (U1(1), 2)]).unwrap();
    let legs = vec![Leg::plus(s.clone()), Leg::plus(s.clone()), Leg::minus(s.clone()), Leg::minus(s)];
    let a: SymmetricArray<f64, U1> = SymmetricArray::random(legs, U1(0), &mut rng).unwrap();

    let full = svd(&a, 2, &FaerKernel, &SvdOptions::exact())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(full.s.len(), 16);

    defaults().set_svd_max_rank(Some(2)).unwrap();
    defaults().set_parallel(false);
    let capped = svd(&a, 2, &FaerKernel, &SvdOptions::default())
        .unwrap()
        .into_result()
        .unwrap();
    let opts = ContractOptions::default();
    // an explicit cap still wins over the setting
    let explicit = svd(&a, 2, &FaerKernel, &SvdOptions::with_max_rank(3))
        .unwrap()
        .into_result()
        .unwrap();
    defaults().reset();

    assert_eq!(capped.s.len(), 2);
    assert_eq!(explicit.s.len(), 3);
    assert!(!opts.parallel);
    assert!(ContractOptions::default().parallel);
}
