//! End-to-end scenarios on small, hand-checkable arrays.

mod common;

use common::Instrumented;
use qnblock::{
    contract, shape_of, svd, ArgList, ContractOptions, DenseBlock, FaerKernel, Layout, Leg, MergeInfo, ParticleSpin,
    Product, QnError, RankSignature, Request, SvdOptions, SymmetricArray, Zn, U1,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn test_merge_two_legs_into_one_sector() {
    // Legs (+, -) both over {0: 2, 1: 3} with target 0.
    let s = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
    let a = SymmetricArray::<f64, U1>::zeros(vec![Leg::plus(s.clone()), Leg::minus(s)], U1(0)).unwrap();

    let coords: Vec<Vec<usize>> = a.blocks().map(|(c, _)| c.to_vec()).collect();
    assert_eq!(coords, vec![vec![0, 0], vec![1, 1]]);

    let merged = MergeInfo::for_array(&a, &[0, 1]).unwrap();
    assert_eq!(merged.num_sectors(), 1);
    assert_eq!(*merged.merged_shape().label(0), U1(0));
    assert_eq!(merged.sector_extent(0), 13);

    let first = merged.locate(&[0, 0]).unwrap();
    assert_eq!((first.merged, first.range()), (0, 0..4));
    let second = merged.locate(&[1, 1]).unwrap();
    assert_eq!((second.merged, second.range()), (0, 4..13));
    assert!(merged.locate(&[0, 1]).is_none());
}

#[test]
fn test_gemm_inner_mismatch_is_rejected_before_the_kernel() {
    let a = DenseBlock::<f64>::zeros(&[4, 6]);
    let b = DenseBlock::<f64>::zeros(&[5, 3]);
    let mut c = DenseBlock::<f64>::zeros(&[4, 3]);
    let err = ArgList::build(Request::Contract {
        alpha: 1.0,
        a: &a,
        a_layout: Layout::ContractedLast,
        conj_a: false,
        b: &b,
        b_layout: Layout::ContractedFirst,
        conj_b: false,
        signature: RankSignature::new(1, 1, 1),
        beta: 0.0,
        c: &mut c,
    })
    .unwrap_err();
    assert!(err.to_string().contains("dimension k"), "{err}");
}

#[test]
fn test_incompatible_legs_make_no_kernel_calls() {
    let s = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
    let t = shape_of([(U1(0), 2), (U1(1), 4)]).unwrap();
    let a = SymmetricArray::<f64, U1>::zeros(vec![Leg::plus(s.clone()), Leg::minus(s.clone())], U1(0)).unwrap();
    let b = SymmetricArray::<f64, U1>::zeros(vec![Leg::plus(t.clone()), Leg::minus(t)], U1(0)).unwrap();

    let kernel = Instrumented::default();
    let err = contract(1.0, &a, &[1], &b, &[0], &kernel, &ContractOptions::default()).unwrap_err();
    assert!(matches!(err, QnError::LegMismatch { left: 1, right: 0, .. }));
    assert_eq!(kernel.calls(), 0);
}

#[test]
fn test_svd_failure_is_attributed_to_its_block() {
    // Row sectors {0: 2, 1: 3}; the column leg is inverted to {-1: 3, 0: 2},
    // so the 3x3 block sits at merged coordinate [1, 0].
    let s = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let a: SymmetricArray<f64, U1> =
        SymmetricArray::random(vec![Leg::plus(s.clone()), Leg::minus(s)], U1(0), &mut rng).unwrap();

    let kernel = Instrumented::failing_at(3);
    let outcome = svd(&a, 1, &kernel, &SvdOptions::exact()).unwrap();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].block, vec![1, 0]);

    let factors = outcome.value;
    assert_eq!(factors.bond.num_sectors(), 1);
    assert_eq!(*factors.bond.label(0), U1(0));
    assert_eq!(factors.bond.size(0), 2);
    assert!(matches!(
        svd(&a, 1, &kernel, &SvdOptions::exact()).unwrap().into_result(),
        Err(QnError::KernelFailures(_))
    ));
}

#[test]
fn test_cyclic_labels_wrap_around() {
    // Z3: 1 + 2 = 0, so a (+, +) pair of {0, 1, 2} legs has three blocks.
    let s = shape_of([(Zn::<3>::new(0), 1), (Zn::<3>::new(1), 2), (Zn::<3>::new(2), 1)]).unwrap();
    let a = SymmetricArray::<f64, Zn<3>>::zeros(vec![Leg::plus(s.clone()), Leg::plus(s)], Zn::new(0)).unwrap();
    let coords: Vec<Vec<usize>> = a.blocks().map(|(c, _)| c.to_vec()).collect();
    assert_eq!(coords, vec![vec![0, 0], vec![1, 2], vec![2, 1]]);
}

#[test]
fn test_product_labels_contract_like_dense() {
    type Q = Product<U1, Zn<2>>;
    let q = |n: i32, p: u32| Product(U1(n), Zn::<2>::new(p));
    let s = shape_of([(q(0, 0), 1), (q(1, 1), 2), (q(1, 0), 1)]).unwrap();
    let legs = vec![Leg::plus(s.clone()), Leg::minus(s.clone())];

    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let a: SymmetricArray<f64, Q> = SymmetricArray::random(legs.clone(), q(0, 0), &mut rng).unwrap();
    let b: SymmetricArray<f64, Q> = SymmetricArray::random(legs, q(0, 0), &mut rng).unwrap();
    let c = contract(1.0, &a, &[1], &b, &[0], &FaerKernel, &ContractOptions::default())
        .unwrap()
        .into_result()
        .unwrap();
    c.check_invariants().unwrap();

    let expected = common::dense_contract(&a.to_dense().unwrap(), &[1], &b.to_dense().unwrap(), &[0]);
    assert!(c.to_dense().unwrap().approx_eq(&expected, 1e-12));
}

#[test]
fn test_particle_spin_conservation() {
    // Two-site spinful fermions: the pair state with one particle and total
    // spin zero.
    let site = shape_of([
        (ParticleSpin::new(0, 0), 1),
        (ParticleSpin::new(1, 1), 1),
        (ParticleSpin::new(1, -1), 1),
        (ParticleSpin::new(2, 0), 1),
    ])
    .unwrap();
    let a = SymmetricArray::<f64, ParticleSpin>::zeros(
        vec![Leg::plus(site.clone()), Leg::plus(site)],
        ParticleSpin::new(2, 0),
    )
    .unwrap();
    // (0,0)+(2,0), (1,1)+(1,-1), (1,-1)+(1,1), (2,0)+(0,0)
    assert_eq!(a.num_blocks(), 4);
    for (coords, _) in a.blocks() {
        assert_eq!(a.composite_of(&coords), ParticleSpin::new(2, 0));
    }
}
