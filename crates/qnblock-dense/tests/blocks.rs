use qnblock_dense::extents::{linear_index, multi_index, volume};
use qnblock_dense::{DenseArray, DenseBlock, IndexedLoop, LegPartition, LoopOrder};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_extents(rng: &mut ChaCha8Rng) -> Vec<usize> {
    let rank = rng.random_range(0..=4);
    (0..rank).map(|_| rng.random_range(1..=4)).collect()
}

#[test]
fn test_row_major_loop_is_lexicographic() {
    for seed in 0..20 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let extents = random_extents(&mut rng);
        let coords: Vec<Vec<usize>> = IndexedLoop::new(&extents).map(|c| c.to_vec()).collect();
        assert_eq!(coords.len(), volume(&extents));
        assert!(coords.windows(2).all(|w| w[0] < w[1]));
        for (i, c) in coords.iter().enumerate() {
            assert_eq!(linear_index(c, &extents), i);
            assert_eq!(multi_index(i, &extents).as_slice(), c.as_slice());
        }
    }
}

#[test]
fn test_column_major_visits_the_same_set() {
    for seed in 0..20 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let extents = random_extents(&mut rng);
        let mut row: Vec<Vec<usize>> = IndexedLoop::new(&extents).map(|c| c.to_vec()).collect();
        let col: Vec<Vec<usize>> = IndexedLoop::with_order(&extents, LoopOrder::ColumnMajor)
            .map(|c| c.to_vec())
            .collect();
        // first axis varies fastest
        if extents.len() > 1 && extents[0] > 1 {
            assert_eq!(col[1][0], 1);
        }
        let mut sorted = col.clone();
        sorted.sort();
        row.sort();
        assert_eq!(sorted, row);
    }
}

#[test]
fn test_loop_restarts() {
    let mut it = IndexedLoop::new(&[2, 3]);
    assert_eq!(it.len(), 6);
    let first: Vec<_> = it.by_ref().take(4).collect();
    assert_eq!(it.len(), 2);
    it.reset();
    let again: Vec<_> = it.by_ref().take(4).collect();
    assert_eq!(first, again);
    assert_eq!(IndexedLoop::new(&[]).count(), 1);
    assert_eq!(IndexedLoop::new(&[3, 0, 2]).count(), 0);
}

#[test]
fn test_permute_then_inverse_is_identity() {
    for seed in 0..20 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let extents = random_extents(&mut rng);
        let block: DenseBlock<f64> = DenseBlock::random(&extents, &mut rng);
        let mut perm: Vec<usize> = (0..extents.len()).collect();
        perm.shuffle(&mut rng);
        let mut inverse = vec![0; perm.len()];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i;
        }

        let moved = block.permute(&perm).unwrap();
        for idx in IndexedLoop::new(&extents) {
            let target: Vec<usize> = perm.iter().map(|&p| idx[p]).collect();
            assert_eq!(moved.get(&target), block.get(&idx));
        }
        assert!(moved.permute(&inverse).unwrap().approx_eq(&block, 0.0));
    }
}

#[test]
fn test_regions_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut outer: DenseBlock<f64> = DenseBlock::random(&[5, 4, 3], &mut rng);
    let snapshot = outer.share();
    let piece = outer.extract_region(&[1, 2, 0], &[3, 2, 2]).unwrap();
    assert_eq!(piece.get(&[0, 0, 0]), outer.get(&[1, 2, 0]));
    assert_eq!(piece.get(&[2, 1, 1]), outer.get(&[3, 3, 1]));

    outer.insert_region(&[1, 2, 0], &DenseBlock::zeros(&[3, 2, 2])).unwrap();
    assert_eq!(outer.get(&[2, 3, 1]), 0.0);
    // the shared snapshot is unaffected by the write
    assert!(snapshot.extract_region(&[1, 2, 0], &[3, 2, 2]).unwrap().approx_eq(&piece, 0.0));
    assert!(outer.extract_region(&[5, 0, 0], &[1, 1, 1]).is_err());
}

#[test]
fn test_array_iterates_in_coordinate_order() {
    let parts = vec![LegPartition::new(vec![1, 2, 3]), LegPartition::new(vec![2, 2])];
    let mut a = DenseArray::<f64>::new(parts);
    for coords in [[2, 1], [0, 0], [1, 1], [2, 0]] {
        a.get_or_try_insert_zeros(&coords).unwrap().fill(1.0);
    }
    let order: Vec<Vec<usize>> = a.iter().map(|(c, _)| c.to_vec()).collect();
    assert_eq!(order, vec![vec![0, 0], vec![1, 1], vec![2, 0], vec![2, 1]]);
    assert_eq!(a.block_extents(&[2, 1]).as_slice(), &[3, 2]);

    let dense = a.to_dense().unwrap();
    assert_eq!(dense.extents(), &[6, 4]);
    // [0, 1] is absent and reads as zero
    assert_eq!(dense.get(&[0, 2]), 0.0);
    assert_eq!(dense.get(&[5, 3]), 1.0);
    assert_eq!(dense.norm_sqr(), (2 + 4 + 6 + 6) as f64);
}
