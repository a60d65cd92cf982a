use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use HyperCut::algorithms::{
    CyclicKind, CyclicPartitioner, GreedyVectorPartitioner, KernighanLinPartitioner, MediumGrainPartitioner,
    MultiLevelPartitioner, PulpPartitioner,
};
use HyperCut::gen_matrix::gen_random_matrix;
use HyperCut::hypergraph::HypergraphModel;
use HyperCut::matrix::{DistributedMatrix, SparseMatrix};
use HyperCut::vector::DistributedVector;
use HyperCut::{Partition, Refine};

fn sorted_triplets(matrix: &DistributedMatrix) -> Vec<(usize, usize, u64)> {
    let mut triplets: Vec<(usize, usize, u64)> = matrix
        .triplets()
        .map(|t| (t.row, t.col, t.value.to_bits()))
        .collect();
    triplets.sort_unstable();
    triplets
}

fn random_matrix(rows: usize, cols: usize, procs: usize, density: f64, seed: u64) -> DistributedMatrix {
    let mut rng = SmallRng::seed_from_u64(seed);
    gen_random_matrix(rows, cols, procs, density, &mut rng)
}

fn model_strategy() -> impl Strategy<Value = HypergraphModel> {
    prop_oneof![
        Just(HypergraphModel::FineGrain),
        Just(HypergraphModel::RowNet),
        Just(HypergraphModel::ColumnNet),
        Just(HypergraphModel::MediumGrain),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn partitioners_keep_every_nonzero(
        rows in 10usize..40,
        cols in 10usize..40,
        density in 0.05f64..0.4,
        seed in any::<u64>(),
    ) {
        let original = random_matrix(rows, cols, 1, density, seed);
        prop_assume!(original.nonzeros() > 0);
        let expected = sorted_triplets(&original);

        let mut matrix = original.clone();
        KernighanLinPartitioner { seed: Some(seed), ..Default::default() }.partition(&mut matrix).unwrap();
        prop_assert_eq!(sorted_triplets(&matrix), expected.clone());

        let mut matrix = original.clone();
        MediumGrainPartitioner::new(0.1, Some(seed)).partition(&mut matrix).unwrap();
        prop_assert_eq!(sorted_triplets(&matrix), expected.clone());

        let mut matrix = original.clone();
        MultiLevelPartitioner { coarsest_size: 8, seed: Some(seed), ..Default::default() }
            .partition(&mut matrix)
            .unwrap();
        prop_assert_eq!(sorted_triplets(&matrix), expected.clone());

        let mut matrix = original.clone();
        CyclicPartitioner { procs: 3, kind: CyclicKind::Column }.partition(&mut matrix).unwrap();
        prop_assert_eq!(sorted_triplets(&matrix), expected.clone());

        let mut matrix = original;
        PulpPartitioner { epsilon: 2.0, seed: Some(seed), ..Default::default() }.partition(&mut matrix).unwrap();
        prop_assert_eq!(matrix.nonzeros(), expected.len());
        prop_assert_eq!(sorted_triplets(&matrix), expected);
    }

    #[test]
    fn refinement_never_increases_volume(
        size in 10usize..40,
        density in 0.05f64..0.3,
        seed in any::<u64>(),
        model in model_strategy(),
    ) {
        let mut matrix = random_matrix(size, size, 2, density, seed);
        prop_assume!(matrix.nonzeros() > 0);

        let mut medium_grain = MediumGrainPartitioner::new(0.2, Some(seed));
        for _ in 0..4 {
            let summary = medium_grain.refine(&mut matrix).unwrap();
            prop_assert!(summary.volume_after <= summary.volume_before);
            prop_assert_eq!(summary.volume_after, matrix.communication_volume().unwrap());
        }

        let partitioner = PulpPartitioner { epsilon: 0.5, model, randomize: true, seed: Some(seed), ..Default::default() };
        let mut session = partitioner.initialize(&mut matrix).unwrap();
        for _ in 0..3 {
            let summary = session.refine().unwrap();
            prop_assert!(summary.volume_after <= summary.volume_before);
        }
    }

    #[test]
    fn pulp_respects_the_balance_bound(
        size in 20usize..50,
        density in 0.1f64..0.3,
        epsilon in 0.1f64..0.5,
        seed in any::<u64>(),
    ) {
        let mut matrix = random_matrix(size, size, 1, density, seed);
        let nonzeros = matrix.nonzeros();
        prop_assume!(nonzeros >= 20);

        let partitioner = PulpPartitioner { epsilon, seed: Some(seed), ..Default::default() };
        let mut session = partitioner.initialize(&mut matrix).unwrap();
        let max_part_size = session.max_part_size();
        session.initial_partitioning(partitioner.initial_iterations);
        session.refine_with_iterations(10, None, None, false);

        let largest = session.matrix().images().iter().map(|image| image.nonzeros()).max().unwrap();
        prop_assert!(largest <= max_part_size);
        prop_assert_eq!(session.matrix().nonzeros(), nonzeros);
        prop_assert!(session.matrix().load_imbalance().unwrap() <= 1.0 + epsilon + 1e-9);
    }

    #[test]
    fn one_part_has_no_volume(
        rows in 5usize..30,
        cols in 5usize..30,
        density in 0.05f64..0.5,
        seed in any::<u64>(),
        model in model_strategy(),
    ) {
        let mut matrix = random_matrix(rows, cols, 1, density, seed);
        prop_assume!(matrix.nonzeros() > 0);
        let summary = PulpPartitioner { procs: 1, model, seed: Some(seed), ..Default::default() }
            .partition(&mut matrix)
            .unwrap();
        prop_assert_eq!(summary.volume, 0);
        prop_assert_eq!(matrix.communication_volume().unwrap(), 0);
    }

    #[test]
    fn vector_owners_are_disjoint_and_total(
        size in 5usize..40,
        procs in 1usize..6,
        density in 0.05f64..0.5,
        seed in any::<u64>(),
    ) {
        let mut matrix = random_matrix(size, size, procs, density, seed);
        let mut v = DistributedVector::new(size, 1.0);
        let mut u = DistributedVector::new(size, 0.0);

        let counts = GreedyVectorPartitioner::new(&mut matrix, &mut v, &mut u).partition().unwrap();

        prop_assert_eq!(counts.iter().sum::<usize>(), size);
        prop_assert_eq!(v.owned_counts(procs), counts);
        prop_assert_eq!(u.owners(), v.owners());
        prop_assert!(v.owners().iter().all(|&owner| owner < procs));
    }
}
