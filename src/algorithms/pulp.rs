// This file contains a k-way label propagation partitioner over the hypergraph of a matrix.
// # Reference
//
// Slota, George M., Kamesh Madduri, and Sivasankaran Rajamanickam. "PuLP: Scalable multi-objective
// multi-constraint partitioning for small-world networks." IEEE International Conference on Big Data
// (2014): 481-490.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

use crate::algorithms::Error;
use crate::cost::compute_imbalance_from_part_loads;
use crate::hypergraph::{Hypergraph, HypergraphModel};
use crate::matrix::{DistributedMatrix, SparseMatrix};
use crate::Partition;

/// Affinity of a vertex for a part holding `peers` of the `size` vertices of a net.
///
/// `ln((1 + z) / (1 - z))` with `z = 0.99 * (2 * peers / size - 1)`: positive
/// when the part holds most of the net, negative when it holds little of it.
pub fn pulp_affinity(peers: usize, size: usize) -> f64 {
    let z = 0.99 * (2.0 * peers as f64 / size as f64 - 1.0);
    ((1.0 + z) / (1.0 - z)).ln()
}

#[derive(Debug)]
struct Move {
    // The vertex that moved.
    vertex: usize,

    // The part it came from.
    partition_id: usize,
}

/// Volumes around a guarded refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefineSummary {
    pub volume_before: usize,
    pub volume_after: usize,
    pub reassignments: usize,
    /// The refinement raised the volume and was undone.
    pub rolled_back: bool,
}

/// Outcome of a full PuLP partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PulpSummary {
    pub volume: usize,
    pub imbalance: f64,
    pub reassignments: usize,
}

/// A PuLP run in progress: the hypergraph of the matrix being partitioned
/// together with the balance bound and the random source of the run.
pub struct PulpSession<'a> {
    hypergraph: Hypergraph<'a>,
    max_part_size: usize,
    refine_iterations: usize,
    randomize: bool,
    rng: SmallRng,
}

impl<'a> PulpSession<'a> {
    pub fn hypergraph(&self) -> &Hypergraph<'a> {
        &self.hypergraph
    }

    pub fn matrix(&self) -> &DistributedMatrix {
        self.hypergraph.matrix()
    }

    /// Largest number of nonzeros a part may receive: `ceil(nnz / P) * (1 + epsilon)`.
    pub fn max_part_size(&self) -> usize {
        self.max_part_size
    }

    /// Refine with a growing window of the smallest nets: first only the
    /// smallest one, doubling while the window is below half the net count.
    pub fn initial_partitioning(&mut self, iterations: usize) -> usize {
        self.hypergraph.sort_nets_by_size();
        let maximum_net_count = self.hypergraph.net_count() / 2;

        let mut reassignments = 0;
        let mut nets_to_consider = 1;
        while nets_to_consider < maximum_net_count {
            reassignments += self.refine_with_iterations(iterations, None, Some(nets_to_consider), self.randomize);
            nets_to_consider *= 2;
        }

        debug!(reassignments, "initial partitioning done");
        reassignments
    }

    /// Sweep over all vertices, moving each to the part with the highest
    /// affinity if that part has room, until a sweep moves nothing or
    /// `iterations` sweeps have run. Returns the number of moves.
    pub fn refine_with_iterations(
        &mut self,
        iterations: usize,
        max_net_size: Option<usize>,
        nets_to_consider: Option<usize>,
        randomize: bool,
    ) -> usize {
        let reassignments = self.sweep(iterations, max_net_size, nets_to_consider, randomize, None);
        self.hypergraph.compact();
        reassignments
    }

    /// Refine with the default budget, undoing the refinement if it would
    /// raise the communication volume.
    pub fn refine(&mut self) -> Result<RefineSummary, Error> {
        let volume_before = self.matrix().communication_volume()?;

        let mut moves = Vec::new();
        let (iterations, randomize) = (self.refine_iterations, self.randomize);
        let reassignments = self.sweep(iterations, None, None, randomize, Some(&mut moves));
        let mut volume_after = self.matrix().communication_volume()?;

        let rolled_back = volume_after > volume_before;
        if rolled_back {
            for undo in moves.iter().rev() {
                self.hypergraph.reassign(undo.vertex, undo.partition_id);
            }
            volume_after = self.matrix().communication_volume()?;
            debug!(volume_before, rejected = volume_after, "refinement rolled back");
        }
        self.hypergraph.compact();

        Ok(RefineSummary {
            volume_before,
            volume_after,
            reassignments,
            rolled_back,
        })
    }

    fn sweep(
        &mut self,
        iterations: usize,
        max_net_size: Option<usize>,
        nets_to_consider: Option<usize>,
        randomize: bool,
        mut log: Option<&mut Vec<Move>>,
    ) -> usize {
        let mut order: Vec<usize> = (0..self.hypergraph.vertex_count()).collect();
        let mut total = 0;

        for _ in 0..iterations {
            if randomize {
                order.shuffle(&mut self.rng);
            }

            let mut reassigned = 0;
            for &vertex in &order {
                let quality = self
                    .hypergraph
                    .part_quality(vertex, pulp_affinity, max_net_size, nets_to_consider);
                let current = self.hypergraph.part(vertex);
                let best = best_part(&quality, current);

                if best != current
                    && self.hypergraph.part_size(best) + self.hypergraph.weight(vertex) <= self.max_part_size
                {
                    self.hypergraph.reassign(vertex, best);
                    if let Some(log) = log.as_deref_mut() {
                        log.push(Move {
                            vertex,
                            partition_id: current,
                        });
                    }
                    reassigned += 1;
                }
            }

            total += reassigned;
            if reassigned == 0 {
                break;
            }
        }

        total
    }
}

// The part with the highest quality; the current part wins ties.
fn best_part(quality: &[f64], current: usize) -> usize {
    let mut best = current;
    for (part, &q) in quality.iter().enumerate() {
        if q > quality[best] {
            best = part;
        }
    }
    best
}

fn part_imbalance(hypergraph: &Hypergraph<'_>) -> f64 {
    let part_sizes: Vec<usize> = (0..hypergraph.part_count()).map(|p| hypergraph.part_size(p)).collect();
    compute_imbalance_from_part_loads(&part_sizes)
}

// Spread the vertices of a single-processor matrix uniformly over `procs`
// parts, then, for bipartitions, move the lightest vertices out of the larger
// part until the balance bound holds.
fn random_reset<'a>(
    matrix: &'a mut DistributedMatrix,
    model: HypergraphModel,
    procs: usize,
    epsilon: f64,
    rng: &mut SmallRng,
) -> Result<Hypergraph<'a>, Error> {
    matrix.grow_procs(procs);
    let mut hypergraph = Hypergraph::new(matrix, model)?;

    for vertex in 0..hypergraph.vertex_count() {
        let target = rng.gen_range(0..procs);
        if target != hypergraph.part(vertex) {
            hypergraph.reassign(vertex, target);
        }
    }

    let bound = 1.0 + epsilon;
    if part_imbalance(&hypergraph) > bound {
        if procs > 2 {
            let imbalance = part_imbalance(&hypergraph);
            error!(imbalance, procs, "random initial distribution is out of balance");
            return Err(Error::InfeasibleBalance { imbalance, epsilon });
        }

        let large_part = if hypergraph.part_size(1) > hypergraph.part_size(0) { 1 } else { 0 };
        let mut vertices: Vec<usize> = (0..hypergraph.vertex_count())
            .filter(|&vertex| hypergraph.part(vertex) == large_part)
            .collect();
        vertices.sort_by_key(|&vertex| hypergraph.weight(vertex));

        for vertex in vertices {
            if part_imbalance(&hypergraph) <= bound {
                break;
            }
            hypergraph.reassign(vertex, 1 - large_part);
        }

        let imbalance = part_imbalance(&hypergraph);
        if imbalance > bound {
            error!(imbalance, epsilon, "cannot find a valid initial distribution");
            return Err(Error::InfeasibleBalance { imbalance, epsilon });
        }
    }

    hypergraph.compact();
    Ok(hypergraph)
}

/// PuLP Partitioner
///
/// A k-way label propagation partitioner: every vertex of the hypergraph of
/// the matrix moves to the part its nets are most concentrated in, as long as
/// that part stays below the balance bound.
///
/// # Example
///
/// ```rust
/// use rand::rngs::SmallRng;
/// use rand::SeedableRng;
/// use HyperCut::algorithms::PulpPartitioner;
/// use HyperCut::gen_matrix::gen_random_matrix;
/// use HyperCut::hypergraph::HypergraphModel;
/// use HyperCut::Partition;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
///     let mut rng = SmallRng::seed_from_u64(5);
///     let mut matrix = gen_random_matrix(100, 100, 1, 0.05, &mut rng);
///
///     let summary = PulpPartitioner { model: HypergraphModel::RowNet, seed: Some(5), ..Default::default() }
///         .partition(&mut matrix)?;
///
///     assert_eq!(summary.volume, matrix.communication_volume()?);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PulpPartitioner {
    /// Number of parts.
    pub procs: usize,

    /// Allowed load imbalance.
    pub epsilon: f64,

    /// Which hypergraph the labels propagate over.
    pub model: HypergraphModel,

    /// Sweeps per window of the staged initial partitioning.
    pub initial_iterations: usize,

    /// Sweeps of the final refinement.
    pub refine_iterations: usize,

    /// Visit vertices in a random order instead of index order.
    pub randomize: bool,

    /// Seed for the initial distribution and the visiting order.
    pub seed: Option<u64>,
}

impl Default for PulpPartitioner {
    fn default() -> Self {
        PulpPartitioner {
            procs: 2,
            epsilon: 0.1,
            model: HypergraphModel::FineGrain,
            initial_iterations: 10,
            refine_iterations: 100,
            randomize: false,
            seed: None,
        }
    }
}

impl PulpPartitioner {
    /// Build the hypergraph of `matrix`. A matrix on a single processor is
    /// first spread at random over `procs` parts; any other matrix must
    /// already have `procs` images and keeps its distribution.
    pub fn initialize<'a>(&self, matrix: &'a mut DistributedMatrix) -> Result<PulpSession<'a>, Error> {
        if !matrix.is_initialized() {
            error!("PuLP partitioning of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }
        if self.procs == 0 || (matrix.procs() != 1 && matrix.procs() != self.procs) {
            error!(procs = self.procs, images = matrix.procs(), "PuLP processor count does not fit the matrix");
            return Err(Error::InvalidProcessorCount { procs: self.procs });
        }

        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        // Rounding up the per-part share may not lift parts past (1 + epsilon)
        // times the average load.
        let nonzeros = matrix.nonzeros();
        let rounded_share = ((nonzeros + self.procs - 1) / self.procs) as f64 * (1.0 + self.epsilon);
        let exact_share = nonzeros as f64 * (1.0 + self.epsilon) / self.procs as f64;
        let max_part_size = rounded_share.min(exact_share);

        let hypergraph = if matrix.procs() == 1 {
            random_reset(matrix, self.model, self.procs, self.epsilon, &mut rng)?
        } else {
            Hypergraph::new(matrix, self.model)?
        };

        Ok(PulpSession {
            hypergraph,
            max_part_size: max_part_size.floor() as usize,
            refine_iterations: self.refine_iterations,
            randomize: self.randomize,
            rng,
        })
    }
}

impl<'a> Partition<&'a mut DistributedMatrix> for PulpPartitioner {
    type Metadata = PulpSummary;
    type Error = Error;

    fn partition(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        let reassignments = {
            let mut session = self.initialize(matrix)?;
            let initial = session.initial_partitioning(self.initial_iterations);
            initial + session.refine()?.reassignments
        };

        let summary = PulpSummary {
            volume: matrix.communication_volume()?,
            imbalance: matrix.load_imbalance()?,
            reassignments,
        };
        info!(
            volume = summary.volume,
            imbalance = summary.imbalance,
            reassignments,
            "PuLP partitioning done"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::gen_matrix::gen_random_matrix;
    use crate::matrix::{DistributionScheme, Triplet};

    fn sorted_triplets(matrix: &DistributedMatrix) -> Vec<(usize, usize, u64)> {
        let mut triplets: Vec<(usize, usize, u64)> = matrix
            .triplets()
            .map(|t| (t.row, t.col, t.value.to_bits()))
            .collect();
        triplets.sort_unstable();
        triplets
    }

    #[test]
    fn test_pulp_affinity() {
        assert_relative_eq!(pulp_affinity(1, 2), 0.0);
        assert_relative_eq!(pulp_affinity(2, 2), (1.99f64 / 0.01).ln(), epsilon = 1e-9);
        assert_relative_eq!(pulp_affinity(0, 2), -(1.99f64 / 0.01).ln(), epsilon = 1e-9);
        assert!(pulp_affinity(3, 4) > pulp_affinity(2, 4));
    }

    #[test]
    fn test_best_part_keeps_current_on_ties() {
        assert_eq!(best_part(&[1.0, 1.0, 0.5], 1), 1);
        assert_eq!(best_part(&[1.0, 2.0, 2.0], 0), 1);
        assert_eq!(best_part(&[0.0, 0.0], 0), 0);
    }

    #[test]
    fn test_generous_balance_keeps_every_nonzero() {
        // Arrange
        let mut rng = SmallRng::seed_from_u64(2);
        let mut matrix = gen_random_matrix(50, 50, 1, 0.1, &mut rng);
        let before = sorted_triplets(&matrix);

        // Act
        let summary = PulpPartitioner {
            procs: 2,
            epsilon: 2.0,
            seed: Some(2),
            ..Default::default()
        }
        .partition(&mut matrix)
        .unwrap();

        // Assert
        assert_eq!(sorted_triplets(&matrix), before);
        assert_eq!(matrix.procs(), 2);
        assert_eq!(summary.volume, matrix.communication_volume().unwrap());
    }

    #[test]
    fn test_single_part_has_no_volume() {
        // Arrange
        let mut rng = SmallRng::seed_from_u64(8);
        let mut matrix = gen_random_matrix(30, 30, 1, 0.2, &mut rng);

        // Act
        let summary = PulpPartitioner {
            procs: 1,
            seed: Some(8),
            ..Default::default()
        }
        .partition(&mut matrix)
        .unwrap();

        // Assert
        assert_eq!(summary.volume, 0);
        assert_eq!(summary.reassignments, 0);
        assert_eq!(matrix.procs(), 1);
    }

    #[test]
    fn test_refine_never_increases_volume() {
        // Arrange
        let mut rng = SmallRng::seed_from_u64(6);
        let mut matrix = gen_random_matrix(60, 60, 4, 0.08, &mut rng);
        let partitioner = PulpPartitioner {
            procs: 4,
            epsilon: 0.3,
            randomize: true,
            seed: Some(6),
            ..Default::default()
        };
        let mut session = partitioner.initialize(&mut matrix).unwrap();

        // Act
        let mut summaries = Vec::new();
        for _ in 0..5 {
            summaries.push(session.refine().unwrap());
        }

        // Assert
        for summary in summaries {
            assert!(summary.volume_after <= summary.volume_before);
        }
    }

    #[test]
    fn test_moves_respect_max_part_size() {
        // Arrange
        let mut rng = SmallRng::seed_from_u64(12);
        let mut matrix = gen_random_matrix(80, 80, 1, 0.06, &mut rng);
        let partitioner = PulpPartitioner {
            procs: 2,
            epsilon: 0.1,
            model: HypergraphModel::ColumnNet,
            seed: Some(12),
            ..Default::default()
        };

        // Act
        let mut session = partitioner.initialize(&mut matrix).unwrap();
        let max_part_size = session.max_part_size();
        let largest_before = (0..2).map(|p| session.hypergraph().part_size(p)).max().unwrap();
        session.initial_partitioning(10);
        session.refine().unwrap();

        // Assert
        let largest = session.matrix().images().iter().map(|image| image.nonzeros()).max().unwrap();
        assert!(largest_before <= max_part_size);
        assert!(largest <= max_part_size);
        let rows_in_both = session.matrix().images()[0]
            .row_set()
            .keys()
            .filter(|row| session.matrix().images()[1].row_set().contains_key(row))
            .count();
        assert_eq!(rows_in_both, 0);
    }

    #[test]
    fn test_odd_nonzero_count_stays_within_epsilon() {
        // Arrange
        let mut matrix = crate::gen_matrix::eye(119, 1);
        let partitioner = PulpPartitioner {
            procs: 2,
            epsilon: 0.3,
            seed: Some(25),
            ..Default::default()
        };

        // Act
        let mut session = partitioner.initialize(&mut matrix).unwrap();
        let max_part_size = session.max_part_size();
        session.initial_partitioning(partitioner.initial_iterations);
        session.refine_with_iterations(10, None, None, false);

        // Assert
        assert_eq!(max_part_size, 77);
        assert!(session.matrix().load_imbalance().unwrap() <= 1.3 + 1e-9);
    }

    #[test]
    fn test_mismatched_processor_count() {
        let triplets = (0..4).map(|i| Triplet::new(i, i, 1.0));
        let mut matrix = DistributedMatrix::from_triplets(4, 4, 3, triplets, &DistributionScheme::Cyclic).unwrap();
        let result = PulpPartitioner::default().partition(&mut matrix);
        assert!(matches!(result, Err(Error::InvalidProcessorCount { procs: 2 })));
        assert_eq!(matrix.procs(), 3);
    }

    #[test]
    fn test_infeasible_balance_for_many_parts() {
        // A single heavy row cannot be spread over four parts.
        let triplets = (0..8).map(|col| Triplet::new(0, col, 1.0));
        let mut matrix = DistributedMatrix::from_triplets(2, 8, 1, triplets, &DistributionScheme::Cyclic).unwrap();
        let result = PulpPartitioner {
            procs: 4,
            epsilon: 0.0,
            model: HypergraphModel::ColumnNet,
            seed: Some(1),
            ..Default::default()
        }
        .partition(&mut matrix);
        assert!(matches!(result, Err(Error::InfeasibleBalance { .. })));
    }
}
