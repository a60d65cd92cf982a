// This file contains a single-move Kernighan-Lin/Fiduccia-Mattheyses style bipartitioner over the
// row-net hypergraph of a matrix: columns are the vertices, rows are the nets.
// # Reference
//
// Fiduccia, C. M., and R. M. Mattheyses. "A linear-time heuristic for improving network partitions."
// 19th Design Automation Conference (1982): 175-181.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::algorithms::Error;
use crate::hypergraph::RowColumnNets;
use crate::matrix::{DistributedMatrix, SparseMatrix};
use crate::Partition;

/// Gain, in (lambda - 1) volume, that a single row contributes to a column if
/// the column changes side.
///
/// `count_in_a` is the number of the row's columns on side A, `size` the
/// number of columns in the row.
pub fn gain_for_pin_in_row(in_a: bool, count_in_a: usize, size: usize) -> i64 {
    if size == 1 {
        return 0;
    }

    if (in_a && count_in_a == 1) || (!in_a && count_in_a == size - 1) {
        1
    } else if count_in_a == 0 || count_in_a == size {
        -1
    } else {
        0
    }
}

// Columns bucketed by gain. Every bucket is a doubly linked list threaded
// through `next`/`prev`, so moving a column between buckets is O(1).
#[derive(Debug, Clone)]
struct GainBuckets {
    max_gain: i64,
    heads: Vec<Option<usize>>,
    tails: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
    prev: Vec<Option<usize>>,
    bucket: Vec<Option<usize>>,
}

impl GainBuckets {
    fn new(vertices: usize, max_gain: usize) -> Self {
        let buckets = 2 * max_gain + 1;
        Self {
            max_gain: max_gain as i64,
            heads: vec![None; buckets],
            tails: vec![None; buckets],
            next: vec![None; vertices],
            prev: vec![None; vertices],
            bucket: vec![None; vertices],
        }
    }

    fn clear(&mut self) {
        self.heads.iter_mut().for_each(|h| *h = None);
        self.tails.iter_mut().for_each(|t| *t = None);
        self.next.iter_mut().for_each(|n| *n = None);
        self.prev.iter_mut().for_each(|p| *p = None);
        self.bucket.iter_mut().for_each(|b| *b = None);
    }

    fn slot(&self, gain: i64) -> usize {
        debug_assert!(gain.abs() <= self.max_gain);
        (gain + self.max_gain) as usize
    }

    fn push_back(&mut self, vertex: usize, gain: i64) {
        let slot = self.slot(gain);
        self.prev[vertex] = self.tails[slot];
        self.next[vertex] = None;
        match self.tails[slot] {
            Some(tail) => self.next[tail] = Some(vertex),
            None => self.heads[slot] = Some(vertex),
        }
        self.tails[slot] = Some(vertex);
        self.bucket[vertex] = Some(slot);
    }

    fn remove(&mut self, vertex: usize) {
        let Some(slot) = self.bucket[vertex].take() else {
            return;
        };
        match self.prev[vertex] {
            Some(prev) => self.next[prev] = self.next[vertex],
            None => self.heads[slot] = self.next[vertex],
        }
        match self.next[vertex] {
            Some(next) => self.prev[next] = self.prev[vertex],
            None => self.tails[slot] = self.prev[vertex],
        }
        self.prev[vertex] = None;
        self.next[vertex] = None;
    }

    fn update(&mut self, vertex: usize, gain: i64) {
        if self.bucket[vertex] != Some(self.slot(gain)) {
            self.remove(vertex);
            self.push_back(vertex, gain);
        }
    }

    // (gain, vertex) pairs from the highest bucket down, oldest first within a bucket.
    fn iter_descending(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        (0..self.heads.len()).rev().flat_map(move |slot| {
            let gain = slot as i64 - self.max_gain;
            std::iter::successors(self.heads[slot], move |&vertex| self.next[vertex])
                .map(move |vertex| (gain, vertex))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernighanLinState {
    /// A split is in place and the last pass still found a positive gain.
    Initialized,
    /// The last pass could not improve the split.
    Converged,
}

/// Outcome of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    /// Columns flipped during the pass, including the ones rolled back.
    pub moves: usize,
    /// Volume saved by the split that was kept.
    pub best_gain: i64,
    /// The pass stopped early because no column could move without breaking the balance.
    pub exhausted: bool,
}

/// Outcome of a series of passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernighanLinSummary {
    pub passes: usize,
    pub total_gain: i64,
    pub converged: bool,
}

/// A column bipartitioning of a matrix, improved pass by pass.
///
/// Side A is processor 0, side B processor 1. After every pass the best split
/// seen is written back to the matrix, which then holds exactly two images.
pub struct KernighanLin<'a> {
    matrix: &'a mut DistributedMatrix,
    nets: RowColumnNets,
    state: KernighanLinState,
    allowed_size: usize,
    column_in_a: Vec<bool>,
    column_weights: Vec<usize>,
    row_count_a: Vec<usize>,
    counts: [usize; 2],
    gains: Vec<i64>,
    buckets: GainBuckets,
    dirty: Vec<usize>,
}

impl<'a> KernighanLin<'a> {
    /// Set up the first split. A matrix that is already bipartitioned keeps
    /// the columns of image 0 on side A; otherwise every column picks a side
    /// at random.
    pub fn new<R: Rng>(matrix: &'a mut DistributedMatrix, epsilon: f64, rng: &mut R) -> Result<Self, Error> {
        if !matrix.is_initialized() {
            error!("Kernighan-Lin on an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }

        let cols = matrix.cols();
        let column_in_a: Vec<bool> = if matrix.procs() == 2 {
            let image = &matrix.images()[0];
            (0..cols).map(|col| image.col_set().contains_key(&col)).collect()
        } else {
            (0..cols).map(|_| rng.gen_bool(0.5)).collect()
        };

        let nets = RowColumnNets::from_matrix(&*matrix);
        let max_gain = nets.col_nets.iter().map(Vec::len).max().unwrap_or(0);
        let allowed_size = (0.5 * matrix.nonzeros() as f64 * (1.0 + epsilon)).floor() as usize;

        let mut kernighan_lin = Self {
            column_weights: matrix.column_weights(),
            row_count_a: vec![0; matrix.rows()],
            matrix,
            nets,
            state: KernighanLinState::Initialized,
            allowed_size,
            column_in_a,
            counts: [0, 0],
            gains: vec![0; cols],
            buckets: GainBuckets::new(cols, max_gain),
            dirty: Vec::new(),
        };
        kernighan_lin.reset_gains();

        debug!(
            cols,
            allowed_size,
            max_gain,
            size_a = kernighan_lin.counts[0],
            size_b = kernighan_lin.counts[1],
            "Kernighan-Lin initialized"
        );
        Ok(kernighan_lin)
    }

    pub fn state(&self) -> KernighanLinState {
        self.state
    }

    pub fn matrix(&self) -> &DistributedMatrix {
        &*self.matrix
    }

    pub fn column_in_a(&self) -> &[bool] {
        &self.column_in_a
    }

    pub fn allowed_size(&self) -> usize {
        self.allowed_size
    }

    /// Current gain of flipping `col`.
    pub fn gain(&self, col: usize) -> i64 {
        self.gains[col]
    }

    /// Run one pass: flip up to one column per column of the matrix, always
    /// the best one that keeps its destination within the allowed size, then
    /// keep the best prefix of those flips.
    pub fn run(&mut self) -> PassSummary {
        let cols = self.column_in_a.len();
        let mut flipped = Vec::with_capacity(cols);
        let mut net_gain = 0;
        let mut best_gain = 0;
        let mut best_len = 0;
        let mut exhausted = false;

        for _ in 0..cols {
            let Some((cell, gain)) = self.select_base_cell() else {
                warn!(moves = flipped.len(), "no viable base cell found");
                exhausted = true;
                break;
            };

            self.flip(cell);
            flipped.push(cell);
            net_gain += gain;

            if net_gain > best_gain {
                best_gain = net_gain;
                best_len = flipped.len();
            }
        }

        for &cell in &flipped[best_len..] {
            self.column_in_a[cell] = !self.column_in_a[cell];
        }
        self.reset_gains();
        self.write_back();

        self.state = if best_gain > 0 {
            KernighanLinState::Initialized
        } else {
            KernighanLinState::Converged
        };

        debug!(
            moves = flipped.len(),
            kept = best_len,
            best_gain,
            size_a = self.counts[0],
            size_b = self.counts[1],
            "Kernighan-Lin pass done"
        );

        PassSummary {
            moves: flipped.len(),
            best_gain,
            exhausted,
        }
    }

    /// Run passes until one finds nothing to gain, at most `max_passes` of them.
    pub fn run_to_convergence(&mut self, max_passes: usize) -> KernighanLinSummary {
        let mut summary = KernighanLinSummary::default();
        while summary.passes < max_passes && self.state != KernighanLinState::Converged {
            let pass = self.run();
            summary.passes += 1;
            summary.total_gain += pass.best_gain;
        }
        summary.converged = self.state == KernighanLinState::Converged;
        summary
    }

    fn select_base_cell(&self) -> Option<(usize, i64)> {
        self.buckets.iter_descending().find_map(|(gain, col)| {
            let destination = if self.column_in_a[col] { 1 } else { 0 };
            if self.counts[destination] + self.column_weights[col] > self.allowed_size {
                None
            } else {
                Some((col, gain))
            }
        })
    }

    fn flip(&mut self, cell: usize) {
        let Self {
            nets,
            column_in_a,
            column_weights,
            row_count_a,
            counts,
            gains,
            buckets,
            dirty,
            ..
        } = self;

        // Take out the old contribution of every row the cell is part of.
        for &row in &nets.col_nets[cell] {
            let net = &nets.row_nets[row];
            for &pin in net {
                gains[pin] -= gain_for_pin_in_row(column_in_a[pin], row_count_a[row], net.len());
            }
        }

        let from_a = column_in_a[cell];
        column_in_a[cell] = !from_a;
        let weight = column_weights[cell];
        for &row in &nets.col_nets[cell] {
            if from_a {
                row_count_a[row] -= 1;
            } else {
                row_count_a[row] += 1;
            }
        }
        if from_a {
            counts[0] -= weight;
            counts[1] += weight;
        } else {
            counts[1] -= weight;
            counts[0] += weight;
        }

        for &row in &nets.col_nets[cell] {
            let net = &nets.row_nets[row];
            for &pin in net {
                gains[pin] += gain_for_pin_in_row(column_in_a[pin], row_count_a[row], net.len());
                dirty.push(pin);
            }
        }

        for pin in dirty.drain(..) {
            buckets.update(pin, gains[pin]);
        }
    }

    fn reset_gains(&mut self) {
        let Self {
            nets,
            column_in_a,
            column_weights,
            row_count_a,
            counts,
            gains,
            buckets,
            ..
        } = self;

        *counts = [0, 0];
        for (col, &in_a) in column_in_a.iter().enumerate() {
            counts[if in_a { 0 } else { 1 }] += column_weights[col];
        }

        for (row, net) in nets.row_nets.iter().enumerate() {
            row_count_a[row] = net.iter().filter(|&&col| column_in_a[col]).count();
        }

        gains.iter_mut().for_each(|gain| *gain = 0);
        for (row, net) in nets.row_nets.iter().enumerate() {
            for &col in net {
                gains[col] += gain_for_pin_in_row(column_in_a[col], row_count_a[row], net.len());
            }
        }

        buckets.clear();
        for (col, &gain) in gains.iter().enumerate() {
            buckets.push_back(col, gain);
        }
    }

    fn write_back(&mut self) {
        let column_in_a = &self.column_in_a;
        self.matrix
            .redistribute(2, |_, triplet| if column_in_a[triplet.col] { 0 } else { 1 });
    }
}

/// Kernighan-Lin Partitioner
///
/// Bipartitions the columns of a matrix with repeated Kernighan-Lin passes,
/// minimizing the number of rows shared by both parts.
///
/// # Example
///
/// ```rust
/// use HyperCut::algorithms::KernighanLinPartitioner;
/// use HyperCut::gen_matrix::eye;
/// use HyperCut::Partition;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
///     let mut matrix = eye(16, 1);
///     KernighanLinPartitioner { seed: Some(5), ..Default::default() }.partition(&mut matrix)?;
///
///     assert_eq!(matrix.communication_volume()?, 0);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KernighanLinPartitioner {
    /// Allowed load imbalance: a side may hold at most `0.5 * (1 + epsilon)` of the nonzeros.
    pub epsilon: f64,

    /// Upper bound on the number of passes.
    pub max_passes: usize,

    /// Seed for the random initial split.
    pub seed: Option<u64>,
}

impl Default for KernighanLinPartitioner {
    fn default() -> Self {
        KernighanLinPartitioner {
            epsilon: 0.03,
            max_passes: 16,
            seed: None,
        }
    }
}

impl<'a> Partition<&'a mut DistributedMatrix> for KernighanLinPartitioner {
    type Metadata = KernighanLinSummary;
    type Error = Error;

    fn partition(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let mut kernighan_lin = KernighanLin::new(matrix, self.epsilon, &mut rng)?;
        let summary = kernighan_lin.run_to_convergence(self.max_passes);
        info!(
            passes = summary.passes,
            gain = summary.total_gain,
            converged = summary.converged,
            "Kernighan-Lin partitioning done"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen_matrix::gen_random_matrix;
    use crate::matrix::{DistributionScheme, Triplet};

    // Two dense 3x3 blocks on rows/columns 0..3 and 3..6.
    fn two_blocks(scheme: &DistributionScheme, procs: usize) -> DistributedMatrix {
        let mut triplets = Vec::new();
        for block in [0, 3] {
            for row in block..block + 3 {
                for col in block..block + 3 {
                    triplets.push(Triplet::new(row, col, 1.0));
                }
            }
        }
        DistributedMatrix::from_triplets(6, 6, procs, triplets, scheme).unwrap()
    }

    #[test]
    fn test_gain_for_pin_in_row() {
        assert_eq!(gain_for_pin_in_row(true, 1, 1), 0);
        assert_eq!(gain_for_pin_in_row(true, 1, 3), 1);
        assert_eq!(gain_for_pin_in_row(false, 2, 3), 1);
        assert_eq!(gain_for_pin_in_row(true, 3, 3), -1);
        assert_eq!(gain_for_pin_in_row(false, 0, 3), -1);
        assert_eq!(gain_for_pin_in_row(true, 2, 4), 0);
        assert_eq!(gain_for_pin_in_row(false, 1, 4), 0);
    }

    #[test]
    fn test_gain_buckets() {
        // Arrange
        let mut buckets = GainBuckets::new(4, 2);
        buckets.push_back(0, 0);
        buckets.push_back(1, 2);
        buckets.push_back(2, 0);
        buckets.push_back(3, -2);

        // Act
        buckets.update(1, -1);
        buckets.update(2, 0);
        buckets.remove(0);
        buckets.push_back(0, 0);

        // Assert
        let order: Vec<(i64, usize)> = buckets.iter_descending().collect();
        assert_eq!(order, vec![(0, 2), (0, 0), (-1, 1), (-2, 3)]);
    }

    #[test]
    fn test_pass_separates_blocks() {
        // Arrange
        let side_a = DistributionScheme::Custom(Box::new(|_, col| if [0, 1, 3].contains(&col) { 0 } else { 1 }));
        let mut matrix = two_blocks(&side_a, 2);
        assert_eq!(matrix.communication_volume().unwrap(), 6);
        let mut rng = SmallRng::seed_from_u64(5);

        // Act
        let mut kernighan_lin = KernighanLin::new(&mut matrix, 0.4, &mut rng).unwrap();
        assert_eq!(kernighan_lin.gain(2), 3);
        assert_eq!(kernighan_lin.gain(3), 3);
        assert_eq!(kernighan_lin.gain(0), 0);
        let pass = kernighan_lin.run();

        // Assert
        assert_eq!(pass.best_gain, 6);
        assert_eq!(kernighan_lin.state(), KernighanLinState::Initialized);
        assert_eq!(matrix.communication_volume().unwrap(), 0);
        assert_eq!(matrix.nonzeros(), 18);
        assert_eq!(matrix.procs(), 2);
        assert_eq!(matrix.images()[0].nonzeros(), 9);
    }

    #[test]
    fn test_tight_balance_exhausts_pass() {
        // Arrange
        let side_a = DistributionScheme::Custom(Box::new(|_, col| if col < 3 { 0 } else { 1 }));
        let mut matrix = two_blocks(&side_a, 2);
        let mut rng = SmallRng::seed_from_u64(5);

        // Act
        let mut kernighan_lin = KernighanLin::new(&mut matrix, 0.03, &mut rng).unwrap();
        let pass = kernighan_lin.run();

        // Assert
        assert!(pass.exhausted);
        assert_eq!(pass.moves, 0);
        assert_eq!(kernighan_lin.state(), KernighanLinState::Converged);
        assert_eq!(matrix.communication_volume().unwrap(), 0);
    }

    #[test]
    fn test_run_to_convergence_never_increases_volume() {
        // Arrange
        let mut rng = SmallRng::seed_from_u64(7);
        let mut matrix = gen_random_matrix(60, 60, 1, 0.08, &mut rng);
        let cols = matrix.cols();
        let by_column = DistributionScheme::Custom(Box::new(move |_, col| if 2 * col < cols { 0 } else { 1 }));
        let triplets: Vec<Triplet> = matrix.triplets().copied().collect();
        matrix = DistributedMatrix::from_triplets(60, 60, 2, triplets, &by_column).unwrap();
        let nonzeros = matrix.nonzeros();
        let before = matrix.communication_volume().unwrap();

        // Act
        let mut kernighan_lin = KernighanLin::new(&mut matrix, 0.1, &mut rng).unwrap();
        let summary = kernighan_lin.run_to_convergence(10);

        // Assert
        assert!(summary.passes >= 1);
        assert_eq!(matrix.nonzeros(), nonzeros);
        assert_eq!(matrix.communication_volume().unwrap() as i64, before as i64 - summary.total_gain);
    }

    #[test]
    fn test_partitioner_on_uninitialized_matrix() {
        let mut matrix = DistributedMatrix::new(4, 4, 0);
        let result = KernighanLinPartitioner::default().partition(&mut matrix);
        assert!(matches!(result, Err(Error::UninitializedMatrix)));
    }

    #[test]
    fn test_partitioner_splits_identity() {
        // Arrange
        let mut matrix = crate::gen_matrix::eye(20, 1);

        // Act
        let summary = KernighanLinPartitioner { seed: Some(3), ..Default::default() }
            .partition(&mut matrix)
            .unwrap();

        // Assert
        assert!(summary.passes >= 1);
        assert_eq!(matrix.procs(), 2);
        assert_eq!(matrix.nonzeros(), 20);
        assert_eq!(matrix.communication_volume().unwrap(), 0);
    }
}
