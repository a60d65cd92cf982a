// This file contains the medium-grain method: every nonzero is attached either to its row or to its
// column, the two groups are embedded in an extended matrix B = [[I, A_r^T], [A_c, I]], and a column
// bipartitioning of B is mapped back onto the nonzeros of A.
// # Reference
//
// Pelt, Daniël M., and Rob H. Bisseling. "A medium-grain method for fast 2D bipartitioning of sparse
// matrices." IEEE 28th International Parallel and Distributed Processing Symposium (2014): 529-539.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::algorithms::kernighan_lin::KernighanLin;
use crate::algorithms::Error;
use crate::matrix::{DistributedMatrix, SparseMatrix, Triplet};
use crate::{Partition, Refine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediumGrainState {
    /// No split has been computed yet.
    #[default]
    Uninitialized,
    /// A split exists and refinement may still improve it.
    Split,
    /// Neither the row phase nor the column phase improves the split any more.
    Optimal,
}

/// Volumes around a single partition or refine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediumGrainSummary {
    pub volume_before: usize,
    pub volume_after: usize,
    pub locally_optimal: bool,
}

/// Medium-grain Partitioner
///
/// Bipartitions the nonzeros of a matrix. The first call to `partition`
/// computes a split from scratch; every later call, and every call to
/// `refine`, runs one phase of the alternating row/column refinement.
///
/// # Example
///
/// ```rust
/// use HyperCut::algorithms::MediumGrainPartitioner;
/// use HyperCut::gen_matrix::eye;
/// use HyperCut::{Partition, Refine};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
///     let mut matrix = eye(32, 1);
///     let mut partitioner = MediumGrainPartitioner::new(0.03, Some(5));
///     partitioner.partition(&mut matrix)?;
///     while !partitioner.locally_optimal() {
///         partitioner.refine(&mut matrix)?;
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MediumGrainPartitioner {
    /// Allowed load imbalance of the Kernighan-Lin runs on the extended matrix.
    pub epsilon: f64,

    /// Passes of Kernighan-Lin per call.
    pub max_passes: usize,

    /// Seed for the random initial split of the extended matrix.
    pub seed: Option<u64>,

    state: MediumGrainState,
    triplet_in_row: Vec<bool>,
    phase_row: bool,
    row_optimal: bool,
    column_optimal: bool,
    rng: Option<SmallRng>,
}

impl Default for MediumGrainPartitioner {
    fn default() -> Self {
        MediumGrainPartitioner::new(0.03, None)
    }
}

impl MediumGrainPartitioner {
    pub fn new(epsilon: f64, seed: Option<u64>) -> Self {
        MediumGrainPartitioner {
            epsilon,
            max_passes: 8,
            seed,
            state: MediumGrainState::Uninitialized,
            triplet_in_row: Vec::new(),
            phase_row: true,
            row_optimal: false,
            column_optimal: false,
            rng: None,
        }
    }

    pub fn state(&self) -> MediumGrainState {
        self.state
    }

    pub fn locally_optimal(&self) -> bool {
        self.state == MediumGrainState::Optimal
    }

    /// Whether the next refinement treats image 0 as the row part.
    pub fn phase_row(&self) -> bool {
        self.phase_row
    }

    /// For every nonzero, in image order, whether it belongs to the row part.
    pub fn triplet_in_row(&self) -> &[bool] {
        &self.triplet_in_row
    }

    /// Attach every nonzero to its row when the row holds fewer nonzeros than
    /// the column, to its column otherwise.
    pub fn split(&mut self, matrix: &DistributedMatrix) {
        let row_weights = matrix.row_weights();
        let col_weights = matrix.column_weights();
        self.triplet_in_row = matrix
            .triplets()
            .map(|triplet| row_weights[triplet.row] < col_weights[triplet.col])
            .collect();

        let row_part = self.triplet_in_row.iter().filter(|&&in_row| in_row).count();
        debug!(row_part, column_part = self.triplet_in_row.len() - row_part, "medium-grain split");
        if self.state == MediumGrainState::Uninitialized {
            self.state = MediumGrainState::Split;
        }
    }

    fn rng(&mut self) -> &mut SmallRng {
        let seed = self.seed;
        self.rng.get_or_insert_with(|| match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        })
    }

    // Bipartition the columns of `extended` and spread the nonzeros of `matrix` accordingly.
    fn bipartition_extended(
        &mut self,
        matrix: &mut DistributedMatrix,
        mut extended: DistributedMatrix,
    ) -> Result<(), Error> {
        let (epsilon, max_passes) = (self.epsilon, self.max_passes);
        {
            let mut kernighan_lin = KernighanLin::new(&mut extended, epsilon, self.rng())?;
            kernighan_lin.run_to_convergence(max_passes);
        }

        induce_partitioning(matrix, &extended, &self.triplet_in_row);
        Ok(())
    }
}

/// Build `B = [[I, A_r^T], [A_c, I]]` of size `(cols + rows)` squared.
///
/// A row-part nonzero `(i, j)` lands on `(j, cols + i)`, a column-part one on
/// `(cols + i, j)`. Diagonal entries are added for indices used both as a row
/// and as a column of B. With two processors, B's columns `>= cols` go to
/// processor 0 when `phase_row` is set, to processor 1 otherwise.
pub(crate) fn extended_matrix(
    matrix: &DistributedMatrix,
    triplet_in_row: &[bool],
    procs: usize,
    phase_row: bool,
) -> DistributedMatrix {
    let (rows, cols) = (matrix.rows(), matrix.cols());
    let size = rows + cols;
    let mut extended = DistributedMatrix::new(size, size, procs);
    let target = |col: usize| {
        if procs == 1 || (col >= cols) == phase_row {
            0
        } else {
            1
        }
    };

    let mut used_row = vec![false; size];
    let mut used_col = vec![false; size];
    for (triplet, &in_row) in matrix.triplets().zip(triplet_in_row) {
        let (row, col) = if in_row {
            (triplet.col, cols + triplet.row)
        } else {
            (cols + triplet.row, triplet.col)
        };
        used_row[row] = true;
        used_col[col] = true;
        extended.push_triplet(target(col), Triplet::new(row, col, triplet.value));
    }

    for k in 0..size {
        if used_row[k] && used_col[k] {
            extended.push_triplet(target(k), Triplet::new(k, k, 1.0));
        }
    }

    extended
}

/// Give every nonzero of `matrix` the part of the column of B it was embedded in.
pub(crate) fn induce_partitioning(
    matrix: &mut DistributedMatrix,
    extended: &DistributedMatrix,
    triplet_in_row: &[bool],
) {
    let cols = matrix.cols();
    let owners = extended.column_owners();
    matrix.redistribute(2, |ordinal, triplet| {
        let col = if triplet_in_row[ordinal] {
            cols + triplet.row
        } else {
            triplet.col
        };
        owners[col].unwrap_or(0)
    });
}

impl<'a> Partition<&'a mut DistributedMatrix> for MediumGrainPartitioner {
    type Metadata = MediumGrainSummary;
    type Error = Error;

    fn partition(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        if self.state != MediumGrainState::Uninitialized {
            warn!("medium-grain partitioner already applied an initial partitioning, refining instead");
            return self.refine(matrix);
        }
        if !matrix.is_initialized() {
            error!("medium-grain partitioning of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }

        let volume_before = matrix.communication_volume()?;
        self.split(matrix);
        let extended = extended_matrix(matrix, &self.triplet_in_row, 1, self.phase_row);
        self.bipartition_extended(matrix, extended)?;
        let volume_after = matrix.communication_volume()?;

        info!(
            volume = volume_after,
            imbalance = matrix.load_imbalance()?,
            "medium-grain partitioning done"
        );
        Ok(MediumGrainSummary {
            volume_before,
            volume_after,
            locally_optimal: false,
        })
    }
}

impl<'a> Refine<&'a mut DistributedMatrix> for MediumGrainPartitioner {
    type Metadata = MediumGrainSummary;
    type Error = Error;

    fn refine(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        if !matrix.is_initialized() {
            error!("medium-grain refinement of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }
        if matrix.procs() != 2 {
            error!(procs = matrix.procs(), "medium-grain refinement needs a bipartitioned matrix");
            return Err(Error::BiPartitioningOnly {
                procs: matrix.procs(),
            });
        }

        let volume_before = matrix.communication_volume()?;
        if self.state == MediumGrainState::Optimal {
            debug!(volume = volume_before, "medium-grain split is already locally optimal");
            return Ok(MediumGrainSummary {
                volume_before,
                volume_after: volume_before,
                locally_optimal: true,
            });
        }

        // Image 0 becomes the row part in the row phase, the column part otherwise.
        let phase_row = self.phase_row;
        self.triplet_in_row = matrix
            .images()
            .iter()
            .enumerate()
            .flat_map(|(proc, image)| std::iter::repeat((proc == 0) == phase_row).take(image.nonzeros()))
            .collect();

        let extended = extended_matrix(matrix, &self.triplet_in_row, 2, phase_row);
        self.bipartition_extended(matrix, extended)?;
        let volume_after = matrix.communication_volume()?;

        if volume_after < volume_before {
            self.row_optimal = false;
            self.column_optimal = false;
        } else if phase_row {
            self.row_optimal = true;
        } else {
            self.column_optimal = true;
        }

        if self.row_optimal && self.column_optimal {
            self.state = MediumGrainState::Optimal;
        } else if self.state == MediumGrainState::Uninitialized {
            self.state = MediumGrainState::Split;
        }
        self.phase_row = !phase_row;

        debug!(
            phase_row,
            volume_before,
            volume_after,
            locally_optimal = self.locally_optimal(),
            "medium-grain refinement step"
        );
        Ok(MediumGrainSummary {
            volume_before,
            volume_after,
            locally_optimal: self.locally_optimal(),
        })
    }
}
