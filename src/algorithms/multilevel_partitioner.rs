use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};

use crate::algorithms::kernighan_lin::KernighanLin;
use crate::algorithms::Error;
use crate::hypergraph::RowColumnNets;
use crate::matrix::{DistributedMatrix, DistributionScheme, SparseMatrix, Triplet};
use crate::Partition;

fn multilevel_partitioner(
    matrix: &mut DistributedMatrix,
    epsilon: f64,
    coarsest_size: usize,
    max_passes: usize,
    seed: Option<u64>,
) -> Result<MultiLevelSummary, Error> {
    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };

    let mut coarse_matrices: Vec<DistributedMatrix> = Vec::new();
    let mut fine_column_to_coarse_column_mappings = Vec::new();

    // Keep merging columns until the matrix has few enough of them, or until
    // no two columns share a row any more.
    loop {
        let finest = coarse_matrices.last().unwrap_or(&*matrix);
        if finest.cols() <= coarsest_size.max(2) {
            break;
        }

        let (coarse_matrix, fine_column_to_coarse_column) = heavy_connection_matching_coarse(finest, &mut rng)?;
        if coarse_matrix.cols() == finest.cols() {
            break;
        }

        debug!(
            level = coarse_matrices.len() + 1,
            cols = coarse_matrix.cols(),
            "coarsened columns"
        );
        coarse_matrices.push(coarse_matrix);
        fine_column_to_coarse_column_mappings.push(fine_column_to_coarse_column);
    }

    let levels = coarse_matrices.len();
    let mut passes = 0;

    // Bipartition the coarsest matrix from a random split, then project the
    // split one level up at a time and improve it there.
    for index in (0..=levels).rev() {
        let current: &mut DistributedMatrix = if index == 0 {
            &mut *matrix
        } else {
            &mut coarse_matrices[index - 1]
        };

        let mut kernighan_lin = KernighanLin::new(current, epsilon, &mut rng)?;
        passes += kernighan_lin.run_to_convergence(max_passes).passes;

        if index > 0 {
            let coarse_partition: Vec<usize> = coarse_matrices[index - 1]
                .column_owners()
                .into_iter()
                .map(|owner| owner.unwrap_or(0))
                .collect();
            let fine_partition = partition_uncoarse(&coarse_partition, &fine_column_to_coarse_column_mappings[index - 1]);

            let finer: &mut DistributedMatrix = if index == 1 {
                &mut *matrix
            } else {
                &mut coarse_matrices[index - 2]
            };
            finer.redistribute(2, |_, triplet| fine_partition[triplet.col]);
        }
    }

    Ok(MultiLevelSummary { levels, passes })
}

// This function coarsens the matrix by merging every column with the unmatched column it
// shares the most rows with.
fn heavy_connection_matching_coarse(
    matrix: &DistributedMatrix,
    rng: &mut SmallRng,
) -> Result<(DistributedMatrix, Vec<usize>), Error> {
    let nets = RowColumnNets::from_matrix(matrix);
    let cols = matrix.cols();

    let mut matched_columns = vec![false; cols];
    let mut fine_column_to_coarse_column = vec![0; cols];

    let mut columns: Vec<usize> = (0..cols).collect();
    columns.shuffle(rng);
    let mut super_column = 0usize;
    let mut shared_rows: FxHashMap<usize, usize> = FxHashMap::default();

    for column in columns {
        // If already matched, then ignore
        if matched_columns[column] {
            continue;
        }

        // Count the rows this column shares with every unmatched neighbor.
        shared_rows.clear();
        for &row in &nets.col_nets[column] {
            for &neighbor in &nets.row_nets[row] {
                if neighbor != column && !matched_columns[neighbor] {
                    *shared_rows.entry(neighbor).or_insert(0) += 1;
                }
            }
        }

        // Most shared rows first, lowest column index on ties.
        let heaviest_connected_column = shared_rows
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&neighbor, _)| neighbor);

        matched_columns[column] = true;
        fine_column_to_coarse_column[column] = super_column;
        if let Some(neighbor) = heaviest_connected_column {
            matched_columns[neighbor] = true;
            fine_column_to_coarse_column[neighbor] = super_column;
        }
        super_column += 1;
    }

    // Merged columns keep all their nonzeros, so a coarse column weighs as much
    // as the fine columns it stands for.
    let coarse_triplets: Vec<Triplet> = matrix
        .triplets()
        .map(|triplet| Triplet::new(triplet.row, fine_column_to_coarse_column[triplet.col], triplet.value))
        .collect();
    let coarse_matrix = DistributedMatrix::from_triplets(
        matrix.rows(),
        super_column,
        1,
        coarse_triplets,
        &DistributionScheme::Cyclic,
    )?;

    Ok((coarse_matrix, fine_column_to_coarse_column))
}

// Projects the partition of a coarse matrix's columns back onto the finer matrix's columns.
fn partition_uncoarse(partition: &[usize], fine_column_to_coarse_column_mapping: &[usize]) -> Vec<usize> {
    // If column 1 and 2 of the finer matrix were merged into column 0 of the coarse matrix
    // and it belonged to part 0, then column 1 and 2 belong to part 0 as well.
    fine_column_to_coarse_column_mapping
        .iter()
        .map(|&coarse_column| partition[coarse_column])
        .collect()
}

/// Levels built and Kernighan-Lin passes run by a multi-level partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MultiLevelSummary {
    pub levels: usize,
    pub passes: usize,
}

/// Multilevel Partitioner
///
/// A one-dimensional (column) bipartitioner: columns sharing the most rows are
/// merged until the matrix is small, the coarsest matrix is bipartitioned by
/// Kernighan-Lin, and the split is projected back level by level with
/// Kernighan-Lin passes at every level.
///
/// # Example
///
/// ```rust
/// use rand::rngs::SmallRng;
/// use rand::SeedableRng;
/// use HyperCut::algorithms::MultiLevelPartitioner;
/// use HyperCut::gen_matrix::gen_random_matrix;
/// use HyperCut::Partition;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
///
///     let mut rng = SmallRng::seed_from_u64(5);
///     let mut matrix = gen_random_matrix(400, 400, 1, 0.01, &mut rng);
///
///     MultiLevelPartitioner { seed: Some(5), ..Default::default() }.partition(&mut matrix)?;
///
///     let volume = matrix.communication_volume()?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MultiLevelPartitioner {
    /// A numerical factor that determines the maximum allowable deviation of a part:
    /// each side may hold at most `0.5 * (1 + epsilon)` of the nonzeros.
    pub epsilon: f64,

    /// Stop coarsening once the matrix has no more than this many columns.
    pub coarsest_size: usize,

    /// Upper bound on the Kernighan-Lin passes run at every level.
    pub max_passes: usize,

    /// Seed for the matching order and the initial split.
    pub seed: Option<u64>,
}

impl Default for MultiLevelPartitioner {
    fn default() -> Self {
        MultiLevelPartitioner {
            epsilon: 0.03,
            coarsest_size: 100,
            max_passes: 8,
            seed: None,
        }
    }
}

impl<'a> Partition<&'a mut DistributedMatrix> for MultiLevelPartitioner {
    type Metadata = MultiLevelSummary;
    type Error = Error;

    fn partition(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        if !matrix.is_initialized() {
            error!("multi-level partitioning of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }

        let summary = multilevel_partitioner(matrix, self.epsilon, self.coarsest_size, self.max_passes, self.seed)?;
        info!(
            levels = summary.levels,
            passes = summary.passes,
            volume = matrix.communication_volume()?,
            imbalance = matrix.load_imbalance()?,
            "multi-level partitioning done"
        );
        Ok(summary)
    }
}
