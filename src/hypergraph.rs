use tracing::{debug, error, warn};

use crate::algorithms::Error;
use crate::matrix::{DistributedMatrix, SparseMatrix, Triplet};

/// Which matrix objects become vertices and which become nets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HypergraphModel {
    /// One vertex per nonzero, one net per row and per column.
    #[default]
    FineGrain,
    /// One vertex per column, one net per row.
    RowNet,
    /// One vertex per row, one net per column.
    ColumnNet,
    /// One vertex per row and per column of the extended matrix: each nonzero
    /// joins its row or its column, whichever holds fewer nonzeros.
    MediumGrain,
}

/// A hypergraph view of a distributed matrix, kept in lockstep with it.
///
/// Every vertex stands for one or more nonzeros, which all live in the image
/// of the vertex's part. Moving a vertex with [`Hypergraph::reassign`] moves
/// those nonzeros in the matrix.
pub struct Hypergraph<'a> {
    matrix: &'a mut DistributedMatrix,
    model: HypergraphModel,
    part_count: usize,
    nets: Vec<Vec<usize>>,
    nets_for_vertex: Vec<Vec<usize>>,
    net_distribution: Vec<Vec<usize>>,
    net_size_rank: Vec<usize>,
    max_net_size: usize,
    part: Vec<usize>,
    part_size: Vec<usize>,
    weights: Vec<usize>,
    // Local indices of each vertex's nonzeros inside `matrix.images()[part[v]]`.
    storage: Vec<Vec<usize>>,
}

struct Layout {
    vertex_count: usize,
    net_count: usize,
    rows: usize,
    cols: usize,
    row_weights: Vec<usize>,
    col_weights: Vec<usize>,
}

impl Layout {
    fn new(matrix: &DistributedMatrix, model: HypergraphModel) -> Self {
        let (rows, cols, nonzeros) = (matrix.rows(), matrix.cols(), matrix.nonzeros());
        let (vertex_count, net_count) = match model {
            HypergraphModel::FineGrain => (nonzeros, rows + cols),
            HypergraphModel::RowNet => (cols, rows),
            HypergraphModel::ColumnNet => (rows, cols),
            HypergraphModel::MediumGrain => (rows + cols, rows + cols),
        };
        let (row_weights, col_weights) = match model {
            HypergraphModel::MediumGrain => (matrix.row_weights(), matrix.column_weights()),
            _ => (Vec::new(), Vec::new()),
        };

        Self {
            vertex_count,
            net_count,
            rows,
            cols,
            row_weights,
            col_weights,
        }
    }

    fn in_row_part(&self, triplet: &Triplet) -> bool {
        self.row_weights[triplet.row] < self.col_weights[triplet.col]
    }

    fn vertex_of(&self, model: HypergraphModel, ordinal: usize, triplet: &Triplet) -> usize {
        match model {
            HypergraphModel::FineGrain => ordinal,
            HypergraphModel::RowNet => triplet.col,
            HypergraphModel::ColumnNet => triplet.row,
            HypergraphModel::MediumGrain if self.in_row_part(triplet) => self.cols + triplet.row,
            HypergraphModel::MediumGrain => triplet.col,
        }
    }

    fn push_nets(&self, model: HypergraphModel, triplet: &Triplet, nets: &mut Vec<usize>) {
        match model {
            HypergraphModel::FineGrain => {
                nets.push(triplet.col);
                nets.push(self.cols + triplet.row);
            }
            HypergraphModel::RowNet => nets.push(triplet.row),
            HypergraphModel::ColumnNet => nets.push(triplet.col),
            HypergraphModel::MediumGrain if self.in_row_part(triplet) => nets.push(triplet.col),
            HypergraphModel::MediumGrain => nets.push(self.cols + triplet.row),
        }
    }
}

impl<'a> Hypergraph<'a> {
    /// Build the hypergraph of `matrix` under `model`.
    ///
    /// For models whose vertices group several nonzeros, nonzeros of one
    /// vertex that are spread over several images are first gathered into
    /// the image holding the vertex's first nonzero.
    pub fn new(matrix: &'a mut DistributedMatrix, model: HypergraphModel) -> Result<Self, Error> {
        if !matrix.is_initialized() {
            error!("cannot build a hypergraph of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }

        let layout = Layout::new(matrix, model);
        let part_count = matrix.procs();

        let mut first_part: Vec<Option<usize>> = vec![None; layout.vertex_count];
        let mut gathers = Vec::new();
        let mut ordinal = 0;
        for (proc, image) in matrix.images().iter().enumerate() {
            for (local, triplet) in image.iter_indexed() {
                let vertex = layout.vertex_of(model, ordinal, triplet);
                ordinal += 1;
                match first_part[vertex] {
                    None => first_part[vertex] = Some(proc),
                    Some(target) if target != proc => gathers.push((local, proc, target)),
                    Some(_) => {}
                }
            }
        }

        if !gathers.is_empty() {
            debug!(moves = gathers.len(), ?model, "gathering split vertices");
            for (local, from, to) in gathers {
                matrix.move_nonzero(local, from, to);
            }
            matrix.clean();
        }

        let part: Vec<usize> = first_part.into_iter().map(|p| p.unwrap_or(0)).collect();
        let mut weights = vec![0; layout.vertex_count];
        let mut storage = vec![Vec::new(); layout.vertex_count];
        let mut nets = vec![Vec::new(); layout.net_count];
        let mut incident = Vec::with_capacity(2);

        let mut ordinal = 0;
        for image in matrix.images() {
            for (local, triplet) in image.iter_indexed() {
                let vertex = layout.vertex_of(model, ordinal, triplet);
                ordinal += 1;
                weights[vertex] += 1;
                storage[vertex].push(local);

                incident.clear();
                layout.push_nets(model, triplet, &mut incident);
                for &net in &incident {
                    nets[net].push(vertex);
                }
            }
        }

        if model == HypergraphModel::MediumGrain {
            // Every non-empty vertex is also a member of the net with its own index.
            for (vertex, &weight) in weights.iter().enumerate() {
                if weight > 0 {
                    nets[vertex].push(vertex);
                }
            }
        }

        for net in nets.iter_mut() {
            net.sort_unstable();
            net.dedup();
        }

        let mut nets_for_vertex = vec![Vec::new(); layout.vertex_count];
        let mut net_distribution = vec![vec![0; part_count]; layout.net_count];
        for (net, vertices) in nets.iter().enumerate() {
            for &vertex in vertices {
                nets_for_vertex[vertex].push(net);
                net_distribution[net][part[vertex]] += 1;
            }
        }

        let mut part_size = vec![0; part_count];
        for (vertex, &p) in part.iter().enumerate() {
            part_size[p] += weights[vertex];
        }

        let max_net_size = nets.iter().map(Vec::len).max().unwrap_or(0);
        debug!(
            ?model,
            vertices = layout.vertex_count,
            nets = layout.net_count,
            rows = layout.rows,
            max_net_size,
            "hypergraph built"
        );

        Ok(Self {
            matrix,
            model,
            part_count,
            net_size_rank: (0..nets.len()).collect(),
            nets,
            nets_for_vertex,
            net_distribution,
            max_net_size,
            part,
            part_size,
            weights,
            storage,
        })
    }

    pub fn model(&self) -> HypergraphModel {
        self.model
    }

    pub fn matrix(&self) -> &DistributedMatrix {
        &*self.matrix
    }

    pub fn vertex_count(&self) -> usize {
        self.part.len()
    }

    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    pub fn part_count(&self) -> usize {
        self.part_count
    }

    pub fn part(&self, vertex: usize) -> usize {
        self.part[vertex]
    }

    pub fn parts(&self) -> &[usize] {
        &self.part
    }

    /// Number of nonzeros held by vertices of part `part`.
    pub fn part_size(&self, part: usize) -> usize {
        self.part_size[part]
    }

    pub fn weight(&self, vertex: usize) -> usize {
        self.weights[vertex]
    }

    pub fn weights(&self) -> &[usize] {
        &self.weights
    }

    pub fn nets(&self) -> &[Vec<usize>] {
        &self.nets
    }

    pub fn nets_for_vertex(&self, vertex: usize) -> &[usize] {
        &self.nets_for_vertex[vertex]
    }

    pub fn net_distribution(&self, net: usize) -> &[usize] {
        &self.net_distribution[net]
    }

    pub fn max_net_size(&self) -> usize {
        self.max_net_size
    }

    /// Rank every net by size, smallest first. Ties keep index order.
    pub fn sort_nets_by_size(&mut self) {
        let mut order: Vec<usize> = (0..self.nets.len()).collect();
        order.sort_by_key(|&net| self.nets[net].len());
        for (rank, net) in order.into_iter().enumerate() {
            self.net_size_rank[net] = rank;
        }
    }

    /// Move `vertex` and its nonzeros to part `part`.
    pub fn reassign(&mut self, vertex: usize, part: usize) {
        let old = self.part[vertex];
        if part == old {
            warn!(vertex, part, "reassigning vertex to its own part");
            return;
        }
        if part >= self.part_count {
            error!(vertex, part, parts = self.part_count, "reassigning vertex to a missing part");
            return;
        }

        for &net in &self.nets_for_vertex[vertex] {
            self.net_distribution[net][old] -= 1;
            self.net_distribution[net][part] += 1;
        }
        self.part_size[old] -= self.weights[vertex];
        self.part_size[part] += self.weights[vertex];

        for local in self.storage[vertex].iter_mut() {
            match self.matrix.move_nonzero(*local, old, part) {
                Some(new_local) => *local = new_local,
                None => error!(vertex, local = *local, "vertex storage out of sync with matrix"),
            }
        }
        self.part[vertex] = part;
    }

    /// Score every part as a destination for `vertex`.
    ///
    /// Sums `weight(peers, size)` over the nets of `vertex` no larger than
    /// `max_net_size` and ranked below `nets_to_consider` by size, where
    /// `peers` counts the net's vertices in the part.
    pub fn part_quality<W>(
        &self,
        vertex: usize,
        weight: W,
        max_net_size: Option<usize>,
        nets_to_consider: Option<usize>,
    ) -> Vec<f64>
    where
        W: Fn(usize, usize) -> f64,
    {
        let max_net_size = max_net_size.unwrap_or(self.max_net_size);
        let nets_to_consider = nets_to_consider.unwrap_or(self.nets.len());
        let mut quality = vec![0.0; self.part_count];

        for &net in &self.nets_for_vertex[vertex] {
            let size = self.nets[net].len();
            if size > max_net_size || self.net_size_rank[net] >= nets_to_consider {
                continue;
            }
            for (part, q) in quality.iter_mut().enumerate() {
                *q += weight(self.net_distribution[net][part], size);
            }
        }

        quality
    }

    /// Sum over nets of (lambda - 1), lambda being the number of parts a net touches.
    pub fn connectivity_volume(&self) -> usize {
        self.net_distribution
            .iter()
            .map(|distribution| {
                distribution
                    .iter()
                    .filter(|&&count| count > 0)
                    .count()
                    .saturating_sub(1)
            })
            .sum()
    }

    /// Drop the holes moves left in the matrix images and fix up the
    /// stored local indices.
    pub fn compact(&mut self) {
        let remap = self.matrix.clean();
        for (vertex, locals) in self.storage.iter_mut().enumerate() {
            let table = &remap[self.part[vertex]];
            for local in locals.iter_mut() {
                if let Some(Some(new_local)) = table.get(*local) {
                    *local = *new_local;
                }
            }
        }
    }
}

/// Distinct row and column nets of a matrix: `row_nets[i]` lists the columns
/// with a nonzero in row `i`, `col_nets[j]` the rows with a nonzero in column `j`.
#[derive(Debug, Clone, Default)]
pub struct RowColumnNets {
    pub row_nets: Vec<Vec<usize>>,
    pub col_nets: Vec<Vec<usize>>,
}

impl RowColumnNets {
    pub fn from_matrix<M: SparseMatrix + ?Sized>(matrix: &M) -> Self {
        let mut row_nets = vec![Vec::new(); matrix.rows()];
        let mut col_nets = vec![Vec::new(); matrix.cols()];
        for image in matrix.images() {
            for triplet in image.iter() {
                row_nets[triplet.row].push(triplet.col);
                col_nets[triplet.col].push(triplet.row);
            }
        }
        for net in row_nets.iter_mut().chain(col_nets.iter_mut()) {
            net.sort_unstable();
            net.dedup();
        }

        Self { row_nets, col_nets }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::algorithms::pulp_affinity;
    use crate::matrix::DistributionScheme;

    // 0: x x . .
    // 1: . x x .
    // 2: x . . x
    fn small_matrix(procs: usize, scheme: &DistributionScheme) -> DistributedMatrix {
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 1, 2.0),
            Triplet::new(1, 1, 3.0),
            Triplet::new(1, 2, 4.0),
            Triplet::new(2, 0, 5.0),
            Triplet::new(2, 3, 6.0),
        ];
        DistributedMatrix::from_triplets(3, 4, procs, triplets, scheme).unwrap()
    }

    fn sorted_triplets(matrix: &DistributedMatrix) -> Vec<(usize, usize)> {
        let mut positions: Vec<(usize, usize)> = matrix.triplets().map(|t| (t.row, t.col)).collect();
        positions.sort_unstable();
        positions
    }

    #[test]
    fn test_fine_grain_layout() {
        // Arrange
        let mut matrix = small_matrix(2, &DistributionScheme::Cyclic);
        let volume = matrix.communication_volume().unwrap();

        // Act
        let hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::FineGrain).unwrap();

        // Assert
        assert_eq!(hypergraph.vertex_count(), 6);
        assert_eq!(hypergraph.net_count(), 7);
        assert_eq!(hypergraph.part_size(0), 4);
        assert_eq!(hypergraph.part_size(1), 2);
        assert_eq!(hypergraph.connectivity_volume(), volume);
    }

    #[test]
    fn test_row_net_gathers_columns() {
        // Arrange
        let mut matrix = small_matrix(3, &DistributionScheme::Cyclic);
        let before = sorted_triplets(&matrix);

        // Act
        let hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::RowNet).unwrap();
        let owners = hypergraph.parts().to_vec();

        // Assert
        assert_eq!(hypergraph.vertex_count(), 4);
        assert_eq!(hypergraph.weights(), &[2, 2, 1, 1]);
        assert_eq!(owners, vec![0, 0, 1, 2]);
        let volume = hypergraph.connectivity_volume();
        drop(hypergraph);
        assert_eq!(sorted_triplets(&matrix), before);
        assert!(matrix.images().iter().all(|image| image.col_set().len() <= 2));
        assert_eq!(matrix.communication_volume().unwrap(), volume);
    }

    #[test]
    fn test_reassign_moves_nonzeros() {
        // Arrange
        let mut matrix = small_matrix(2, &DistributionScheme::Cyclic);
        let mut hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::ColumnNet).unwrap();

        // Act
        hypergraph.reassign(2, 1);
        hypergraph.reassign(0, 1);

        // Assert
        assert_eq!(hypergraph.part_size(0), 0);
        assert_eq!(hypergraph.part_size(1), 6);
        assert_eq!(hypergraph.connectivity_volume(), 0);
        assert_eq!(hypergraph.matrix().images()[1].nonzeros(), 6);
        assert_eq!(hypergraph.matrix().communication_volume().unwrap(), 0);
    }

    #[test]
    fn test_reassign_to_own_part_is_a_no_op() {
        let mut matrix = small_matrix(2, &DistributionScheme::Cyclic);
        let mut hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::FineGrain).unwrap();

        hypergraph.reassign(0, 0);

        assert_eq!(hypergraph.part(0), 0);
        assert_eq!(hypergraph.part_size(0), 4);
    }

    #[test]
    fn test_compact_keeps_storage_valid() {
        // Arrange
        let mut matrix = small_matrix(1, &DistributionScheme::Cyclic);
        matrix.grow_procs(2);
        let mut hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::FineGrain).unwrap();
        hypergraph.reassign(1, 1);
        hypergraph.reassign(3, 1);

        // Act
        hypergraph.compact();
        hypergraph.reassign(4, 1);
        hypergraph.reassign(3, 0);

        // Assert
        let image0: Vec<(usize, usize)> = hypergraph.matrix().images()[0].iter().map(|t| (t.row, t.col)).collect();
        let image1: Vec<(usize, usize)> = hypergraph.matrix().images()[1].iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(image0, vec![(0, 0), (1, 1), (2, 3), (1, 2)]);
        assert_eq!(image1, vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn test_medium_grain_matches_matrix_volume() {
        // Arrange
        let mut matrix = small_matrix(2, &DistributionScheme::Random { seed: Some(11) });

        // Act
        let hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::MediumGrain).unwrap();
        let volume = hypergraph.connectivity_volume();
        let vertices = hypergraph.vertex_count();
        drop(hypergraph);

        // Assert
        assert_eq!(vertices, 7);
        assert_eq!(matrix.nonzeros(), 6);
        assert_eq!(matrix.communication_volume().unwrap(), volume);
    }

    #[test]
    fn test_part_quality_prefers_crowded_part() {
        // Arrange
        let mut matrix = small_matrix(2, &DistributionScheme::Cyclic);
        let mut hypergraph = Hypergraph::new(&mut matrix, HypergraphModel::FineGrain).unwrap();
        hypergraph.sort_nets_by_size();

        // Act
        let quality = hypergraph.part_quality(0, pulp_affinity, None, None);
        let skipped = hypergraph.part_quality(0, pulp_affinity, Some(1), None);

        // Assert
        assert!(quality[0] > quality[1]);
        assert_relative_eq!(skipped[0], 0.0);
        assert_relative_eq!(skipped[1], 0.0);
    }

    #[test]
    fn test_uninitialized_matrix() {
        let mut matrix = DistributedMatrix::new(2, 2, 0);
        assert!(matches!(
            Hypergraph::new(&mut matrix, HypergraphModel::RowNet),
            Err(Error::UninitializedMatrix)
        ));
    }

    #[test]
    fn test_row_column_nets() {
        let matrix = small_matrix(2, &DistributionScheme::Cyclic);
        let nets = RowColumnNets::from_matrix(&matrix);
        assert_eq!(nets.row_nets, vec![vec![0, 1], vec![1, 2], vec![0, 3]]);
        assert_eq!(nets.col_nets, vec![vec![0, 2], vec![0, 1], vec![1], vec![2]]);
    }
}
