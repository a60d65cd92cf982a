use rayon::prelude::*;
use tracing::{debug, error};

use crate::algorithms::Error;
use crate::matrix::{DistributedMatrix, LocalIndices, SparseMatrix};
use crate::vector::DistributedVector;

// Sorted intersection of two ascending processor lists.
fn intersection(a: &[usize], b: &[usize]) -> Vec<usize> {
    let (mut i, mut j) = (0, 0);
    let mut common = Vec::new();
    while i < a.len() && j < b.len() {
        if a[i] < b[j] {
            i += 1;
        } else if a[i] > b[j] {
            j += 1;
        } else {
            common.push(a[i]);
            i += 1;
            j += 1;
        }
    }
    common
}

// Sorted union of two ascending processor lists.
fn union(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut all: Vec<usize> = a.iter().chain(b).copied().collect();
    all.sort_unstable();
    all.dedup();
    all
}

// The least loaded processor among `candidates`; the first one wins ties.
fn lightest(candidates: impl Iterator<Item = usize>, element_count: &[usize]) -> Option<usize> {
    candidates.fold(None, |best: Option<usize>, proc| match best {
        Some(b) if element_count[b] <= element_count[proc] => Some(b),
        _ => Some(proc),
    })
}

/// Greedy Vector Partitioner
///
/// Gives every index `k` of the input vector `v` and the output vector `u` of
/// `u = A v` one owner, shared by both vectors:
///
/// 1. the processor holding the diagonal nonzero `(k, k)`, if any;
/// 2. otherwise the least loaded processor holding nonzeros in both row `k`
///    and column `k`;
/// 3. otherwise the least loaded processor holding nonzeros in row `k` or
///    column `k`.
///
/// Indices with an empty row and column go to the least loaded processor.
pub struct GreedyVectorPartitioner<'a> {
    matrix: &'a mut DistributedMatrix,
    v: &'a mut DistributedVector,
    u: &'a mut DistributedVector,
}

impl<'a> GreedyVectorPartitioner<'a> {
    pub fn new(matrix: &'a mut DistributedMatrix, v: &'a mut DistributedVector, u: &'a mut DistributedVector) -> Self {
        Self { matrix, v, u }
    }

    /// Assign owners to all vector indices. Returns the number of indices
    /// given to every processor.
    pub fn partition(&mut self) -> Result<Vec<usize>, Error> {
        if !self.matrix.is_initialized() {
            error!("vector partitioning against an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }
        let (rows, cols) = (self.matrix.rows(), self.matrix.cols());
        if rows != cols {
            error!(rows, cols, "vector partitioning needs a square matrix");
            return Err(Error::NonSquareMatrix { rows, cols });
        }
        for len in [self.v.len(), self.u.len()] {
            if len != rows {
                error!(expected = rows, actual = len, "vector length does not match the matrix");
                return Err(Error::InputLenMismatch {
                    expected: rows,
                    actual: len,
                });
            }
        }

        let n = rows;
        let procs = self.matrix.procs();
        let images = self.matrix.images();

        let diagonals: Vec<Vec<usize>> = images
            .par_iter()
            .map(|image| {
                image
                    .iter()
                    .filter(|triplet| triplet.row == triplet.col)
                    .map(|triplet| triplet.row)
                    .collect()
            })
            .collect();

        // Images are visited in order, so every list comes out ascending.
        let mut diagonal_targets: Vec<Option<usize>> = vec![None; n];
        let mut processors_in_row: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut processors_in_col: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (proc, image) in images.iter().enumerate() {
            for &k in &diagonals[proc] {
                diagonal_targets[k] = Some(proc);
            }
            for &row in image.row_set().keys() {
                processors_in_row[row].push(proc);
            }
            for &col in image.col_set().keys() {
                processors_in_col[col].push(proc);
            }
        }

        let mut element_count = vec![0; procs];
        for k in 0..n {
            let target = match diagonal_targets[k] {
                Some(proc) => proc,
                None => {
                    let mut look_up = intersection(&processors_in_row[k], &processors_in_col[k]);
                    if look_up.is_empty() {
                        look_up = union(&processors_in_row[k], &processors_in_col[k]);
                    }
                    let candidates = if look_up.is_empty() {
                        lightest(0..procs, &element_count)
                    } else {
                        lightest(look_up.into_iter(), &element_count)
                    };
                    candidates.unwrap_or(0)
                }
            };

            self.v.reassign(k, target);
            self.u.reassign(k, target);
            element_count[target] += 1;
        }

        debug!(?element_count, "vector partitioning done");
        Ok(element_count)
    }

    /// Tell every image which vector indices it owns and which remote ones
    /// it needs. All owners must name an existing processor.
    pub fn localize_matrix(&mut self) -> Result<(), Error> {
        let procs = self.matrix.procs();
        for vector in [&*self.v, &*self.u] {
            if let Some((index, &owner)) = vector.owners().iter().enumerate().find(|(_, &owner)| owner >= procs) {
                error!(index, owner, procs, "vector index owned by a missing processor");
                return Err(Error::InvalidOwner { index, owner, procs });
            }
        }

        let (v, u) = (&*self.v, &*self.u);
        for (proc, image) in self.matrix.images_mut().iter_mut().enumerate() {
            let local_v = LocalIndices::build(v.owned_by(proc), image.col_set(), |index| v.owner(index));
            let local_u = LocalIndices::build(u.owned_by(proc), image.row_set(), |index| u.owner(index));
            debug!(
                proc,
                owned = local_v.num_local,
                remote = local_v.indices.len() - local_v.num_local,
                "localized image"
            );
            image.set_local_indices(local_v, local_u);
        }

        Ok(())
    }
}
