use num_traits::ToPrimitive;
use rayon::prelude::*;
use tracing::error;

use crate::algorithms::Error;
use crate::matrix::{CountedSet, MatrixImage, SparseMatrix};

/// Calculates the number of nonzeros held by each processor.
pub fn compute_parts_load<M: SparseMatrix + ?Sized>(matrix: &M) -> Vec<usize> {
    matrix.images().iter().map(MatrixImage::nonzeros).collect()
}

/// Compute `P * max(load) / sum(load)` from part loads. An empty matrix is balanced.
pub fn compute_imbalance_from_part_loads(part_loads: &[usize]) -> f64 {
    let total: usize = part_loads.iter().sum();
    if total == 0 {
        return 1.0;
    }

    let max_load = part_loads.iter().copied().max().unwrap_or(0);
    let num_parts = part_loads.len();

    (num_parts * max_load).to_f64().unwrap_or(0.0) / total.to_f64().unwrap_or(1.0)
}

/// Compute the load imbalance of a distributed matrix.
pub fn load_imbalance<M: SparseMatrix + ?Sized>(matrix: &M) -> Result<f64, Error> {
    if !matrix.is_initialized() {
        error!("load imbalance of an uninitialized matrix");
        return Err(Error::UninitializedMatrix);
    }

    Ok(compute_imbalance_from_part_loads(&compute_parts_load(matrix)))
}

/// For every index in `0..len`, the number of images whose `set` contains it.
pub(crate) fn processor_counts(
    images: &[MatrixImage],
    len: usize,
    set: fn(&MatrixImage) -> &CountedSet,
) -> Vec<usize> {
    images
        .par_iter()
        .fold(
            || vec![0; len],
            |mut counts, image| {
                for &index in set(image).keys() {
                    counts[index] += 1;
                }
                counts
            },
        )
        .reduce(
            || vec![0; len],
            |mut left, right| {
                left.iter_mut().zip(right).for_each(|(l, r)| *l += r);
                left
            },
        )
}

/// For every index in `0..len`, the number of nonzeros all images hold in it.
pub(crate) fn index_weights(
    images: &[MatrixImage],
    len: usize,
    set: fn(&MatrixImage) -> &CountedSet,
) -> Vec<usize> {
    images
        .par_iter()
        .fold(
            || vec![0; len],
            |mut weights, image| {
                for (&index, &count) in set(image) {
                    weights[index] += count;
                }
                weights
            },
        )
        .reduce(
            || vec![0; len],
            |mut left, right| {
                left.iter_mut().zip(right).for_each(|(l, r)| *l += r);
                left
            },
        )
}

/// The (lambda - 1) metric: every index shared by `lambda` processors costs
/// `lambda - 1` words. Untouched indices cost nothing.
pub fn volume_from_counts(counts: &[usize]) -> usize {
    counts.iter().map(|&lambda| lambda.saturating_sub(1)).sum()
}

/// Total communication volume of one SpMV: the fan-out over columns plus the
/// fan-in over rows.
pub fn communication_volume<M: SparseMatrix + ?Sized>(matrix: &M) -> Result<usize, Error> {
    if !matrix.is_initialized() {
        error!("communication volume of an uninitialized matrix");
        return Err(Error::UninitializedMatrix);
    }

    let images = matrix.images();
    let row_counts = processor_counts(images, matrix.rows(), MatrixImage::row_set);
    let col_counts = processor_counts(images, matrix.cols(), MatrixImage::col_set);

    Ok(volume_from_counts(&row_counts) + volume_from_counts(&col_counts))
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;
    use itertools::assert_equal;

    use crate::algorithms::Error;
    use crate::cost::{communication_volume, compute_imbalance_from_part_loads, compute_parts_load, load_imbalance};
    use crate::matrix::{DistributedMatrix, DistributionScheme, Triplet};

    fn two_by_two_split() -> DistributedMatrix {
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(0, 1, 1.0),
            Triplet::new(1, 0, 1.0),
            Triplet::new(1, 1, 1.0),
        ];
        DistributedMatrix::from_triplets(2, 2, 2, triplets, &DistributionScheme::Cyclic).unwrap()
    }

    #[test]
    fn test_compute_parts_load() {
        // Arrange
        let mut matrix = DistributedMatrix::new(4, 4, 2);
        for (proc, row) in [(0, 0), (0, 1), (0, 2), (1, 3)] {
            matrix.push_triplet(proc, Triplet::new(row, row, 1.0));
        }

        // Act
        let part_loads = compute_parts_load(&matrix);

        // Assert
        assert_equal(part_loads, [3, 1]);
    }

    #[test]
    fn test_imbalance() {
        // Arrange
        let part_loads = [6, 4];

        // Act
        let imb = compute_imbalance_from_part_loads(&part_loads);

        // Assert
        assert_ulps_eq!(imb, 1.2);
    }

    #[test]
    fn test_empty_matrix_is_balanced() {
        let matrix = DistributedMatrix::new(3, 3, 4);
        assert_ulps_eq!(load_imbalance(&matrix).unwrap(), 1.0);
        assert_eq!(communication_volume(&matrix).unwrap(), 0);
    }

    #[test]
    fn test_uninitialized_matrix() {
        let matrix = DistributedMatrix::new(3, 3, 0);
        assert!(matches!(communication_volume(&matrix), Err(Error::UninitializedMatrix)));
        assert!(matches!(load_imbalance(&matrix), Err(Error::UninitializedMatrix)));
    }

    #[test]
    fn test_cyclic_row_split_volume() {
        // Arrange
        let matrix = two_by_two_split();

        // Act
        let volume = communication_volume(&matrix).unwrap();
        let imb = load_imbalance(&matrix).unwrap();

        // Assert
        assert_eq!(volume, 2);
        assert_ulps_eq!(imb, 1.0);
    }

    #[test]
    fn test_single_processor_has_no_volume() {
        let triplets = (0..5).map(|i| Triplet::new(i, 4 - i, 1.0));
        let matrix = DistributedMatrix::from_triplets(5, 5, 1, triplets, &DistributionScheme::Cyclic).unwrap();
        assert_eq!(communication_volume(&matrix).unwrap(), 0);
        assert_ulps_eq!(load_imbalance(&matrix).unwrap(), 1.0);
    }
}
