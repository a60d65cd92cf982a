use rand::Rng;

use crate::matrix::{DistributedMatrix, Triplet};

/// Generate the `n x n` identity matrix, rows spread cyclically over `procs`.
pub fn eye(n: usize, procs: usize) -> DistributedMatrix {
    if procs == 0 {
        panic!("Processor count must be positive.");
    }

    let mut matrix = DistributedMatrix::new(n, n, procs);
    for i in 0..n {
        matrix.push_triplet(i % procs, Triplet::new(i, i, 1.0));
    }

    matrix
}

/// Generate a random `rows x cols` matrix where each column holds about
/// `density * rows` nonzeros, randomly spread over `procs`.
///
/// Row positions are drawn by jumping ahead a random offset from the previous
/// nonzero of the column, so no position is ever drawn twice.
pub fn gen_random_matrix<R: Rng>(
    rows: usize,
    cols: usize,
    procs: usize,
    density: f64,
    rng: &mut R,
) -> DistributedMatrix {
    if !(density > 0.0 && density <= 1.0) {
        panic!("Density must lie in (0, 1].");
    }

    if procs == 0 {
        panic!("Processor count must be positive.");
    }

    let max_jump = ((2.0 / density).round() as usize).max(1);
    let mut matrix = DistributedMatrix::new(rows, cols, procs);

    for col in 0..cols {
        let mut row = rng.gen_range(0..max_jump);
        while row < rows {
            matrix.push_triplet(rng.gen_range(0..procs), Triplet::new(row, col, rng.gen_range(-1.0..1.0)));
            row += rng.gen_range(1..=max_jump);
        }
    }

    matrix
}
