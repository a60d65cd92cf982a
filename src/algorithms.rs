use std::fmt;

mod cyclic;
mod greedy_vector;
mod kernighan_lin;
mod medium_grain;
mod multilevel_partitioner;
mod pulp;

pub use cyclic::{CyclicKind, CyclicPartitioner};
pub use greedy_vector::GreedyVectorPartitioner;
pub use kernighan_lin::{gain_for_pin_in_row, KernighanLin, KernighanLinPartitioner, KernighanLinState, KernighanLinSummary, PassSummary};
pub use medium_grain::{MediumGrainPartitioner, MediumGrainState, MediumGrainSummary};
pub use multilevel_partitioner::{MultiLevelPartitioner, MultiLevelSummary};
pub use pulp::{pulp_affinity, PulpPartitioner, PulpSession, PulpSummary, RefineSummary};

/// Common errors thrown by algorithms.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The matrix has no images: it was never loaded or distributed.
    UninitializedMatrix,

    /// Input sets don't have matching lengths.
    InputLenMismatch { expected: usize, actual: usize },

    /// The operation needs a square matrix.
    NonSquareMatrix { rows: usize, cols: usize },

    /// When a partition improving algorithm is given more than 2 parts.
    BiPartitioningOnly { procs: usize },

    /// The hypergraph model cannot be built for this matrix distribution.
    UnsupportedModel,

    /// A partitioning could not be brought within the allowed imbalance.
    InfeasibleBalance { imbalance: f64, epsilon: f64 },

    /// An index was assigned to a processor that does not exist.
    InvalidOwner { index: usize, owner: usize, procs: usize },

    /// A processor count of zero, or one that does not match the matrix.
    InvalidProcessorCount { procs: usize },

    /// A nonzero lies outside of the matrix.
    IndexOutOfBounds { row: usize, col: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UninitializedMatrix => write!(f, "matrix is not initialized"),
            Error::InputLenMismatch { expected, actual } => write!(
                f,
                "input sets don't have the same length (expected {expected} items, got {actual})",
            ),
            Error::NonSquareMatrix { rows, cols } => {
                write!(f, "expected a square matrix, got {rows}x{cols}")
            }
            Error::BiPartitioningOnly { procs } => {
                write!(f, "expected exactly two parts, got {procs}")
            }
            Error::UnsupportedModel => {
                write!(f, "hypergraph model is not supported for this matrix")
            }
            Error::InfeasibleBalance { imbalance, epsilon } => write!(
                f,
                "could not reach imbalance {} (stuck at {imbalance})",
                1.0 + epsilon
            ),
            Error::InvalidOwner { index, owner, procs } => write!(
                f,
                "index {index} is owned by processor {owner}, but there are only {procs}"
            ),
            Error::InvalidProcessorCount { procs } => {
                write!(f, "invalid processor count {procs}")
            }
            Error::IndexOutOfBounds { row, col } => {
                write!(f, "nonzero ({row}, {col}) lies outside of the matrix")
            }
        }
    }
}

impl std::error::Error for Error {}
