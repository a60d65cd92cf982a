use tracing::{error, info};

use crate::algorithms::Error;
use crate::matrix::{DistributedMatrix, SparseMatrix};
use crate::Partition;

/// Whether whole rows or whole columns are dealt out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclicKind {
    #[default]
    Row,
    Column,
}

/// Cyclic Partitioner
///
/// Deals rows (or columns) out over the processors like cards: index `i`
/// goes to processor `i mod procs`. Fast, balanced on regular matrices, and
/// blind to the communication it causes.
///
/// # Example
///
/// ```rust
/// use HyperCut::algorithms::{CyclicKind, CyclicPartitioner};
/// use HyperCut::gen_matrix::eye;
/// use HyperCut::matrix::SparseMatrix;
/// use HyperCut::Partition;
///
/// let mut matrix = eye(8, 1);
/// CyclicPartitioner { procs: 4, kind: CyclicKind::Column }.partition(&mut matrix).unwrap();
///
/// assert_eq!(matrix.procs(), 4);
/// assert!(matrix.images().iter().all(|image| image.nonzeros() == 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclicPartitioner {
    pub procs: usize,
    pub kind: CyclicKind,
}

impl<'a> Partition<&'a mut DistributedMatrix> for CyclicPartitioner {
    type Metadata = ();
    type Error = Error;

    fn partition(&mut self, matrix: &'a mut DistributedMatrix) -> Result<Self::Metadata, Self::Error> {
        if self.procs == 0 {
            error!("cyclic partitioning over zero processors");
            return Err(Error::InvalidProcessorCount { procs: 0 });
        }
        if !matrix.is_initialized() {
            error!("cyclic partitioning of an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }

        let procs = self.procs;
        match self.kind {
            CyclicKind::Row => matrix.redistribute(procs, |_, triplet| triplet.row % procs),
            CyclicKind::Column => matrix.redistribute(procs, |_, triplet| triplet.col % procs),
        }

        info!(procs, kind = ?self.kind, imbalance = matrix.load_imbalance()?, "cyclic partitioning done");
        Ok(())
    }
}
