pub mod matrix;
pub mod vector;
pub mod cost;
pub mod gen_matrix;
pub mod hypergraph;
pub mod io;
pub mod algorithms;

// The `Partition` trait allows for partitioning data.
// Partitioning algorithms implement this trait.
// The generic argument `M` defines the input of the algorithms, for every
// matrix partitioner a `&mut DistributedMatrix` whose images are rewritten
// in place: after a successful call image `p` holds the nonzeros of part `p`.
pub trait Partition<M> {
    // Diagnostic data returned for a specific run of the algorithm.
    type Metadata;

    // Error details, should the algorithm fail to run.
    type Error;

    // Partition the given data. On error the data is left as it was handed in.
    fn partition(&mut self, data: M) -> Result<Self::Metadata, Self::Error>;
}

// The `Refine` trait is implemented by algorithms that improve an existing
// partitioning instead of computing one from scratch.
pub trait Refine<M> {
    type Metadata;

    type Error;

    // Improve the partitioning held by `data`. Refining never makes the
    // communication volume worse.
    fn refine(&mut self, data: M) -> Result<Self::Metadata, Self::Error>;
}
