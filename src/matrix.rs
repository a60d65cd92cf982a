use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sprs::TriMat;
use tracing::{debug, error};

use crate::algorithms::Error;
use crate::cost;
use crate::vector::DistributedVector;

/// A single nonzero `(row, col, value)` of a sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }
}

/// Multiset of row or column indices, mapping each index to the number of
/// nonzeros an image holds in it. Ordered, so local index lists come out sorted.
pub type CountedSet = BTreeMap<usize, usize>;

fn raise(set: &mut CountedSet, key: usize) {
    *set.entry(key).or_insert(0) += 1;
}

fn lower(set: &mut CountedSet, key: usize) {
    if let Some(count) = set.get_mut(&key) {
        if *count > 1 {
            *count -= 1;
        } else {
            set.remove(&key);
        }
    }
}

/// The vector layout an image uses after localization.
///
/// `indices` holds the global indices this image needs: first the ones it owns
/// (ascending), then the remote ones it touches but does not own (ascending).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalIndices {
    pub indices: Vec<usize>,
    pub num_local: usize,
    /// Owner of `indices[num_local + k]`.
    pub remote_owners: Vec<usize>,
    global_to_local: FxHashMap<usize, usize>,
}

impl LocalIndices {
    pub(crate) fn build(
        owned: Vec<usize>,
        touched: &CountedSet,
        owner_of: impl Fn(usize) -> usize,
    ) -> Self {
        let num_local = owned.len();
        let mut indices = owned;
        let mut remote_owners = Vec::new();

        // Both `indices[..num_local]` and the keys of `touched` are sorted, so a
        // single merge finds the remote ones.
        let mut local_idx = 0;
        for &idx in touched.keys() {
            while local_idx < num_local && indices[local_idx] < idx {
                local_idx += 1;
            }

            if local_idx == num_local || indices[local_idx] != idx {
                indices.push(idx);
                remote_owners.push(owner_of(idx));
            } else {
                local_idx += 1;
            }
        }

        let global_to_local = indices
            .iter()
            .enumerate()
            .map(|(local, &global)| (global, local))
            .collect();

        Self {
            indices,
            num_local,
            remote_owners,
            global_to_local,
        }
    }

    /// Position of a global index in this image's local vector, if it has one.
    pub fn local_index(&self, global: usize) -> Option<usize> {
        self.global_to_local.get(&global).copied()
    }

    /// Whether the image owns the global index.
    pub fn is_owned(&self, global: usize) -> bool {
        self.local_index(global)
            .map_or(false, |local| local < self.num_local)
    }
}

/// The part of a distributed matrix held by one (simulated) processor.
///
/// Triplets live in slots. Popping a triplet leaves a hole so that the local
/// indices of all other triplets stay valid until [`MatrixImage::clean`].
#[derive(Debug, Clone, Default)]
pub struct MatrixImage {
    slots: Vec<Option<Triplet>>,
    len: usize,
    row_set: CountedSet,
    col_set: CountedSet,
    local_v: Option<LocalIndices>,
    local_u: Option<LocalIndices>,
}

impl MatrixImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a triplet and return its local index.
    pub fn push_triplet(&mut self, triplet: Triplet) -> usize {
        raise(&mut self.row_set, triplet.row);
        raise(&mut self.col_set, triplet.col);
        self.slots.push(Some(triplet));
        self.len += 1;
        self.slots.len() - 1
    }

    /// Remove the triplet at `index`, leaving a hole.
    pub fn pop_element(&mut self, index: usize) -> Option<Triplet> {
        let triplet = self.slots.get_mut(index)?.take()?;
        lower(&mut self.row_set, triplet.row);
        lower(&mut self.col_set, triplet.col);
        self.len -= 1;
        Some(triplet)
    }

    pub fn get(&self, index: usize) -> Option<&Triplet> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triplet> + '_ {
        self.slots.iter().flatten()
    }

    /// Iterate over `(local index, triplet)` pairs, skipping holes.
    pub fn iter_indexed(&self) -> impl Iterator<Item = (usize, &Triplet)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|triplet| (index, triplet)))
    }

    /// The number of nonzeros in this image.
    pub fn nonzeros(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Non-empty rows of this image with their nonzero counts.
    pub fn row_set(&self) -> &CountedSet {
        &self.row_set
    }

    /// Non-empty columns of this image with their nonzero counts.
    pub fn col_set(&self) -> &CountedSet {
        &self.col_set
    }

    /// Drop the holes left by moved triplets.
    ///
    /// Returns, for every old local index, the new local index of the triplet
    /// that lived there (`None` for holes).
    pub fn clean(&mut self) -> Vec<Option<usize>> {
        let mut remap = Vec::with_capacity(self.slots.len());
        let mut next = 0;
        for slot in &self.slots {
            if slot.is_some() {
                remap.push(Some(next));
                next += 1;
            } else {
                remap.push(None);
            }
        }
        self.slots.retain(Option::is_some);
        remap
    }

    pub fn local_indices_v(&self) -> Option<&LocalIndices> {
        self.local_v.as_ref()
    }

    pub fn local_indices_u(&self) -> Option<&LocalIndices> {
        self.local_u.as_ref()
    }

    pub(crate) fn set_local_indices(&mut self, v: LocalIndices, u: LocalIndices) {
        self.local_v = Some(v);
        self.local_u = Some(u);
    }
}

impl FromIterator<Triplet> for MatrixImage {
    fn from_iter<I: IntoIterator<Item = Triplet>>(iter: I) -> Self {
        let mut image = MatrixImage::new();
        for triplet in iter {
            image.push_triplet(triplet);
        }
        image
    }
}

/// How triplets are spread over the processors when a matrix is built.
pub enum DistributionScheme {
    /// Row `i` goes to processor `i mod P`.
    Cyclic,
    /// Rows are split in `P` contiguous blocks.
    Block,
    /// Every nonzero goes to a uniformly random processor.
    Random { seed: Option<u64> },
    /// `f(row, col)` names the processor.
    Custom(Box<dyn Fn(usize, usize) -> usize + Send + Sync>),
}

impl fmt::Debug for DistributionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionScheme::Cyclic => write!(f, "Cyclic"),
            DistributionScheme::Block => write!(f, "Block"),
            DistributionScheme::Random { seed } => write!(f, "Random {{ seed: {seed:?} }}"),
            DistributionScheme::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Read access shared by everything that evaluates a partitioning.
pub trait SparseMatrix {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;
    fn nonzeros(&self) -> usize;
    fn images(&self) -> &[MatrixImage];

    fn procs(&self) -> usize {
        self.images().len()
    }

    /// A matrix without images has never been loaded or distributed.
    fn is_initialized(&self) -> bool {
        !self.images().is_empty()
    }
}

/// A `rows x cols` sparse matrix spread over `P` images.
#[derive(Debug, Clone, Default)]
pub struct DistributedMatrix {
    rows: usize,
    cols: usize,
    nonzeros: usize,
    images: Vec<MatrixImage>,
}

impl DistributedMatrix {
    /// An empty matrix with `procs` empty images.
    pub fn new(rows: usize, cols: usize, procs: usize) -> Self {
        Self {
            rows,
            cols,
            nonzeros: 0,
            images: (0..procs).map(|_| MatrixImage::new()).collect(),
        }
    }

    /// Build a matrix from triplets, spreading them with `scheme`.
    pub fn from_triplets<I>(
        rows: usize,
        cols: usize,
        procs: usize,
        triplets: I,
        scheme: &DistributionScheme,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Triplet>,
    {
        if procs == 0 {
            error!("cannot distribute a matrix over zero processors");
            return Err(Error::InvalidProcessorCount { procs });
        }

        let mut matrix = Self::new(rows, cols, procs);
        let mut rng = match scheme {
            DistributionScheme::Random { seed: Some(seed) } => SmallRng::seed_from_u64(*seed),
            _ => SmallRng::from_entropy(),
        };

        for (index, triplet) in triplets.into_iter().enumerate() {
            if triplet.row >= rows || triplet.col >= cols {
                error!(row = triplet.row, col = triplet.col, rows, cols, "triplet outside of the matrix");
                return Err(Error::IndexOutOfBounds {
                    row: triplet.row,
                    col: triplet.col,
                });
            }

            let target = match scheme {
                DistributionScheme::Cyclic => triplet.row % procs,
                DistributionScheme::Block => (procs * triplet.row) / rows,
                DistributionScheme::Random { .. } => rng.gen_range(0..procs),
                DistributionScheme::Custom(f) => f(triplet.row, triplet.col),
            };

            if target >= procs {
                error!(index, target, procs, "distribution function named a missing processor");
                return Err(Error::InvalidOwner {
                    index,
                    owner: target,
                    procs,
                });
            }

            matrix.push_triplet(target, triplet);
        }

        Ok(matrix)
    }

    pub fn images_mut(&mut self) -> &mut [MatrixImage] {
        &mut self.images
    }

    /// Insert a triplet into image `image`.
    ///
    /// # Panics
    ///
    /// When `image` is not an image of this matrix.
    pub fn push_triplet(&mut self, image: usize, triplet: Triplet) -> usize {
        debug_assert!(triplet.row < self.rows && triplet.col < self.cols);
        self.nonzeros += 1;
        self.images[image].push_triplet(triplet)
    }

    /// Replace the whole image list, e.g. after a full repartitioning pass.
    pub fn reset_images(&mut self, images: Vec<MatrixImage>) {
        self.nonzeros = images.iter().map(MatrixImage::nonzeros).sum();
        self.images = images;
    }

    /// Append empty images until there are `procs` of them.
    pub fn grow_procs(&mut self, procs: usize) {
        while self.images.len() < procs {
            self.images.push(MatrixImage::new());
        }
    }

    /// Move a single nonzero from image `from` to image `to`.
    ///
    /// Returns the local index of the nonzero in `to`, or `None` (and changes
    /// nothing) when `from` holds no nonzero at `local_index`.
    pub fn move_nonzero(&mut self, local_index: usize, from: usize, to: usize) -> Option<usize> {
        if from == to {
            return self.images.get(from)?.get(local_index).map(|_| local_index);
        }
        if to >= self.images.len() {
            return None;
        }
        let triplet = self.images.get_mut(from)?.pop_element(local_index)?;
        Some(self.images[to].push_triplet(triplet))
    }

    /// Compact every image. Invalidates local indices handed out before; the
    /// returned table maps `[image][old index]` to the new index.
    pub fn clean(&mut self) -> Vec<Vec<Option<usize>>> {
        self.images.iter_mut().map(MatrixImage::clean).collect()
    }

    /// Rebuild the images so that every nonzero goes to `target(ordinal, triplet)`.
    ///
    /// `ordinal` counts nonzeros in image order, the same order as [`Self::triplets`].
    pub fn redistribute<F>(&mut self, procs: usize, mut target: F)
    where
        F: FnMut(usize, &Triplet) -> usize,
    {
        let mut new_images: Vec<MatrixImage> = (0..procs).map(|_| MatrixImage::new()).collect();
        for (ordinal, triplet) in self.triplets().enumerate() {
            new_images[target(ordinal, triplet)].push_triplet(*triplet);
        }
        self.reset_images(new_images);
    }

    /// All nonzeros, image by image.
    pub fn triplets(&self) -> impl Iterator<Item = &Triplet> + '_ {
        self.images.iter().flat_map(MatrixImage::iter)
    }

    /// All nonzeros with the processor that owns them.
    pub fn owned_triplets(&self) -> impl Iterator<Item = (usize, &Triplet)> + '_ {
        self.images
            .iter()
            .enumerate()
            .flat_map(|(proc, image)| image.iter().map(move |triplet| (proc, triplet)))
    }

    /// Number of nonzeros in every column.
    pub fn column_weights(&self) -> Vec<usize> {
        cost::index_weights(&self.images, self.cols, MatrixImage::col_set)
    }

    /// Number of nonzeros in every row.
    pub fn row_weights(&self) -> Vec<usize> {
        cost::index_weights(&self.images, self.rows, MatrixImage::row_set)
    }

    /// The processor holding each column, for matrices partitioned by column.
    /// When a column is spread over several images the last one wins.
    pub fn column_owners(&self) -> Vec<Option<usize>> {
        let mut owners = vec![None; self.cols];
        for (proc, image) in self.images.iter().enumerate() {
            for &col in image.col_set().keys() {
                owners[col] = Some(proc);
            }
        }
        owners
    }

    pub fn communication_volume(&self) -> Result<usize, Error> {
        cost::communication_volume(self)
    }

    pub fn load_imbalance(&self) -> Result<f64, Error> {
        cost::load_imbalance(self)
    }

    /// Gather the distributed nonzeros into a single sprs triplet matrix.
    pub fn to_trimat(&self) -> TriMat<f64> {
        let mut tri = TriMat::with_capacity((self.rows, self.cols), self.nonzeros);
        for triplet in self.triplets() {
            tri.add_triplet(triplet.row, triplet.col, triplet.value);
        }
        tri
    }

    /// Sparse matrix-vector product `y = A x`.
    ///
    /// Every image accumulates its own contribution in parallel; once all of
    /// them are done the partial rows are merged into `y`.
    pub fn spmv(&self, x: &DistributedVector, y: &mut DistributedVector) -> Result<(), Error> {
        if !self.is_initialized() {
            error!("SpMV on an uninitialized matrix");
            return Err(Error::UninitializedMatrix);
        }
        if x.len() != self.cols {
            error!(expected = self.cols, actual = x.len(), "SpMV input vector has the wrong length");
            return Err(Error::InputLenMismatch {
                expected: self.cols,
                actual: x.len(),
            });
        }
        if y.len() != self.rows {
            error!(expected = self.rows, actual = y.len(), "SpMV output vector has the wrong length");
            return Err(Error::InputLenMismatch {
                expected: self.rows,
                actual: y.len(),
            });
        }

        let input = x.values();
        let partial_rows: Vec<FxHashMap<usize, f64>> = self
            .images
            .par_iter()
            .map(|image| {
                let mut rows = FxHashMap::default();
                for triplet in image.iter() {
                    *rows.entry(triplet.row).or_insert(0.0) += triplet.value * input[triplet.col];
                }
                rows
            })
            .collect();

        y.fill(0.0);
        let output = y.values_mut();
        for rows in partial_rows {
            for (row, value) in rows {
                output[row] += value;
            }
        }

        debug!(procs = self.procs(), nonzeros = self.nonzeros, "SpMV done");
        Ok(())
    }
}

impl SparseMatrix for DistributedMatrix {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn nonzeros(&self) -> usize {
        self.nonzeros
    }

    fn images(&self) -> &[MatrixImage] {
        &self.images
    }
}
