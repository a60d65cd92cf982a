use std::ops::{Index, IndexMut};

/// A dense vector whose entries are each owned by one processor.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedVector {
    values: Vec<f64>,
    owners: Vec<usize>,
}

impl DistributedVector {
    /// A vector of length `len` filled with `value`, fully owned by processor 0.
    pub fn new(len: usize, value: f64) -> Self {
        Self {
            values: vec![value; len],
            owners: vec![0; len],
        }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        let owners = vec![0; values.len()];
        Self { values, owners }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn fill(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn owner(&self, index: usize) -> usize {
        self.owners[index]
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    /// Hand entry `index` over to processor `proc`.
    pub fn reassign(&mut self, index: usize, proc: usize) {
        self.owners[index] = proc;
    }

    /// Number of entries owned by each of `procs` processors.
    pub fn owned_counts(&self, procs: usize) -> Vec<usize> {
        let mut counts = vec![0; procs];
        for &owner in &self.owners {
            if owner < procs {
                counts[owner] += 1;
            }
        }
        counts
    }

    /// Global indices owned by `proc`, ascending.
    pub fn owned_by(&self, proc: usize) -> Vec<usize> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, &owner)| owner == proc)
            .map(|(index, _)| index)
            .collect()
    }
}

impl Index<usize> for DistributedVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.values[index]
    }
}

impl IndexMut<usize> for DistributedVector {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.values[index]
    }
}
