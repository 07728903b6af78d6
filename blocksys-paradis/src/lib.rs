//! paradis
//! =======
//!
//! Parallel processing of disjoint subsets of indices.
//!
//! A [`DisjointSubsets`] is a labelled collection of index subsets in which no index appears in
//! more than one subset. Any work that only writes to storage addressed by the indices of its own
//! subset may therefore run concurrently with the work of every other subset, without locks.

pub mod coloring;
pub mod slice;

use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

/// A set of subsets of indices, in which the intersection of indices between any two subsets is
/// empty.
///
/// Indices may repeat *within* a subset.
///
/// Serialized as a list of `(label, subset)` pairs. Deserialization checks disjointness again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<(usize, Vec<usize>)>", try_from = "Vec<(usize, Vec<usize>)>")]
pub struct DisjointSubsets {
    max_index: Option<usize>,
    // Subset `i` occupies `indices[offsets[i] .. offsets[i + 1]]`
    offsets: Vec<usize>,
    indices: Vec<usize>,
    labels: Vec<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubsetsNotDisjointError {
    /// The first index found to be shared by two subsets.
    pub index: usize,
}

impl fmt::Display for SubsetsNotDisjointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index {} is shared by more than one subset", self.index)
    }
}

impl std::error::Error for SubsetsNotDisjointError {}

impl Default for DisjointSubsets {
    fn default() -> Self {
        Self {
            max_index: None,
            offsets: vec![0],
            indices: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl DisjointSubsets {
    /// Builds disjoint subsets from `(label, subset)` pairs, verifying that no index is shared
    /// between two subsets.
    pub fn try_from_labeled_subsets<'a, I>(subsets: I) -> Result<Self, SubsetsNotDisjointError>
    where
        I: IntoIterator<Item = (usize, &'a [usize])>,
    {
        let mut result = Self::default();
        let mut global_index_set = HashSet::new();
        // A subset may contain duplicates, so we deduplicate locally before checking against
        // the indices of all previous subsets.
        let mut local_index_set = HashSet::new();

        for (label, subset) in subsets {
            local_index_set.clear();
            local_index_set.extend(subset.iter().copied());
            for &idx in &local_index_set {
                if !global_index_set.insert(idx) {
                    return Err(SubsetsNotDisjointError { index: idx });
                }
            }
            result.push_unchecked(label, subset);
        }

        Ok(result)
    }

    /// Appends a subset without checking it against the existing subsets.
    ///
    /// Only available inside the crate: the coloring routines guarantee disjointness by
    /// construction.
    pub(crate) fn push_unchecked(&mut self, label: usize, subset: &[usize]) {
        if let Some(&subset_max) = subset.iter().max() {
            self.max_index = Some(self.max_index.map_or(subset_max, |m| m.max(subset_max)));
        }
        self.indices.extend_from_slice(subset);
        self.offsets.push(self.indices.len());
        self.labels.push(label);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The largest index present in any subset, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.max_index
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn subset(&self, i: usize) -> Option<&[usize]> {
        let range = self.subset_range(i)?;
        self.indices.get(range)
    }

    fn subset_range(&self, i: usize) -> Option<Range<usize>> {
        let begin = *self.offsets.get(i)?;
        let end = *self.offsets.get(i + 1)?;
        Some(begin..end)
    }

    /// Iterates over `(label, subset)` pairs.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (usize, &[usize])> {
        self.labels
            .iter()
            .copied()
            .zip(self.offsets.windows(2).map(move |w| &self.indices[w[0]..w[1]]))
    }

    /// Parallel iterator over `(label, subset)` pairs.
    ///
    /// Work performed for different items touches disjoint index sets, which is what makes it
    /// sound for consumers to write through a shared [`slice::ParallelSliceAccess`] as long as
    /// every write is addressed by the indices of the item's own subset.
    pub fn par_iter(&self) -> impl '_ + IndexedParallelIterator<Item = (usize, &[usize])> {
        (0..self.len()).into_par_iter().map(move |i| {
            let begin = self.offsets[i];
            let end = self.offsets[i + 1];
            (self.labels[i], &self.indices[begin..end])
        })
    }
}

impl From<DisjointSubsets> for Vec<(usize, Vec<usize>)> {
    fn from(subsets: DisjointSubsets) -> Self {
        subsets
            .iter()
            .map(|(label, subset)| (label, subset.to_vec()))
            .collect()
    }
}

impl TryFrom<Vec<(usize, Vec<usize>)>> for DisjointSubsets {
    type Error = SubsetsNotDisjointError;

    fn try_from(subsets: Vec<(usize, Vec<usize>)>) -> Result<Self, Self::Error> {
        Self::try_from_labeled_subsets(
            subsets
                .iter()
                .map(|(label, subset)| (*label, subset.as_slice())),
        )
    }
}
