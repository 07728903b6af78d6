//! Sparsity patterns and their construction from element connectivity.
use crate::error::PatternError;
use crate::matrix::{BlockKind, LocalExtents, StorageOrder};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, TryReserveError};
use std::ops::Range;

/// The base added to every stored pointer and index.
///
/// One-based storage exists for interoperability with consumers that expect Fortran-style
/// indexing. Lookups always take zero-based (logical) indices; the base is applied internally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexBase {
    #[default]
    Zero,
    One,
}

impl IndexBase {
    pub fn offset(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

/// An immutable compressed adjacency structure.
///
/// For every *major* lane `i` in `0 .. num_output` (a row for row-major storage, a column for
/// column-major storage), `index[ptr[i] - base .. ptr[i + 1] - base]` holds the minor indices
/// of the lane, each shifted by the index base. Indices within a lane are distinct but need
/// not be sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparsityPattern {
    num_output: usize,
    num_input: usize,
    ptr: Vec<usize>,
    index: Vec<usize>,
    base: IndexBase,
}

impl SparsityPattern {
    /// A pattern without any stored entries.
    pub fn empty(num_output: usize, num_input: usize, base: IndexBase) -> Self {
        Self {
            num_output,
            num_input,
            ptr: vec![base.offset(); num_output + 1],
            index: Vec::new(),
            base,
        }
    }

    /// Builds a pattern from pointer and index arrays that already include the index base.
    pub fn try_from_offsets_and_indices(
        num_output: usize,
        num_input: usize,
        ptr: Vec<usize>,
        index: Vec<usize>,
        base: IndexBase,
    ) -> Result<Self, PatternError> {
        let offset = base.offset();
        if ptr.len() != num_output + 1 {
            return Err(PatternError::InvalidPointerLength {
                expected: num_output + 1,
                actual: ptr.len(),
            });
        }
        if ptr[0] != offset {
            return Err(PatternError::InvalidFirstPointer {
                expected: offset,
                actual: ptr[0],
            });
        }
        let last = ptr[num_output];
        if last != index.len() + offset {
            return Err(PatternError::InvalidLastPointer {
                expected: index.len() + offset,
                actual: last,
            });
        }
        if let Some((major, _)) = ptr
            .iter()
            .tuple_windows()
            .find_position(|(begin, end)| begin > end)
        {
            return Err(PatternError::DecreasingPointers { major });
        }

        let mut lane_workspace = Vec::new();
        for (major, (&begin, &end)) in ptr.iter().tuple_windows().enumerate() {
            let lane = &index[begin - offset..end - offset];
            if let Some(&bad) = lane.iter().find(|&&idx| idx < offset || idx >= num_input + offset) {
                return Err(PatternError::IndexOutOfBounds { major, index: bad });
            }
            lane_workspace.clear();
            lane_workspace.extend_from_slice(lane);
            lane_workspace.sort_unstable();
            if let Some((&duplicate, _)) = lane_workspace.iter().tuple_windows().find(|(a, b)| a == b) {
                return Err(PatternError::DuplicateIndex {
                    major,
                    index: duplicate,
                });
            }
        }

        Ok(Self {
            num_output,
            num_input,
            ptr,
            index,
            base,
        })
    }

    /// Builds a pattern from lexicographically sorted, zero-based `(major, minor)` pairs.
    ///
    /// Consecutive duplicates are merged.
    ///
    /// # Panics
    ///
    /// Panics if the pairs are not sorted or out of bounds, or if the pointer array can not be
    /// allocated.
    pub fn from_sorted_entries(
        num_output: usize,
        num_input: usize,
        entries: impl IntoIterator<Item = (usize, usize)>,
        base: IndexBase,
    ) -> Self {
        Self::try_from_sorted_entries(num_output, num_input, entries, base)
            .unwrap_or_else(|err| panic!("Failed to allocate pointers for {num_output} lanes: {err}"))
    }

    /// As [`from_sorted_entries`](Self::from_sorted_entries), but reports a failure to
    /// allocate the pointer array instead of panicking. Used where `num_output` comes from
    /// untrusted input.
    pub(crate) fn try_from_sorted_entries(
        num_output: usize,
        num_input: usize,
        entries: impl IntoIterator<Item = (usize, usize)>,
        base: IndexBase,
    ) -> Result<Self, TryReserveError> {
        let offset = base.offset();
        let mut ptr = Vec::new();
        ptr.try_reserve_exact(num_output.saturating_add(1))?;
        let mut index = Vec::new();
        ptr.push(offset);

        let mut current_major = 0;
        let mut prev = None;
        for (major, minor) in entries {
            assert!(major < num_output && minor < num_input, "Entry out of bounds");
            assert!(prev.map_or(true, |p| p <= (major, minor)), "Entries must be sorted");
            // A while loop, so that consecutive empty lanes get their offsets too
            while major > current_major {
                ptr.push(index.len() + offset);
                current_major += 1;
            }
            if prev != Some((major, minor)) {
                index.push(minor + offset);
            }
            prev = Some((major, minor));
        }

        // Fill out offsets for the remaining empty lanes
        while ptr.len() < num_output + 1 {
            ptr.push(index.len() + offset);
        }

        Ok(Self {
            num_output,
            num_input,
            ptr,
            index,
            base,
        })
    }

    /// Number of major lanes (local rows for row-major storage).
    pub fn num_output(&self) -> usize {
        self.num_output
    }

    /// Extent of the minor dimension (local columns for row-major storage).
    pub fn num_input(&self) -> usize {
        self.num_input
    }

    pub fn nnz(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index_base(&self) -> IndexBase {
        self.base
    }

    /// The stored pointer array, including the index base.
    pub fn ptr(&self) -> &[usize] {
        &self.ptr
    }

    /// The stored index array, including the index base.
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    /// The range of entry slots belonging to the given major lane.
    ///
    /// # Panics
    ///
    /// Panics if `major >= num_output`.
    pub fn lane_range(&self, major: usize) -> Range<usize> {
        let offset = self.base.offset();
        self.ptr[major] - offset..self.ptr[major + 1] - offset
    }

    /// The first entry slot of the given lane, along with the stored (base-shifted) minor
    /// indices of the lane.
    pub fn neighbours_of(&self, major: usize) -> (usize, &[usize]) {
        let range = self.lane_range(major);
        (range.start, &self.index[range])
    }

    /// Finds the entry slot of the zero-based `(major, minor)` pair.
    ///
    /// Scans the lane linearly and returns the first match. Returns `None` if the major lane
    /// does not exist or the pair is not stored.
    pub fn find(&self, major: usize, minor: usize) -> Option<usize> {
        if major >= self.num_output {
            return None;
        }
        let stored = minor + self.base.offset();
        let (first, lane) = self.neighbours_of(major);
        lane.iter()
            .position(|&idx| idx == stored)
            .map(|local| first + local)
    }

    /// Iterates over all stored entries as zero-based `(major, minor)` pairs, in storage order.
    pub fn entries(&self) -> impl '_ + Iterator<Item = (usize, usize)> {
        let offset = self.base.offset();
        (0..self.num_output).flat_map(move |major| {
            self.index[self.lane_range(major)]
                .iter()
                .map(move |&idx| (major, idx - offset))
        })
    }

    /// Returns the same pattern stored with a different index base.
    pub fn with_index_base(&self, base: IndexBase) -> Self {
        let old = self.base.offset();
        let new = base.offset();
        let rebase = |x: &usize| x - old + new;
        Self {
            num_output: self.num_output,
            num_input: self.num_input,
            ptr: self.ptr.iter().map(rebase).collect(),
            index: self.index.iter().map(rebase).collect(),
            base,
        }
    }
}

/// The three patterns making up a distributed matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPatterns {
    pub main: SparsityPattern,
    pub col_couple: SparsityPattern,
    pub row_couple: SparsityPattern,
}

/// Collects the block sparsity patterns touched by a set of elements.
///
/// Nodes are expanded into `num_subblocks_equ` block rows and `num_subblocks_sol` block
/// columns each, in the same way as the scatter-add engine does, so that a matrix allocated
/// from the resulting patterns stores every pair that assembly of the same elements requests.
/// Ghost x ghost pairs are not stored.
#[derive(Debug, Clone)]
pub struct DistributedPatternBuilder {
    extents: LocalExtents,
    order: StorageOrder,
    base: IndexBase,
    num_subblocks_equ: usize,
    num_subblocks_sol: usize,
    // One set of zero-based (major, minor) pairs per block. A BTreeSet stores every entry
    // exactly once, which matters since neighbouring elements share many entries.
    main: BTreeSet<(usize, usize)>,
    col_couple: BTreeSet<(usize, usize)>,
    row_couple: BTreeSet<(usize, usize)>,
}

impl DistributedPatternBuilder {
    pub fn new(extents: LocalExtents, order: StorageOrder, base: IndexBase) -> Self {
        Self {
            extents,
            order,
            base,
            num_subblocks_equ: 1,
            num_subblocks_sol: 1,
            main: BTreeSet::new(),
            col_couple: BTreeSet::new(),
            row_couple: BTreeSet::new(),
        }
    }

    /// Sets the number of block rows per equation node and block columns per solution node.
    pub fn with_subblocks(mut self, num_subblocks_equ: usize, num_subblocks_sol: usize) -> Self {
        self.num_subblocks_equ = num_subblocks_equ;
        self.num_subblocks_sol = num_subblocks_sol;
        self
    }

    pub fn add_element(&mut self, equation_nodes: &[usize], solution_nodes: &[usize]) {
        let extents = self.extents;
        for &node_equ in equation_nodes {
            for l_row in 0..self.num_subblocks_equ {
                let row = node_equ * self.num_subblocks_equ + l_row;
                for &node_sol in solution_nodes {
                    for l_col in 0..self.num_subblocks_sol {
                        let col = node_sol * self.num_subblocks_sol + l_col;
                        let in_bounds = row < extents.num_my_rows + extents.num_ghost_rows
                            && col < extents.num_my_cols + extents.num_ghost_cols;
                        if !in_bounds {
                            continue;
                        }
                        if let Some(entry) = BlockKind::locate(row, col, extents.num_my_rows, extents.num_my_cols) {
                            let pair = self.order.major_minor(entry.row, entry.col);
                            let set = match entry.block {
                                BlockKind::Main => &mut self.main,
                                BlockKind::ColCouple => &mut self.col_couple,
                                BlockKind::RowCouple => &mut self.row_couple,
                            };
                            set.insert(pair);
                        }
                    }
                }
            }
        }
    }

    pub fn build(self) -> BlockPatterns {
        let order = self.order;
        let base = self.base;
        let extents = self.extents;
        let make = |kind: BlockKind, entries: BTreeSet<(usize, usize)>| {
            let (rows, cols) = extents.block_dims(kind);
            let (num_output, num_input) = order.major_minor(rows, cols);
            SparsityPattern::from_sorted_entries(num_output, num_input, entries, base)
        };
        BlockPatterns {
            main: make(BlockKind::Main, self.main),
            col_couple: make(BlockKind::ColCouple, self.col_couple),
            row_couple: make(BlockKind::RowCouple, self.row_couple),
        }
    }
}
