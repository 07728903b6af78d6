use crate::error::ConfigError;
use crate::matrix::{BlockKind, StorageOrder};
use crate::pattern::SparsityPattern;
use crate::Real;
use log::trace;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// The logical shape `(num_equ, num_sol, nn_equ, nn_sol)` of a dense element array.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElementShape {
    /// Degrees of freedom per equation node.
    pub num_equ: usize,
    /// Degrees of freedom per solution node.
    pub num_sol: usize,
    /// Number of equation nodes of the element.
    pub nn_equ: usize,
    /// Number of solution nodes of the element.
    pub nn_sol: usize,
}

impl ElementShape {
    pub fn len(&self) -> usize {
        self.num_equ * self.num_sol * self.nn_equ * self.nn_sol
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of entry `(i_equ, i_sol, k_equ, k_sol)` in the flattened array.
    ///
    /// `i_equ` varies fastest, followed by `i_sol`, `k_equ` and `k_sol`.
    #[inline(always)]
    pub fn flat_index(&self, i_equ: usize, i_sol: usize, k_equ: usize, k_sol: usize) -> usize {
        i_equ + self.num_equ * (i_sol + self.num_sol * (k_equ + self.nn_equ * k_sol))
    }

    /// The shape of the array with equation and solution roles swapped.
    pub fn transposed(&self) -> Self {
        Self {
            num_equ: self.num_sol,
            num_sol: self.num_equ,
            nn_equ: self.nn_sol,
            nn_sol: self.nn_equ,
        }
    }

    /// Swaps the equation and solution roles of an element array of this shape.
    ///
    /// # Panics
    ///
    /// Panics if `array` does not have length `self.len()`.
    pub fn transpose_array<T: Copy>(&self, array: &[T]) -> Vec<T> {
        assert_eq!(array.len(), self.len(), "Array length must match element shape");
        let transposed = self.transposed();
        let mut result = Vec::with_capacity(array.len());
        for k_sol in 0..transposed.nn_sol {
            for k_equ in 0..transposed.nn_equ {
                for i_sol in 0..transposed.num_sol {
                    for i_equ in 0..transposed.num_equ {
                        result.push(array[self.flat_index(i_sol, i_equ, k_sol, k_equ)]);
                    }
                }
            }
        }
        result
    }
}

/// Counts of sub-block lookups performed by a scatter-add.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ScatterStats {
    /// Lookups that found their pattern entry and were accumulated.
    pub accumulated: usize,
    /// Lookups that found no pattern entry and were silently dropped.
    pub dropped: usize,
}

impl Add for ScatterStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            accumulated: self.accumulated + rhs.accumulated,
            dropped: self.dropped + rhs.dropped,
        }
    }
}

impl AddAssign for ScatterStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ScatterStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Mutable access to the tile stored in an entry slot of a block.
pub(crate) trait TileSink<T> {
    fn tile_mut(&mut self, block: BlockKind, slot: usize) -> &mut [T];
}

/// The immutable structure of a matrix, as seen by the scatter-add.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ScatterLayout<'a> {
    pub order: StorageOrder,
    pub row_block_size: usize,
    pub col_block_size: usize,
    pub num_my_rows: usize,
    pub num_my_cols: usize,
    pub main: &'a SparsityPattern,
    pub col_couple: &'a SparsityPattern,
    pub row_couple: &'a SparsityPattern,
}

impl<'a> ScatterLayout<'a> {
    fn pattern(&self, kind: BlockKind) -> &'a SparsityPattern {
        match kind {
            BlockKind::Main => self.main,
            BlockKind::ColCouple => self.col_couple,
            BlockKind::RowCouple => self.row_couple,
        }
    }

    /// Number of block rows per equation node and block columns per solution node.
    ///
    /// Zero degrees of freedom give zero sub-blocks, so the element contributes nothing.
    pub fn subblocks(&self, num_equ: usize, num_sol: usize) -> Result<(usize, usize), ConfigError> {
        let check = |dofs: usize, block_size: usize| {
            if dofs % block_size == 0 {
                Ok(dofs / block_size)
            } else {
                Err(ConfigError::IndivisibleDegreesOfFreedom { dofs, block_size })
            }
        };
        Ok((check(num_equ, self.row_block_size)?, check(num_sol, self.col_block_size)?))
    }
}

/// Checks the element shape against the matrix before any mutation takes place.
pub(crate) fn validate_element(
    layout: &ScatterLayout,
    equation_nodes: &[usize],
    num_equ: usize,
    solution_nodes: &[usize],
    num_sol: usize,
    array_len: usize,
) -> Result<(), ConfigError> {
    layout.subblocks(num_equ, num_sol)?;
    let shape = ElementShape {
        num_equ,
        num_sol,
        nn_equ: equation_nodes.len(),
        nn_sol: solution_nodes.len(),
    };
    if shape.len() != array_len {
        return Err(ConfigError::ElementArrayLength {
            expected: shape.len(),
            actual: array_len,
        });
    }
    Ok(())
}

/// One side (equation or solution) of an element.
#[derive(Copy, Clone)]
struct Side<'a> {
    nodes: &'a [usize],
    num_subblocks: usize,
}

/// A `(node position, sub-block, block index)` triple on one side of an element.
type SidePosition = (usize, usize, usize);

/// Accumulates a validated element array into the tiles of the sink.
///
/// Loops run over the major side of the storage order (equation nodes for row-major storage,
/// solution nodes for column-major storage) on the outside. The storage order enters only
/// through [`StorageOrder::major_minor`], which decides which side drives the outer loops and
/// how a located entry maps to a pattern lane.
pub(crate) fn scatter_element<T: Real>(
    layout: &ScatterLayout,
    sink: &mut impl TileSink<T>,
    equation_nodes: &[usize],
    num_equ: usize,
    solution_nodes: &[usize],
    num_sol: usize,
    element_array: &[T],
) -> ScatterStats {
    let rbs = layout.row_block_size;
    let cbs = layout.col_block_size;
    let shape = ElementShape {
        num_equ,
        num_sol,
        nn_equ: equation_nodes.len(),
        nn_sol: solution_nodes.len(),
    };
    debug_assert_eq!(shape.len(), element_array.len());

    let equ = Side {
        nodes: equation_nodes,
        num_subblocks: num_equ / rbs,
    };
    let sol = Side {
        nodes: solution_nodes,
        num_subblocks: num_sol / cbs,
    };
    let order = layout.order;
    let (major_side, minor_side) = order.major_minor(equ, sol);

    let mut stats = ScatterStats::default();
    for (k_major, &node_major) in major_side.nodes.iter().enumerate() {
        for l_major in 0..major_side.num_subblocks {
            let major_pos: SidePosition = (k_major, l_major, node_major * major_side.num_subblocks + l_major);
            for (k_minor, &node_minor) in minor_side.nodes.iter().enumerate() {
                for l_minor in 0..minor_side.num_subblocks {
                    let minor_pos: SidePosition = (k_minor, l_minor, node_minor * minor_side.num_subblocks + l_minor);
                    let ((k_equ, l_row, i_row), (k_sol, l_col, i_col)) = order.major_minor(major_pos, minor_pos);

                    // Ghost x ghost pairs are never stored
                    let Some(entry) = BlockKind::locate(i_row, i_col, layout.num_my_rows, layout.num_my_cols) else {
                        continue;
                    };
                    let (major, minor) = order.major_minor(entry.row, entry.col);
                    let Some(slot) = layout.pattern(entry.block).find(major, minor) else {
                        trace!(
                            "Dropped contribution to ({}, {}): no entry in the {} pattern",
                            i_row,
                            i_col,
                            entry.block.name()
                        );
                        stats.dropped += 1;
                        continue;
                    };

                    let tile = sink.tile_mut(entry.block, slot);
                    for ic in 0..cbs {
                        let i_sol = ic + cbs * l_col;
                        for ir in 0..rbs {
                            let i_equ = ir + rbs * l_row;
                            tile[ir + rbs * ic] += element_array[shape.flat_index(i_equ, i_sol, k_equ, k_sol)];
                        }
                    }
                    stats.accumulated += 1;
                }
            }
        }
    }
    stats
}

/// Accumulates a dense element vector, shaped `(num_equ, equation_nodes.len())` with the
/// first index varying fastest, into the locally owned scalar rows of `rhs`.
///
/// Row `node * num_equ + i_equ` is local if it is smaller than `rhs.len()`. Contributions to
/// ghost rows are skipped; they belong to the rank that owns the row.
pub fn scatter_add_vector<T: Real>(
    rhs: &mut [T],
    equation_nodes: &[usize],
    num_equ: usize,
    element_vector: &[T],
) -> Result<ScatterStats, ConfigError> {
    let expected = num_equ * equation_nodes.len();
    if element_vector.len() != expected {
        return Err(ConfigError::ElementArrayLength {
            expected,
            actual: element_vector.len(),
        });
    }

    let mut stats = ScatterStats::default();
    for (k_equ, &node) in equation_nodes.iter().enumerate() {
        for i_equ in 0..num_equ {
            if let Some(entry) = rhs.get_mut(node * num_equ + i_equ) {
                *entry += element_vector[i_equ + num_equ * k_equ];
                stats.accumulated += 1;
            }
        }
    }
    Ok(stats)
}
