//! The distributed block-sparse system matrix.
//!
//! A [`DistributedMatrix`] stores the locally owned part of a matrix that is partitioned across
//! ranks, split into three blocks:
//!
//! - `main`: local rows x local columns,
//! - `col_couple`: local rows x ghost columns (columns owned by neighbouring ranks),
//! - `row_couple`: ghost rows x local columns.
//!
//! Ghost rows and columns are numbered after the local ones, so row `r >= num_my_rows` is ghost
//! row `r - num_my_rows`. Which block a `(row, col)` pair belongs to depends only on comparing
//! the pair against `num_my_rows` and `num_my_cols`; see [`BlockKind::locate`].
//!
//! Every stored nonzero is a dense `row_block_size x col_block_size` tile, stored contiguously
//! and column-major within the tile.
use crate::assembly::{scatter_element, validate_element, ScatterLayout, ScatterStats, TileSink};
use crate::error::{ConfigError, UnsupportedFormatError};
use crate::pattern::{IndexBase, SparsityPattern};
use crate::Real;
use nalgebra::{DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::CooMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The physical layout of the block patterns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageOrder {
    /// Patterns are compressed by row ("CSR-like").
    #[default]
    RowMajor,
    /// Patterns are compressed by column ("CSC-like"). Also called the transposed order.
    ColMajor,
}

impl StorageOrder {
    /// Maps a logical `(row, col)` pair to the `(major, minor)` pair used for pattern lookups.
    ///
    /// The map is its own inverse, so it equally maps `(major, minor)` back to `(row, col)`.
    #[inline(always)]
    pub fn major_minor<I>(self, row: I, col: I) -> (I, I) {
        match self {
            Self::RowMajor => (row, col),
            Self::ColMajor => (col, row),
        }
    }

    pub fn transposed(self) -> Self {
        match self {
            Self::RowMajor => Self::ColMajor,
            Self::ColMajor => Self::RowMajor,
        }
    }
}

/// Format settings of a distributed matrix.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatrixFormat {
    pub storage_order: StorageOrder,
    pub index_base: IndexBase,
}

impl MatrixFormat {
    pub fn new(storage_order: StorageOrder, index_base: IndexBase) -> Self {
        Self {
            storage_order,
            index_base,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Local row x local column.
    Main,
    /// Local row x ghost column.
    ColCouple,
    /// Ghost row x local column.
    RowCouple,
}

/// A block and the block-relative logical `(row, col)` of an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub block: BlockKind,
    pub row: usize,
    pub col: usize,
}

impl BlockKind {
    pub const ALL: [BlockKind; 3] = [BlockKind::Main, BlockKind::ColCouple, BlockKind::RowCouple];

    /// Determines the block that stores the given (block) row and column.
    ///
    /// Returns `None` for ghost x ghost pairs, which are never stored.
    #[inline]
    pub fn locate(row: usize, col: usize, num_my_rows: usize, num_my_cols: usize) -> Option<BlockEntry> {
        match (row < num_my_rows, col < num_my_cols) {
            (true, true) => Some(BlockEntry {
                block: Self::Main,
                row,
                col,
            }),
            (true, false) => Some(BlockEntry {
                block: Self::ColCouple,
                row,
                col: col - num_my_cols,
            }),
            (false, true) => Some(BlockEntry {
                block: Self::RowCouple,
                row: row - num_my_rows,
                col,
            }),
            (false, false) => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::ColCouple => "column coupling",
            Self::RowCouple => "row coupling",
        }
    }
}

/// Local and ghost extents of a distributed matrix, in block rows and block columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalExtents {
    pub num_my_rows: usize,
    pub num_my_cols: usize,
    pub num_ghost_rows: usize,
    pub num_ghost_cols: usize,
}

impl LocalExtents {
    /// The logical `(rows, cols)` dimensions of the given block.
    pub fn block_dims(&self, kind: BlockKind) -> (usize, usize) {
        match kind {
            BlockKind::Main => (self.num_my_rows, self.num_my_cols),
            BlockKind::ColCouple => (self.num_my_rows, self.num_ghost_cols),
            BlockKind::RowCouple => (self.num_ghost_rows, self.num_my_cols),
        }
    }

    /// The logical `(row, col)` at which the given block starts.
    pub fn block_origin(&self, kind: BlockKind) -> (usize, usize) {
        match kind {
            BlockKind::Main => (0, 0),
            BlockKind::ColCouple => (0, self.num_my_cols),
            BlockKind::RowCouple => (self.num_my_rows, 0),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_my_rows + self.num_ghost_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_my_cols + self.num_ghost_cols
    }
}

/// A sparsity pattern paired with a dense value buffer of `nnz * block_size` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStore<T> {
    pattern: Arc<SparsityPattern>,
    block_size: usize,
    values: Vec<T>,
}

impl<T: Scalar> BlockStore<T> {
    pub fn try_from_pattern_and_values(
        pattern: Arc<SparsityPattern>,
        block_size: usize,
        values: Vec<T>,
    ) -> Result<Self, ConfigError> {
        let expected = pattern.nnz() * block_size;
        if values.len() != expected {
            return Err(ConfigError::VectorLength {
                what: "Block value buffer",
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            pattern,
            block_size,
            values,
        })
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn shared_pattern(&self) -> &Arc<SparsityPattern> {
        &self.pattern
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of stored tiles.
    pub fn nnz(&self) -> usize {
        self.pattern.nnz()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// The tile stored in the given entry slot.
    pub fn tile(&self, slot: usize) -> &[T] {
        &self.values[slot * self.block_size..(slot + 1) * self.block_size]
    }

    pub fn tile_mut(&mut self, slot: usize) -> &mut [T] {
        &mut self.values[slot * self.block_size..(slot + 1) * self.block_size]
    }

    pub fn into_parts(self) -> (Arc<SparsityPattern>, Vec<T>) {
        (self.pattern, self.values)
    }
}

impl<T: Scalar + Send + Sync> BlockStore<T> {
    /// Sets every value slot to `value`.
    pub fn fill(&mut self, value: T) {
        self.values
            .par_iter_mut()
            .with_min_len(1024)
            .for_each(|v| *v = value.clone());
    }
}

impl<T: Real> BlockStore<T> {
    pub fn zeros(pattern: Arc<SparsityPattern>, block_size: usize) -> Self {
        let values = vec![T::zero(); pattern.nnz() * block_size];
        Self {
            pattern,
            block_size,
            values,
        }
    }
}

/// Mutable tile access to the three value buffers of a matrix.
pub(crate) struct BlockValuesMut<'a, T> {
    block_size: usize,
    main: &'a mut [T],
    col_couple: &'a mut [T],
    row_couple: &'a mut [T],
}

impl<'a, T> BlockValuesMut<'a, T> {
    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn into_slices(self) -> [&'a mut [T]; 3] {
        [self.main, self.col_couple, self.row_couple]
    }
}

impl<'a, T> TileSink<T> for BlockValuesMut<'a, T> {
    #[inline]
    fn tile_mut(&mut self, block: BlockKind, slot: usize) -> &mut [T] {
        let values = match block {
            BlockKind::Main => &mut *self.main,
            BlockKind::ColCouple => &mut *self.col_couple,
            BlockKind::RowCouple => &mut *self.row_couple,
        };
        &mut values[slot * self.block_size..(slot + 1) * self.block_size]
    }
}

/// The locally owned part of a distributed, block-sparse system matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedMatrix<T> {
    format: MatrixFormat,
    row_block_size: usize,
    col_block_size: usize,
    extents: LocalExtents,
    main: BlockStore<T>,
    col_couple: BlockStore<T>,
    row_couple: BlockStore<T>,
}

impl<T: Real> DistributedMatrix<T> {
    /// Allocates a zeroed matrix over the three given patterns.
    ///
    /// The local extents are taken from the main pattern. The coupling patterns must agree
    /// with it on the local dimension they share with it, and all patterns must use the
    /// index base of `format`.
    pub fn allocate(
        main: Arc<SparsityPattern>,
        col_couple: Arc<SparsityPattern>,
        row_couple: Arc<SparsityPattern>,
        row_block_size: usize,
        col_block_size: usize,
        format: MatrixFormat,
    ) -> Result<Self, ConfigError> {
        if row_block_size == 0 || col_block_size == 0 {
            return Err(ConfigError::NonPositiveBlockSize {
                row_block_size,
                col_block_size,
            });
        }
        let named_patterns = [
            (&main, BlockKind::Main),
            (&col_couple, BlockKind::ColCouple),
            (&row_couple, BlockKind::RowCouple),
        ];
        for (pattern, kind) in named_patterns {
            if pattern.index_base() != format.index_base {
                return Err(ConfigError::IndexBaseMismatch { block: kind.name() });
            }
        }

        let order = format.storage_order;
        let logical_dims = |p: &SparsityPattern| order.major_minor(p.num_output(), p.num_input());
        let (num_my_rows, num_my_cols) = logical_dims(&*main);
        let (cc_rows, num_ghost_cols) = logical_dims(&*col_couple);
        let (num_ghost_rows, rc_cols) = logical_dims(&*row_couple);
        if cc_rows != num_my_rows {
            return Err(ConfigError::InconsistentPatterns {
                what: "number of local rows of the column coupling block",
                expected: num_my_rows,
                actual: cc_rows,
            });
        }
        if rc_cols != num_my_cols {
            return Err(ConfigError::InconsistentPatterns {
                what: "number of local columns of the row coupling block",
                expected: num_my_cols,
                actual: rc_cols,
            });
        }

        let block_size = row_block_size * col_block_size;
        Ok(Self {
            format,
            row_block_size,
            col_block_size,
            extents: LocalExtents {
                num_my_rows,
                num_my_cols,
                num_ghost_rows,
                num_ghost_cols,
            },
            main: BlockStore::zeros(main, block_size),
            col_couple: BlockStore::zeros(col_couple, block_size),
            row_couple: BlockStore::zeros(row_couple, block_size),
        })
    }

    /// Sets every value slot of all three blocks to `value`.
    pub fn reset_values(&mut self, value: T) {
        self.main.fill(value);
        self.col_couple.fill(value);
        self.row_couple.fill(value);
    }

    /// Accumulates a dense element array into the matrix.
    ///
    /// `element_array` is logically shaped `(num_equ, num_sol, equation_nodes.len(),
    /// solution_nodes.len())` with the first index varying fastest. Pairs that are not present
    /// in the pattern of their block are dropped and counted in the returned statistics.
    ///
    /// Fails without touching the matrix if the array length or the degrees of freedom per
    /// node do not match the block sizes. An element with zero degrees of freedom on either
    /// side has an empty array and leaves the matrix unchanged.
    pub fn add(
        &mut self,
        equation_nodes: &[usize],
        num_equ: usize,
        solution_nodes: &[usize],
        num_sol: usize,
        element_array: &[T],
    ) -> Result<ScatterStats, ConfigError> {
        let (layout, mut values) = self.split_for_scatter();
        validate_element(&layout, equation_nodes, num_equ, solution_nodes, num_sol, element_array.len())?;
        Ok(scatter_element(
            &layout,
            &mut values,
            equation_nodes,
            num_equ,
            solution_nodes,
            num_sol,
            element_array,
        ))
    }

    /// Scales the rows and columns selected by the masks to zero, writing
    /// `main_diagonal_value` to main-block diagonal entries in a masked row or column.
    ///
    /// Masks are indexed by scalar row/column over local and ghost extents, i.e. they have
    /// length `num_rows() * row_block_size` and `num_cols() * col_block_size`.
    pub fn nullify_rows_and_cols(
        &mut self,
        row_mask: &[bool],
        col_mask: &[bool],
        main_diagonal_value: T,
    ) -> Result<(), ConfigError> {
        let num_scalar_rows = self.extents.num_rows() * self.row_block_size;
        let num_scalar_cols = self.extents.num_cols() * self.col_block_size;
        check_length("Row mask", num_scalar_rows, row_mask.len())?;
        check_length("Column mask", num_scalar_cols, col_mask.len())?;

        let zero = T::zero();
        self.for_each_scalar_entry_mut(|kind, r, c, value| {
            if row_mask[r] || col_mask[c] {
                *value = if kind == BlockKind::Main && r == c {
                    main_diagonal_value
                } else {
                    zero
                };
            }
        });
        Ok(())
    }

    /// Computes `y = alpha * (main * x_local + col_couple * x_ghost) + beta * y` over the
    /// locally owned scalar rows.
    ///
    /// `x_ghost` holds the values of the ghost columns, which must have been received from
    /// their owners beforehand. If `beta` is zero, `y` is overwritten without being read.
    pub fn apply<'a>(
        &self,
        alpha: T,
        x_local: impl Into<DVectorView<'a, T>>,
        x_ghost: impl Into<DVectorView<'a, T>>,
        beta: T,
        y: impl Into<DVectorViewMut<'a, T>>,
    ) -> Result<(), ConfigError> {
        let x_local = x_local.into();
        let x_ghost = x_ghost.into();
        let mut y = y.into();
        let (rbs, cbs) = (self.row_block_size, self.col_block_size);
        check_length("Local input vector", self.extents.num_my_cols * cbs, x_local.len())?;
        check_length("Ghost input vector", self.extents.num_ghost_cols * cbs, x_ghost.len())?;
        check_length("Output vector", self.extents.num_my_rows * rbs, y.len())?;

        if beta == T::zero() {
            y.fill(T::zero());
        } else {
            y *= beta;
        }

        for (kind, x) in [(BlockKind::Main, &x_local), (BlockKind::ColCouple, &x_ghost)] {
            self.for_each_tile(kind, |row, col, tile| {
                for ic in 0..cbs {
                    let x_c = x[col * cbs + ic];
                    for ir in 0..rbs {
                        y[row * rbs + ir] += alpha * tile[ir + rbs * ic] * x_c;
                    }
                }
            });
        }
        Ok(())
    }

    /// Expands all three blocks into scalar triplets over the local and ghost extents.
    ///
    /// Rows and columns are zero-based and in logical orientation, whatever the storage order
    /// and index base of the matrix. Ghost rows (columns) follow the local ones.
    pub fn to_local_coo(&self) -> CooMatrix<T> {
        let (rbs, cbs) = (self.row_block_size, self.col_block_size);
        let mut coo = CooMatrix::new(self.extents.num_rows() * rbs, self.extents.num_cols() * cbs);
        for kind in BlockKind::ALL {
            let (row0, col0) = self.extents.block_origin(kind);
            self.for_each_tile(kind, |row, col, tile| {
                for ic in 0..cbs {
                    for ir in 0..rbs {
                        coo.push((row0 + row) * rbs + ir, (col0 + col) * cbs + ic, tile[ir + rbs * ic]);
                    }
                }
            });
        }
        coo
    }

    /// Calls `f(row, col, tile)` for every stored tile of the block, with block-relative
    /// logical block row and column.
    fn for_each_tile(&self, kind: BlockKind, mut f: impl FnMut(usize, usize, &[T])) {
        let order = self.format.storage_order;
        let block = self.block(kind);
        for (slot, (major, minor)) in block.pattern().entries().enumerate() {
            let (row, col) = order.major_minor(major, minor);
            f(row, col, block.tile(slot));
        }
    }

    /// Calls `f(kind, r, c, value)` for every stored scalar, with global scalar row and column.
    fn for_each_scalar_entry_mut(&mut self, mut f: impl FnMut(BlockKind, usize, usize, &mut T)) {
        let order = self.format.storage_order;
        let extents = self.extents;
        let (rbs, cbs) = (self.row_block_size, self.col_block_size);
        for kind in BlockKind::ALL {
            let (row0, col0) = extents.block_origin(kind);
            let block = match kind {
                BlockKind::Main => &mut self.main,
                BlockKind::ColCouple => &mut self.col_couple,
                BlockKind::RowCouple => &mut self.row_couple,
            };
            let pattern = Arc::clone(&block.pattern);
            for (slot, (major, minor)) in pattern.entries().enumerate() {
                let (row, col) = order.major_minor(major, minor);
                let tile = block.tile_mut(slot);
                for ic in 0..cbs {
                    for ir in 0..rbs {
                        let r = (row0 + row) * rbs + ir;
                        let c = (col0 + col) * cbs + ic;
                        f(kind, r, c, &mut tile[ir + rbs * ic]);
                    }
                }
            }
        }
    }
}

impl<T> DistributedMatrix<T> {
    pub fn format(&self) -> MatrixFormat {
        self.format
    }

    pub fn storage_order(&self) -> StorageOrder {
        self.format.storage_order
    }

    pub fn index_base(&self) -> IndexBase {
        self.format.index_base
    }

    pub fn row_block_size(&self) -> usize {
        self.row_block_size
    }

    pub fn col_block_size(&self) -> usize {
        self.col_block_size
    }

    pub fn block_size(&self) -> usize {
        self.row_block_size * self.col_block_size
    }

    pub fn extents(&self) -> LocalExtents {
        self.extents
    }

    pub fn num_my_rows(&self) -> usize {
        self.extents.num_my_rows
    }

    pub fn num_my_cols(&self) -> usize {
        self.extents.num_my_cols
    }

    /// Determines which block stores the given (block) row and column.
    pub fn locate_block(&self, row: usize, col: usize) -> Option<BlockEntry> {
        BlockKind::locate(row, col, self.extents.num_my_rows, self.extents.num_my_cols)
    }

    pub fn block(&self, kind: BlockKind) -> &BlockStore<T> {
        match kind {
            BlockKind::Main => &self.main,
            BlockKind::ColCouple => &self.col_couple,
            BlockKind::RowCouple => &self.row_couple,
        }
    }

    pub fn main_block(&self) -> &BlockStore<T> {
        &self.main
    }

    pub fn col_couple_block(&self) -> &BlockStore<T> {
        &self.col_couple
    }

    pub fn row_couple_block(&self) -> &BlockStore<T> {
        &self.row_couple
    }

    /// Direct mutable access to the values of a block, for solvers and connectors.
    pub fn block_values_mut(&mut self, kind: BlockKind) -> &mut [T] {
        match kind {
            BlockKind::Main => &mut self.main.values,
            BlockKind::ColCouple => &mut self.col_couple.values,
            BlockKind::RowCouple => &mut self.row_couple.values,
        }
    }

    /// Borrows the immutable structure and the mutable values of the matrix at the same time.
    pub(crate) fn split_for_scatter(&mut self) -> (ScatterLayout<'_>, BlockValuesMut<'_, T>) {
        let layout = ScatterLayout {
            order: self.format.storage_order,
            row_block_size: self.row_block_size,
            col_block_size: self.col_block_size,
            num_my_rows: self.extents.num_my_rows,
            num_my_cols: self.extents.num_my_cols,
            main: &self.main.pattern,
            col_couple: &self.col_couple.pattern,
            row_couple: &self.row_couple.pattern,
        };
        let values = BlockValuesMut {
            block_size: self.row_block_size * self.col_block_size,
            main: &mut self.main.values,
            col_couple: &mut self.col_couple.values,
            row_couple: &mut self.row_couple.values,
        };
        (layout, values)
    }

    /// Fails with [`UnsupportedFormatError`] unless the matrix uses the given storage order.
    pub fn require_storage_order(
        &self,
        order: StorageOrder,
        operation: &'static str,
    ) -> Result<(), UnsupportedFormatError> {
        if self.format.storage_order == order {
            Ok(())
        } else {
            Err(UnsupportedFormatError {
                operation,
                storage_order: self.format.storage_order,
            })
        }
    }
}

fn check_length(what: &'static str, expected: usize, actual: usize) -> Result<(), ConfigError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigError::VectorLength { what, expected, actual })
    }
}
