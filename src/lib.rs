//! blocksys
//! ========
//!
//! Assembly of finite element contributions into distributed, block-sparse system matrices.
//!
//! A [`DistributedMatrix`](matrix::DistributedMatrix) holds the part of a global matrix owned by
//! one rank, split into a main block and two coupling blocks for rows and columns owned by
//! neighbouring ranks. Every stored nonzero is a dense tile of `row_block_size x col_block_size`
//! scalars. Patterns may be stored row-major or column-major, and with zero- or one-based
//! indices.
//!
//! Dense element arrays are accumulated with [`DistributedMatrix::add`](matrix::DistributedMatrix::add),
//! or in bulk by the assemblers in [`assembly`], which run in parallel over a coloring of the
//! elements.
pub mod assembly;
pub mod error;
pub mod io;
pub mod matrix;
pub mod pattern;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

use nalgebra::RealField;

/// Scalar types that can be assembled.
///
/// Used as a trait alias for the traits needed by the assembly routines.
pub trait Real: RealField + Copy + Send + Sync {}

impl<T> Real for T where T: RealField + Copy + Send + Sync {}
