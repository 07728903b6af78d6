//! Import and export of assembled blocks.
//!
//! Exported indices are always one-based, as both formats require, whatever the index base of
//! the matrix.
pub mod harwell_boeing;
pub mod matrix_market;
