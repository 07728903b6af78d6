//! Assembly of dense element arrays into a [`DistributedMatrix`](crate::matrix::DistributedMatrix).
//!
//! The scatter-add of a single element is implemented once, in terms of the major/minor roles of
//! the storage order. [`SystemAssembler`] drives it serially over a sequence of elements, and
//! [`SystemParAssembler`] drives it in parallel over the colors of an [`ElementColoring`].
mod colored;
mod element;
mod scatter;

pub use colored::*;
pub use element::*;
pub use scatter::{scatter_add_vector, ElementShape, ScatterStats};

pub(crate) use scatter::{scatter_element, validate_element, ScatterLayout, TileSink};
